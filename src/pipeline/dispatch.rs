//! Translation dispatcher.
//!
//! A bounded worker pool in front of the translation provider. Submissions
//! never block: they take an enqueue sequence number and join a FIFO queue;
//! at most `parallel_translation_workers` requests are in flight at once.
//! Every job produces exactly one completion callback, success or failure.
//!
//! Resizing migrates the pending queue into a fresh pool before the old one
//! is retired, so no queued or in-flight job is ever lost. Shutdown stops
//! intake, drains best-effort up to a bounded timeout, then force-abandons:
//! queued jobs get Abandoned callbacks and late in-flight results are
//! discarded.

use crate::providers::TranslationProvider;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Lifecycle of a translation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued, waiting for a worker.
    Pending,
    /// A provider request is running.
    InFlight,
    /// Translation succeeded.
    Done,
    /// Terminal provider failure.
    Failed,
    /// Dropped at shutdown or refused after intake closed.
    Abandoned,
}

/// One translation request, correlated to exactly one utterance.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub utterance_id: u64,
    /// Enqueue sequence number, monotonic in submission (= utterance) order.
    pub sequence: u64,
    pub source_text: String,
    pub target_language: String,
    pub status: JobStatus,
    pub result: Option<String>,
    pub enqueued_at: SystemTime,
    pub completed_at: Option<SystemTime>,
}

/// Invoked exactly once per job with its terminal state.
pub type CompletionCallback = Arc<dyn Fn(TranslationJob) + Send + Sync>;

struct Ticket {
    job: TranslationJob,
    /// Exactly-once guard shared with the force-abandon path.
    delivered: Arc<AtomicBool>,
}

/// One generation of workers and their queue. Replaced wholesale on resize.
struct Pool {
    pending: Mutex<VecDeque<Ticket>>,
    notify: Notify,
    retired: AtomicBool,
}

impl Pool {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            retired: AtomicBool::new(false),
        }
    }
}

/// Bounded worker pool for translation requests.
pub struct TranslationDispatcher {
    provider: Arc<dyn TranslationProvider>,
    callback: CompletionCallback,
    source_language: String,
    target_language: String,

    pool: Mutex<Arc<Pool>>,
    next_sequence: AtomicU64,
    accepting: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    /// Snapshot of in-flight jobs so force-abandon can deliver for them.
    in_flight_jobs: Arc<Mutex<HashMap<u64, (TranslationJob, Arc<AtomicBool>)>>>,
    /// Signalled whenever a job finishes, for the drain loop.
    drained: Arc<Notify>,
}

impl TranslationDispatcher {
    /// Creates a dispatcher and spawns its worker pool.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        source_language: &str,
        target_language: &str,
        workers: usize,
        callback: CompletionCallback,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            provider,
            callback,
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            pool: Mutex::new(Arc::new(Pool::new())),
            next_sequence: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            in_flight: Arc::new(AtomicUsize::new(0)),
            in_flight_jobs: Arc::new(Mutex::new(HashMap::new())),
            drained: Arc::new(Notify::new()),
        });

        let pool = dispatcher.current_pool();
        dispatcher.spawn_workers(&pool, workers);
        dispatcher
    }

    fn current_pool(&self) -> Arc<Pool> {
        self.pool.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Submits a transcript for translation. Non-blocking.
    ///
    /// The returned job is the submission-time snapshot; the terminal state
    /// arrives through the completion callback.
    pub fn submit(&self, utterance_id: u64, transcript: String) -> TranslationJob {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut job = TranslationJob {
            utterance_id,
            sequence,
            source_text: transcript,
            target_language: self.target_language.clone(),
            status: JobStatus::Pending,
            result: None,
            enqueued_at: SystemTime::now(),
            completed_at: None,
        };

        if !self.accepting.load(Ordering::SeqCst) {
            job.status = JobStatus::Abandoned;
            job.completed_at = Some(SystemTime::now());
            warn!(utterance_id, "submission refused, dispatcher shutting down");
            (self.callback)(job.clone());
            return job;
        }

        let pool = self.current_pool();
        {
            let mut pending = pool.pending.lock().unwrap_or_else(|p| p.into_inner());
            pending.push_back(Ticket {
                job: job.clone(),
                delivered: Arc::new(AtomicBool::new(false)),
            });
        }
        pool.notify.notify_one();
        debug!(utterance_id, sequence, "translation job queued");
        job
    }

    /// Number of provider requests currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of jobs queued and not yet started.
    pub fn queued(&self) -> usize {
        let pool = self.current_pool();
        let pending = pool.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.len()
    }

    /// Rebuilds the pool with a new worker count.
    ///
    /// Queue migration: the new pool is constructed first, the old pending
    /// queue is transferred into it ahead of any later submissions, and only
    /// then is the old pool retired. Nothing is submitted to a pool about to
    /// be discarded, and in-flight jobs on old workers run to completion.
    pub fn resize(&self, workers: usize) {
        info!(workers, "resizing translation worker pool");
        let new_pool = Arc::new(Pool::new());

        let old_pool = {
            let mut guard = self.pool.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *guard, new_pool.clone())
        };

        // Migrated jobs keep their FIFO position ahead of post-swap arrivals.
        {
            let mut old_pending = old_pool.pending.lock().unwrap_or_else(|p| p.into_inner());
            let mut new_pending = new_pool.pending.lock().unwrap_or_else(|p| p.into_inner());
            while let Some(ticket) = old_pending.pop_back() {
                new_pending.push_front(ticket);
            }
        }

        old_pool.retired.store(true, Ordering::SeqCst);
        old_pool.notify.notify_waiters();

        self.spawn_workers(&new_pool, workers);
    }

    /// Two-phase shutdown.
    ///
    /// Stops intake immediately, then waits up to `drain_timeout` for queued
    /// and in-flight jobs to finish. Whatever remains is force-abandoned:
    /// queued jobs get their Abandoned callback here, and in-flight jobs get
    /// it too, with their eventual provider result discarded.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("translation dispatcher draining");

        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            if self.queued() == 0 && self.in_flight() == 0 {
                break;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                self.force_abandon();
                break;
            }
            let _ = tokio::time::timeout_at(deadline, self.drained.notified()).await;
        }

        let pool = self.current_pool();
        pool.retired.store(true, Ordering::SeqCst);
        pool.notify.notify_waiters();
        info!("translation dispatcher stopped");
    }

    /// Delivers Abandoned for everything still queued or in flight.
    fn force_abandon(&self) {
        let pool = self.current_pool();
        let mut abandoned = 0usize;

        let tickets: Vec<Ticket> = {
            let mut pending = pool.pending.lock().unwrap_or_else(|p| p.into_inner());
            pending.drain(..).collect()
        };
        for ticket in tickets {
            if deliver(&ticket.delivered, &self.callback, ticket.job, JobStatus::Abandoned) {
                abandoned += 1;
            }
        }

        let in_flight: Vec<(TranslationJob, Arc<AtomicBool>)> = {
            let mut jobs = self
                .in_flight_jobs
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            jobs.drain().map(|(_, v)| v).collect()
        };
        for (job, delivered) in in_flight {
            if deliver(&delivered, &self.callback, job, JobStatus::Abandoned) {
                abandoned += 1;
            }
        }

        if abandoned > 0 {
            warn!(abandoned, "drain timeout reached, jobs abandoned");
        }
    }

    fn spawn_workers(&self, pool: &Arc<Pool>, count: usize) {
        for _ in 0..count {
            let pool = pool.clone();
            let provider = self.provider.clone();
            let callback = self.callback.clone();
            let source_language = self.source_language.clone();
            let in_flight = self.in_flight.clone();
            let in_flight_jobs = self.in_flight_jobs.clone();
            let drained = self.drained.clone();

            tokio::spawn(async move {
                loop {
                    // Register for wakeups before checking the queue, so a
                    // submission between the check and the await still wakes
                    // this worker.
                    let notified = pool.notify.notified();

                    let ticket = {
                        let mut pending =
                            pool.pending.lock().unwrap_or_else(|p| p.into_inner());
                        let ticket = pending.pop_front();
                        if ticket.is_some() {
                            // Claimed under the queue lock: the drain loop can
                            // never observe "queue empty, nothing in flight"
                            // while a job is between the two.
                            in_flight.fetch_add(1, Ordering::SeqCst);
                        }
                        ticket
                    };

                    match ticket {
                        Some(ticket) => {
                            run_job(
                                ticket,
                                &provider,
                                &source_language,
                                &callback,
                                &in_flight,
                                &in_flight_jobs,
                                &drained,
                            )
                            .await;
                        }
                        None => {
                            if pool.retired.load(Ordering::SeqCst) {
                                break;
                            }
                            notified.await;
                        }
                    }
                }
            });
        }
    }
}

async fn run_job(
    ticket: Ticket,
    provider: &Arc<dyn TranslationProvider>,
    source_language: &str,
    callback: &CompletionCallback,
    in_flight: &Arc<AtomicUsize>,
    in_flight_jobs: &Arc<Mutex<HashMap<u64, (TranslationJob, Arc<AtomicBool>)>>>,
    drained: &Arc<Notify>,
) {
    let mut job = ticket.job;
    job.status = JobStatus::InFlight;
    {
        let mut jobs = in_flight_jobs.lock().unwrap_or_else(|p| p.into_inner());
        jobs.insert(job.sequence, (job.clone(), ticket.delivered.clone()));
    }

    let mut result = provider
        .translate(&job.source_text, source_language, &job.target_language)
        .await;

    if let Err(ref e) = result
        && e.is_transient()
    {
        warn!(
            utterance_id = job.utterance_id,
            "transient translation failure, retrying once: {}", e
        );
        result = provider
            .translate(&job.source_text, source_language, &job.target_language)
            .await;
    }

    let status = match result {
        Ok(text) => {
            job.result = Some(text);
            JobStatus::Done
        }
        Err(e) => {
            warn!(
                utterance_id = job.utterance_id,
                "translation failed: {}", e
            );
            JobStatus::Failed
        }
    };

    {
        let mut jobs = in_flight_jobs.lock().unwrap_or_else(|p| p.into_inner());
        jobs.remove(&job.sequence);
    }

    deliver(&ticket.delivered, callback, job, status);
    in_flight.fetch_sub(1, Ordering::SeqCst);
    drained.notify_waiters();
}

/// Fires the callback if this job hasn't been delivered yet.
///
/// The exactly-once guard is what discards late results after force-abandon.
fn deliver(
    delivered: &Arc<AtomicBool>,
    callback: &CompletionCallback,
    mut job: TranslationJob,
    status: JobStatus,
) -> bool {
    if delivered
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!(sequence = job.sequence, "late completion discarded");
        return false;
    }
    job.status = status;
    if status != JobStatus::Done {
        job.result = None;
    }
    job.completed_at = Some(SystemTime::now());
    callback(job);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockTranslator;
    use std::time::Duration;

    fn collector() -> (CompletionCallback, Arc<Mutex<Vec<TranslationJob>>>) {
        let completed: Arc<Mutex<Vec<TranslationJob>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = completed.clone();
        let callback: CompletionCallback = Arc::new(move |job| {
            sink.lock().unwrap().push(job);
        });
        (callback, completed)
    }

    async fn wait_for_completions(
        completed: &Arc<Mutex<Vec<TranslationJob>>>,
        count: usize,
        timeout: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + timeout;
        while completed.lock().unwrap().len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} completions, have {}",
                count,
                completed.lock().unwrap().len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_submit_assigns_monotonic_sequences() {
        let (callback, _) = collector();
        let dispatcher = TranslationDispatcher::new(
            Arc::new(MockTranslator::new()),
            "English",
            "Spanish",
            2,
            callback,
        );

        let a = dispatcher.submit(0, "first".to_string());
        let b = dispatcher.submit(1, "second".to_string());
        let c = dispatcher.submit(2, "third".to_string());

        assert_eq!((a.sequence, b.sequence, c.sequence), (1, 2, 3));
        assert_eq!(a.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_jobs_complete_with_results() {
        let (callback, completed) = collector();
        let dispatcher = TranslationDispatcher::new(
            Arc::new(MockTranslator::new()),
            "English",
            "Spanish",
            2,
            callback,
        );

        dispatcher.submit(0, "God is love".to_string());
        wait_for_completions(&completed, 1, Duration::from_secs(2)).await;

        let jobs = completed.lock().unwrap();
        assert_eq!(jobs[0].status, JobStatus::Done);
        assert_eq!(jobs[0].result.as_deref(), Some("[Spanish] God is love"));
        assert!(jobs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        // 5 jobs into 2 workers: exactly 2 concurrent provider calls, the
        // other 3 queued FIFO.
        let translator = Arc::new(MockTranslator::new().with_delay(Duration::from_millis(50)));
        let (callback, completed) = collector();
        let dispatcher =
            TranslationDispatcher::new(translator.clone(), "English", "Spanish", 2, callback);

        for i in 0..5 {
            dispatcher.submit(i, format!("line {}", i));
        }
        assert!(dispatcher.in_flight() <= 2);

        wait_for_completions(&completed, 5, Duration::from_secs(5)).await;
        assert_eq!(translator.max_concurrent(), 2);
        assert_eq!(translator.calls(), 5);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let translator = Arc::new(MockTranslator::new().with_transient_failures(1));
        let (callback, completed) = collector();
        let dispatcher =
            TranslationDispatcher::new(translator.clone(), "English", "Spanish", 1, callback);

        dispatcher.submit(0, "retry me".to_string());
        wait_for_completions(&completed, 1, Duration::from_secs(2)).await;

        let jobs = completed.lock().unwrap();
        assert_eq!(jobs[0].status, JobStatus::Done);
        assert_eq!(translator.calls(), 2);
    }

    #[tokio::test]
    async fn test_two_transient_failures_are_terminal() {
        let translator = Arc::new(MockTranslator::new().with_transient_failures(2));
        let (callback, completed) = collector();
        let dispatcher =
            TranslationDispatcher::new(translator.clone(), "English", "Spanish", 1, callback);

        dispatcher.submit(0, "no luck".to_string());
        wait_for_completions(&completed, 1, Duration::from_secs(2)).await;

        let jobs = completed.lock().unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0].result.is_none());
        // One retry, never more.
        assert_eq!(translator.calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let translator = Arc::new(MockTranslator::new().with_permanent_failure());
        let (callback, completed) = collector();
        let dispatcher =
            TranslationDispatcher::new(translator.clone(), "English", "Spanish", 1, callback);

        dispatcher.submit(0, "rejected".to_string());
        wait_for_completions(&completed, 1, Duration::from_secs(2)).await;

        assert_eq!(completed.lock().unwrap()[0].status, JobStatus::Failed);
        assert_eq!(translator.calls(), 1);
    }

    #[tokio::test]
    async fn test_resize_preserves_queued_jobs() {
        // One slow worker with a backlog; resizing to three must not lose a
        // single queued job.
        let translator = Arc::new(MockTranslator::new().with_delay(Duration::from_millis(40)));
        let (callback, completed) = collector();
        let dispatcher =
            TranslationDispatcher::new(translator.clone(), "English", "Spanish", 1, callback);

        for i in 0..6 {
            dispatcher.submit(i, format!("line {}", i));
        }
        dispatcher.resize(3);

        wait_for_completions(&completed, 6, Duration::from_secs(5)).await;

        let jobs = completed.lock().unwrap();
        assert_eq!(jobs.len(), 6);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Done));
        let mut sequences: Vec<u64> = jobs.iter().map(|j| j.sequence).collect();
        sequences.sort();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
        // The old pool's in-flight job may overlap the new pool briefly.
        assert!(translator.max_concurrent() <= 4);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_work() {
        let translator = Arc::new(MockTranslator::new().with_delay(Duration::from_millis(20)));
        let (callback, completed) = collector();
        let dispatcher =
            TranslationDispatcher::new(translator, "English", "Spanish", 2, callback);

        for i in 0..4 {
            dispatcher.submit(i, format!("line {}", i));
        }
        dispatcher.shutdown(Duration::from_secs(5)).await;

        let jobs = completed.lock().unwrap();
        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Done));
    }

    #[tokio::test]
    async fn test_shutdown_abandons_after_drain_timeout() {
        // Provider far slower than the drain window: everything queued or in
        // flight is abandoned exactly once, late results discarded.
        let translator = Arc::new(MockTranslator::new().with_delay(Duration::from_secs(30)));
        let (callback, completed) = collector();
        let dispatcher =
            TranslationDispatcher::new(translator, "English", "Spanish", 1, callback);

        dispatcher.submit(0, "in flight".to_string());
        dispatcher.submit(1, "queued".to_string());

        dispatcher.shutdown(Duration::from_millis(50)).await;

        let jobs = completed.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Abandoned));
        assert!(jobs.iter().all(|j| j.result.is_none()));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_abandoned() {
        let (callback, completed) = collector();
        let dispatcher = TranslationDispatcher::new(
            Arc::new(MockTranslator::new()),
            "English",
            "Spanish",
            1,
            callback,
        );

        dispatcher.shutdown(Duration::from_millis(100)).await;
        let job = dispatcher.submit(9, "too late".to_string());

        assert_eq!(job.status, JobStatus::Abandoned);
        let jobs = completed.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Abandoned);
    }
}
