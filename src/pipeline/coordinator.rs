//! Pipeline coordinator.
//!
//! Owns the channels and tasks that connect capture, segmentation,
//! transcription, translation, synthesis, output and broadcast:
//!
//! ```text
//! capture thread ──▶ segmenter thread ──▶ transcription task (sequential)
//!                                               │ submit
//!                                               ▼
//!                                    translation dispatcher (N workers)
//!                                               │ completion callback
//!                 ┌─────────────┬───────────────┼──────────────┐
//!                 ▼             ▼               ▼              ▼
//!             history log   broadcast      output events   synthesis task
//! ```
//!
//! The capture/segmenter path never suspends on downstream work; everything
//! async happens from the transcription task onwards.

use crate::audio::capture::{AudioCapture, AudioSource, CaptureConfig, CaptureHandle};
use crate::audio::gate::BlockGate;
use crate::broadcast::server::ListenerServer;
use crate::broadcast::state::ListenerBroadcastState;
use crate::config::RuntimeConfig;
use crate::defaults;
use crate::error::{PredikaError, Result};
use crate::output::history::{HistoryEntry, HistoryLog, HistoryStatus};
use crate::output::sink::{AudioSink, DisplaySink};
use crate::output::synchronizer::{OutputEvent, OutputSynchronizer};
use crate::pipeline::dispatch::{CompletionCallback, JobStatus, TranslationDispatcher, TranslationJob};
use crate::pipeline::synthesis::SynthesisStage;
use crate::pipeline::transcribe::TranscriptionStage;
use crate::providers::{RecognitionEngine, SynthesisProvider, TranslationProvider};
use crate::segment::segmenter::Segmenter;
use crate::segment::utterance::Utterance;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Depth of the finalized-utterance hand-off channel.
const UTTERANCE_CHANNEL_DEPTH: usize = 64;

/// Depth of the output event channel.
const OUTPUT_CHANNEL_DEPTH: usize = 256;

/// The assembled translation pipeline.
pub struct Pipeline {
    config: RuntimeConfig,
}

impl Pipeline {
    /// Validates the configuration and prepares a pipeline.
    ///
    /// Validation happens here, never mid-stream: a pipeline that constructs
    /// is a pipeline that can run.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Starts every stage and returns a handle for resize and shutdown.
    pub async fn start<A, R>(
        &self,
        source: A,
        engine: R,
        translator: Arc<dyn TranslationProvider>,
        synthesizer: Option<Arc<dyn SynthesisProvider>>,
        display: Arc<dyn DisplaySink>,
        audio_sink: Arc<dyn AudioSink>,
    ) -> Result<PipelineHandle>
    where
        A: AudioSource + 'static,
        R: RecognitionEngine + 'static,
    {
        let config = &self.config;

        let history = Arc::new(HistoryLog::create(&config.history.logs_dir)?);
        let broadcast = Arc::new(ListenerBroadcastState::new());
        std::fs::create_dir_all(&config.listener.audio_dir)?;

        // Output synchronizer.
        let (output_tx, output_rx) = mpsc::channel::<OutputEvent>(OUTPUT_CHANNEL_DEPTH);
        let output_task = tokio::spawn(
            OutputSynchronizer::from_config(config).run(output_rx, display, audio_sink),
        );

        // Synthesis, when enabled and a provider is wired.
        let synthesis = synthesizer
            .filter(|_| config.synthesis.enabled)
            .map(|provider| {
                SynthesisStage::new(
                    provider,
                    &config.synthesis.voice,
                    config.listener.audio_dir.clone(),
                    broadcast.clone(),
                    output_tx.clone(),
                )
            });

        // Completion callback: the single place a finished translation fans
        // out to history, snapshot, display and synthesis.
        let callback = make_callback(
            history.clone(),
            broadcast.clone(),
            output_tx.clone(),
            synthesis,
        );
        drop(output_tx);

        let source_language_prompt = if config.translation.source_language == defaults::AUTO_LANGUAGE
        {
            // Mirrors the translation prompt's auto-detect phrasing.
            "the detected language".to_string()
        } else {
            config.translation.source_language.clone()
        };
        let dispatcher = TranslationDispatcher::new(
            translator,
            &source_language_prompt,
            &config.translation.target_language,
            config.translation.parallel_translation_workers,
            callback,
        );

        // Capture thread.
        let rate = config.audio.sample_rate;
        let capture_config = CaptureConfig {
            block_samples: (config.audio.block_duration_ms as usize * rate as usize) / 1000,
            ..Default::default()
        };
        let (block_rx, capture) = AudioCapture::new(source, capture_config).start()?;

        // Segmenter thread: crossbeam in, bounded tokio hand-off out. A full
        // hand-off means transcription is far behind; the utterance is
        // abandoned rather than stalling live capture.
        let (utterance_tx, mut utterance_rx) =
            mpsc::channel::<Utterance>(UTTERANCE_CHANNEL_DEPTH);
        let mut segmenter = Segmenter::with_gate(
            config,
            BlockGate::new(
                config.audio.energy_threshold,
                config.audio.no_speech_threshold,
            ),
        );
        let segmenter_history = history.clone();
        std::thread::spawn(move || {
            while let Ok(block) = block_rx.recv() {
                for utterance in segmenter.push_block(&block.samples) {
                    match utterance_tx.try_send(utterance) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(utterance)) => {
                            warn!(id = utterance.id, "pipeline backlogged, utterance abandoned");
                            let _ = segmenter_history.record(HistoryEntry::now(
                                utterance.id,
                                String::new(),
                                HistoryStatus::Abandoned,
                            ));
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }
            }
        });

        // Transcription task: strictly sequential, one utterance at a time.
        let stage = TranscriptionStage::new(
            engine,
            crate::providers::whisper::language_argument(&config.translation.source_language)
                .map(String::from),
        );
        let transcription_history = history.clone();
        let transcription_dispatcher = dispatcher.clone();
        let archive_dir = config
            .history
            .archive_utterance_audio
            .then(|| config.history.logs_dir.clone());
        let transcription_task = tokio::spawn(async move {
            while let Some(utterance) = utterance_rx.recv().await {
                let id = utterance.id;
                if let Some(dir) = &archive_dir
                    && let Err(e) = archive_wav(dir, &utterance, rate)
                {
                    warn!(id, "utterance archive failed: {}", e);
                }
                match stage.transcribe_async(utterance).await {
                    Ok(Some(recognition)) => {
                        transcription_dispatcher.submit(id, recognition.text);
                    }
                    Ok(None) => {
                        let _ = transcription_history.record(HistoryEntry::now(
                            id,
                            String::new(),
                            HistoryStatus::Skipped,
                        ));
                    }
                    Err(e) => {
                        error!(id, "transcription failed, utterance dropped: {}", e);
                        let _ = transcription_history.record(HistoryEntry::now(
                            id,
                            String::new(),
                            HistoryStatus::TranscriptionFailed,
                        ));
                    }
                }
            }
        });

        // Listener endpoint, torn down only after the pipeline has drained.
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = ListenerServer::new(
            broadcast.clone(),
            config.listener.audio_dir.clone(),
            config.listener.port,
        );
        let server_task = tokio::spawn(async move {
            let result = server
                .serve(async move {
                    while !*shutdown_rx.borrow() {
                        if shutdown_rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await;
            if let Err(e) = result {
                error!("listener endpoint failed: {}", e);
            }
        });

        info!("pipeline started");
        Ok(PipelineHandle {
            capture,
            dispatcher,
            history,
            broadcast,
            shutdown_tx,
            drain_timeout: Duration::from_secs(self.config.translation.drain_timeout_s),
            transcription_task,
            output_task,
            server_task,
        })
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    capture: CaptureHandle,
    dispatcher: Arc<TranslationDispatcher>,
    history: Arc<HistoryLog>,
    broadcast: Arc<ListenerBroadcastState>,
    shutdown_tx: watch::Sender<bool>,
    drain_timeout: Duration,
    transcription_task: JoinHandle<()>,
    output_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
}

impl PipelineHandle {
    /// The broadcast state served to listeners.
    pub fn broadcast(&self) -> Arc<ListenerBroadcastState> {
        self.broadcast.clone()
    }

    /// True while audio capture is live.
    pub fn is_running(&self) -> bool {
        self.capture.is_running()
    }

    /// Fatal device error, if capture halted on one.
    pub fn device_error(&self) -> Option<PredikaError> {
        self.capture.take_error()
    }

    /// Translation requests currently in flight.
    pub fn translations_in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Rebuilds the translation pool with a new worker count without
    /// dropping queued or in-flight jobs.
    pub fn resize_translation_workers(&self, workers: usize) {
        self.dispatcher.resize(workers);
    }

    /// Two-phase shutdown.
    ///
    /// Phase one stops capture, which ends the segmenter and transcription
    /// in turn; phase two drains the translation pool up to the configured
    /// timeout and abandons the rest. Only then are the history log flushed
    /// and the output/listener tasks torn down, so the process exits clean.
    pub async fn shutdown(self) -> Result<()> {
        info!("pipeline shutting down");

        // Phase 1: no new utterances.
        self.capture.stop();
        if tokio::time::timeout(Duration::from_secs(5), self.transcription_task)
            .await
            .is_err()
        {
            warn!("transcription task did not stop in time");
        }

        // Phase 2: drain or abandon translation work.
        self.dispatcher.shutdown(self.drain_timeout).await;
        drop(self.dispatcher);

        self.history.flush_all()?;

        // Teardown: listener endpoint last, so pollers saw the final line.
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(5), self.server_task)
            .await
            .is_err()
        {
            warn!("listener endpoint did not stop in time");
        }
        if tokio::time::timeout(Duration::from_secs(2), self.output_task)
            .await
            .is_err()
        {
            warn!("output task still busy, detaching");
        }

        info!("pipeline stopped");
        Ok(())
    }
}

fn make_callback(
    history: Arc<HistoryLog>,
    broadcast: Arc<ListenerBroadcastState>,
    output_tx: mpsc::Sender<OutputEvent>,
    synthesis: Option<SynthesisStage>,
) -> CompletionCallback {
    Arc::new(move |job: TranslationJob| {
        let status = match job.status {
            JobStatus::Done => HistoryStatus::Done,
            JobStatus::Abandoned => HistoryStatus::Abandoned,
            _ => HistoryStatus::TranslationFailed,
        };
        let entry = HistoryEntry {
            utterance_id: job.utterance_id,
            source_text: job.source_text.clone(),
            translated_text: job.result.clone(),
            enqueue_ts: unix_ms(job.enqueued_at),
            complete_ts: job.completed_at.map(unix_ms).unwrap_or_else(|| unix_ms(SystemTime::now())),
            status,
        };
        if let Err(e) = history.record(entry) {
            error!("history write failed: {}", e);
        }

        if job.status != JobStatus::Done {
            return;
        }
        let text = job.result.clone().unwrap_or_default();

        // Publish-on-completion; the sequence guard rejects stale lines.
        broadcast.publish(job.sequence, text.clone(), None);

        if output_tx
            .try_send(OutputEvent::Line {
                utterance_id: job.utterance_id,
                sequence: job.sequence,
                text,
            })
            .is_err()
        {
            warn!(utterance_id = job.utterance_id, "output channel full, line not displayed");
        }

        if let Some(stage) = &synthesis {
            stage.spawn(&job);
        }
    })
}

/// Archives one finalized utterance as a 16-bit mono WAV for later audit.
fn archive_wav(dir: &Path, utterance: &Utterance, sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let path = dir.join(format!("utterance_{}.wav", utterance.id));
    let mut writer = hound::WavWriter::create(&path, spec).map_err(|e| PredikaError::History {
        message: format!("wav archive: {}", e),
    })?;
    for &sample in &utterance.samples {
        writer.write_sample(sample).map_err(|e| PredikaError::History {
            message: format!("wav archive: {}", e),
        })?;
    }
    writer.finalize().map_err(|e| PredikaError::History {
        message: format!("wav archive: {}", e),
    })?;
    Ok(())
}

fn unix_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
