//! Debounced health tracking for the translation and synthesis servers.
//!
//! A single slow or dropped probe must not flip the operator display to
//! "down" mid-sermon: a service is only marked down after a run of
//! consecutive failures, and probe timeouts are inconclusive (previous state
//! wins). Probes are debounced so status reads stay cheap.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Consecutive failures required before a service is marked down.
const FAIL_THRESHOLD: u32 = 2;

/// Minimum interval between live probes.
const DEBOUNCE: Duration = Duration::from_secs(2);

/// Result of one probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The service answered.
    Up,
    /// The service answered badly or refused the connection.
    Down,
    /// The probe timed out; no conclusion either way.
    Inconclusive,
}

/// Snapshot of both services' health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub translation_ok: bool,
    pub synthesis_ok: bool,
}

impl ServiceStatus {
    pub fn all_ok(&self) -> bool {
        self.translation_ok && self.synthesis_ok
    }

    /// Human-readable summary for the operator.
    pub fn detail(&self) -> String {
        let mut issues = Vec::new();
        if !self.translation_ok {
            issues.push("translation server unreachable");
        }
        if !self.synthesis_ok {
            issues.push("TTS server unreachable");
        }
        if issues.is_empty() {
            "ok".to_string()
        } else {
            issues.join("; ")
        }
    }
}

#[derive(Debug)]
struct ProbeState {
    ok: bool,
    fail_count: u32,
}

impl ProbeState {
    fn new() -> Self {
        // Optimistic start so the UI doesn't flash "down" on launch.
        Self {
            ok: true,
            fail_count: 0,
        }
    }

    fn apply(&mut self, outcome: ProbeOutcome, service: &str) {
        match outcome {
            ProbeOutcome::Up => {
                self.ok = true;
                self.fail_count = 0;
            }
            ProbeOutcome::Down => {
                self.fail_count += 1;
                warn!(service, fail_count = self.fail_count, "health probe failed");
                if self.fail_count >= FAIL_THRESHOLD {
                    self.ok = false;
                }
            }
            ProbeOutcome::Inconclusive => {}
        }
    }
}

struct HealthInner {
    translation: ProbeState,
    synthesis: ProbeState,
    last_check: Option<Instant>,
}

/// Debounced health state for both backend services.
pub struct ServiceHealth {
    inner: Mutex<HealthInner>,
}

impl ServiceHealth {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HealthInner {
                translation: ProbeState::new(),
                synthesis: ProbeState::new(),
                last_check: None,
            }),
        }
    }

    /// Returns true if enough time has passed that a live probe is due.
    pub fn probe_due(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.last_check {
            None => true,
            Some(at) => at.elapsed() >= DEBOUNCE,
        }
    }

    /// Records the outcomes of one probe round.
    pub fn record(&self, translation: ProbeOutcome, synthesis: ProbeOutcome) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.translation.apply(translation, "translation");
        inner.synthesis.apply(synthesis, "synthesis");
        inner.last_check = Some(Instant::now());
    }

    /// Current health snapshot; never triggers network activity.
    pub fn status(&self) -> ServiceStatus {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        ServiceStatus {
            translation_ok: inner.translation.ok,
            synthesis_ok: inner.synthesis.ok,
        }
    }

    /// Probes both services over HTTP if the debounce interval has elapsed.
    #[cfg(feature = "remote-providers")]
    pub async fn check(&self, translation_url: &str, synthesis_url: &str) -> ServiceStatus {
        if self.probe_due() {
            let (t, s) = tokio::join!(
                probe(format!("{}/api/tags", translation_url.trim_end_matches('/'))),
                probe(format!("{}/models", synthesis_url.trim_end_matches('/'))),
            );
            self.record(t, s);
        }
        self.status()
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "remote-providers")]
async fn probe(url: String) -> ProbeOutcome {
    let client = reqwest::Client::new();
    match client
        .get(&url)
        .timeout(Duration::from_millis(800))
        .send()
        .await
    {
        Ok(response) if response.status().as_u16() < 500 => ProbeOutcome::Up,
        Ok(_) => ProbeOutcome::Down,
        Err(e) if e.is_timeout() => ProbeOutcome::Inconclusive,
        Err(_) => ProbeOutcome::Down,
    }
}
