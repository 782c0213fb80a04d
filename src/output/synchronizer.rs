//! Output timing.
//!
//! Completed translations arrive here the moment they finish; this component
//! decides *when* the congregation sees and hears them. Text and audio have
//! independent delays: a positive text delay with zero audio delay lets the
//! audience read before hearing, and vice versa. The display keeps a bounded
//! history of recent lines and clears itself after a stretch of inactivity.

use crate::config::RuntimeConfig;
use crate::output::sink::{AudioSink, DisplaySink};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Timer tick granularity for the run loop.
const TICK: Duration = Duration::from_millis(100);

/// Events consumed by the synchronizer.
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// A completed translation ready for display.
    Line {
        utterance_id: u64,
        sequence: u64,
        text: String,
    },
    /// Synthesized audio ready for playback.
    Audio { utterance_id: u64, audio_ref: String },
}

/// Schedules display and playback with independent delays.
pub struct OutputSynchronizer<C: Clock = SystemClock> {
    text_delay: Duration,
    audio_delay: Duration,
    lines_to_keep_visible: usize,
    clear_after: Duration,
    clock: C,

    pending_text: VecDeque<(Instant, String)>,
    pending_audio: VecDeque<(Instant, String)>,
    visible: Vec<String>,
    /// Arrival time of the newest line; inactivity is measured from here.
    last_arrival: Option<Instant>,
}

impl OutputSynchronizer<SystemClock> {
    /// Builds a synchronizer from the runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> OutputSynchronizer<C> {
    /// Builds a synchronizer with a custom clock.
    pub fn with_clock(config: &RuntimeConfig, clock: C) -> Self {
        Self {
            text_delay: Duration::from_secs_f32(config.output.text_display_delay_s),
            audio_delay: Duration::from_secs_f32(config.output.audio_output_delay_s),
            lines_to_keep_visible: config.output.lines_to_keep_visible,
            clear_after: Duration::from_secs_f32(config.output.seconds_before_clearing),
            clock,
            pending_text: VecDeque::new(),
            pending_audio: VecDeque::new(),
            visible: Vec::new(),
            last_arrival: None,
        }
    }

    /// Accepts an event; nothing is shown until its delay elapses.
    pub fn push(&mut self, event: OutputEvent) {
        let now = self.clock.now();
        match event {
            OutputEvent::Line {
                utterance_id, text, ..
            } => {
                debug!(utterance_id, "line queued for display");
                self.pending_text.push_back((now, text));
                self.last_arrival = Some(now);
            }
            OutputEvent::Audio { audio_ref, .. } => {
                self.pending_audio.push_back((now, audio_ref));
            }
        }
    }

    /// Releases everything whose delay has elapsed and handles inactivity.
    ///
    /// Called periodically from the run loop; tests drive it directly with a
    /// mock clock.
    pub fn tick(&mut self, display: &dyn DisplaySink, audio: &dyn AudioSink) {
        let now = self.clock.now();

        let mut display_dirty = false;
        while let Some((arrived, _)) = self.pending_text.front() {
            if now.duration_since(*arrived) < self.text_delay {
                break;
            }
            if let Some((_, text)) = self.pending_text.pop_front() {
                self.visible.push(text);
                while self.visible.len() > self.lines_to_keep_visible {
                    self.visible.remove(0);
                }
                display_dirty = true;
            }
        }
        if display_dirty {
            display.render(&self.visible);
        }

        while let Some((arrived, _)) = self.pending_audio.front() {
            if now.duration_since(*arrived) < self.audio_delay {
                break;
            }
            if let Some((_, audio_ref)) = self.pending_audio.pop_front() {
                audio.play(&audio_ref);
            }
        }

        // Inactivity clear: no new finalized line for the configured stretch.
        if !self.visible.is_empty()
            && self.pending_text.is_empty()
            && let Some(last) = self.last_arrival
            && now.duration_since(last) >= self.clear_after
        {
            self.visible.clear();
            display.clear();
            self.last_arrival = None;
        }
    }

    /// Lines currently visible.
    pub fn visible_lines(&self) -> &[String] {
        &self.visible
    }

    /// Runs the synchronizer until the input channel closes.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<OutputEvent>,
        display: std::sync::Arc<dyn DisplaySink>,
        audio: std::sync::Arc<dyn AudioSink>,
    ) {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = input.recv() => {
                    match event {
                        Some(event) => self.push(event),
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    self.tick(display.as_ref(), audio.as_ref());
                }
            }
        }

        // Channel closed at shutdown: release whatever is already due, drop
        // the rest. Listeners keep the final line via the snapshot.
        self.tick(display.as_ref(), audio.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::sink::{CollectorAudioSink, CollectorDisplay};
    use std::sync::{Arc, Mutex};

    /// Mock clock for testing that allows manual time advancement.
    #[derive(Clone)]
    struct MockClock {
        current: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        fn new() -> Self {
            Self {
                current: Arc::new(Mutex::new(Instant::now())),
            }
        }

        fn advance(&self, duration: Duration) {
            let mut current = self.current.lock().unwrap();
            *current += duration;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current.lock().unwrap()
        }
    }

    fn config(text_delay: f32, audio_delay: f32, lines: usize, clear_after: f32) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.output.text_display_delay_s = text_delay;
        config.output.audio_output_delay_s = audio_delay;
        config.output.lines_to_keep_visible = lines;
        config.output.seconds_before_clearing = clear_after;
        config
    }

    fn line(id: u64, text: &str) -> OutputEvent {
        OutputEvent::Line {
            utterance_id: id,
            sequence: id + 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_zero_delay_shows_immediately() {
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(0.0, 0.0, 3, 10.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        sync.push(line(0, "first line"));
        sync.tick(&display, &audio);

        assert_eq!(sync.visible_lines(), &["first line".to_string()]);
        assert_eq!(display.frames().len(), 1);
    }

    #[test]
    fn test_text_delay_holds_line_back() {
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(2.0, 0.0, 3, 10.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        sync.push(line(0, "delayed"));
        sync.tick(&display, &audio);
        assert!(sync.visible_lines().is_empty());

        clock.advance(Duration::from_secs(2));
        sync.tick(&display, &audio);
        assert_eq!(sync.visible_lines(), &["delayed".to_string()]);
    }

    #[test]
    fn test_delays_are_independent() {
        // Text delayed 2s, audio immediate: the audience hears before
        // reading.
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(2.0, 0.0, 3, 10.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        sync.push(line(0, "text"));
        sync.push(OutputEvent::Audio {
            utterance_id: 0,
            audio_ref: "/audio/utterance_0.mp3".to_string(),
        });
        sync.tick(&display, &audio);

        assert!(sync.visible_lines().is_empty());
        assert_eq!(audio.played().len(), 1);
    }

    #[test]
    fn test_audio_delay_schedules_playback_later() {
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(0.0, 3.0, 3, 10.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        sync.push(OutputEvent::Audio {
            utterance_id: 0,
            audio_ref: "/audio/utterance_0.mp3".to_string(),
        });
        sync.tick(&display, &audio);
        assert!(audio.played().is_empty());

        clock.advance(Duration::from_secs(3));
        sync.tick(&display, &audio);
        assert_eq!(audio.played(), vec!["/audio/utterance_0.mp3"]);
    }

    #[test]
    fn test_visible_history_is_bounded() {
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(0.0, 0.0, 2, 10.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        for i in 0..4 {
            sync.push(line(i, &format!("line {}", i)));
            sync.tick(&display, &audio);
        }

        // Only the two most recent lines survive.
        assert_eq!(sync.visible_lines(), &[
            "line 2".to_string(),
            "line 3".to_string()
        ]);
    }

    #[test]
    fn test_display_clears_after_inactivity() {
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(0.0, 0.0, 3, 5.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        sync.push(line(0, "lingering"));
        sync.tick(&display, &audio);
        assert!(!sync.visible_lines().is_empty());

        clock.advance(Duration::from_secs(4));
        sync.tick(&display, &audio);
        assert!(!sync.visible_lines().is_empty());

        clock.advance(Duration::from_secs(2));
        sync.tick(&display, &audio);
        assert!(sync.visible_lines().is_empty());
        assert_eq!(display.clears(), 1);
    }

    #[test]
    fn test_new_line_resets_inactivity_window() {
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(0.0, 0.0, 3, 5.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        sync.push(line(0, "first"));
        sync.tick(&display, &audio);

        clock.advance(Duration::from_secs(4));
        sync.push(line(1, "second"));
        sync.tick(&display, &audio);

        clock.advance(Duration::from_secs(4));
        sync.tick(&display, &audio);

        // 8s since the first line but only 4s since the second: still shown.
        assert_eq!(sync.visible_lines().len(), 2);
    }

    #[test]
    fn test_clear_waits_for_pending_lines() {
        // A line still held by the text delay counts as activity.
        let clock = MockClock::new();
        let mut sync = OutputSynchronizer::with_clock(&config(6.0, 0.0, 3, 5.0), clock.clone());
        let display = CollectorDisplay::new();
        let audio = CollectorAudioSink::new();

        sync.push(line(0, "shown"));
        clock.advance(Duration::from_secs(6));
        sync.tick(&display, &audio);
        assert_eq!(sync.visible_lines().len(), 1);

        sync.push(line(1, "held back"));
        clock.advance(Duration::from_secs(5));
        // 5s of no arrivals, but line 1 is still pending: no clear.
        sync.tick(&display, &audio);
        assert_eq!(sync.visible_lines().len(), 1);
        assert_eq!(display.clears(), 0);

        clock.advance(Duration::from_secs(1));
        sync.tick(&display, &audio);
        assert_eq!(sync.visible_lines().len(), 2);
    }

    #[tokio::test]
    async fn test_run_processes_events_from_channel() {
        let sync = OutputSynchronizer::from_config(&config(0.0, 0.0, 3, 10.0));
        let display = Arc::new(CollectorDisplay::new());
        let audio = Arc::new(CollectorAudioSink::new());

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(sync.run(rx, display.clone(), audio.clone()));

        tx.send(line(0, "over the channel")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            display.last_frame().unwrap(),
            vec!["over the channel".to_string()]
        );
    }
}
