//! Output sinks.
//!
//! The desktop display window and the playback device are external
//! collaborators; these traits are their narrow contracts. `StdoutDisplay`
//! drives a terminal, the collector sinks record everything for tests.

use std::sync::Mutex;
use tracing::info;

/// Trait for the local translated-text display.
pub trait DisplaySink: Send + Sync {
    /// Replace the visible lines with `lines` (newest last).
    fn render(&self, lines: &[String]);

    /// Clear the display.
    fn clear(&self);
}

/// Trait for local playback of synthesized audio.
pub trait AudioSink: Send + Sync {
    /// Play the audio behind `audio_ref`.
    fn play(&self, audio_ref: &str);
}

/// Display sink that prints lines to stdout.
pub struct StdoutDisplay;

impl DisplaySink for StdoutDisplay {
    fn render(&self, lines: &[String]) {
        for line in lines {
            println!("{}", line);
        }
        println!("---");
    }

    fn clear(&self) {
        println!();
    }
}

/// Display sink that records every rendered frame, for tests.
#[derive(Default)]
pub struct CollectorDisplay {
    frames: Mutex<Vec<Vec<String>>>,
    clears: Mutex<usize>,
}

impl CollectorDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// All frames rendered so far.
    pub fn frames(&self) -> Vec<Vec<String>> {
        self.frames.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// The most recently rendered frame.
    pub fn last_frame(&self) -> Option<Vec<String>> {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last()
            .cloned()
    }

    /// Number of clear() calls observed.
    pub fn clears(&self) -> usize {
        *self.clears.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl DisplaySink for CollectorDisplay {
    fn render(&self, lines: &[String]) {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(lines.to_vec());
    }

    fn clear(&self) {
        *self.clears.lock().unwrap_or_else(|p| p.into_inner()) += 1;
    }
}

/// Audio sink that logs instead of playing.
///
/// Playback devices are venue-specific; by default the synthesized audio is
/// only served to listeners over the network.
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn play(&self, audio_ref: &str) {
        info!(audio_ref, "audio ready for playback");
    }
}

/// Audio sink that records play requests, for tests.
#[derive(Default)]
pub struct CollectorAudioSink {
    played: Mutex<Vec<String>>,
}

impl CollectorAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl AudioSink for CollectorAudioSink {
    fn play(&self, audio_ref: &str) {
        self.played
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(audio_ref.to_string());
    }
}
