//! predika - Real-time sermon translation
//!
//! Live segmentation, transcription, translation and synthesis of spoken
//! sermons, with a local display and a polling endpoint for congregation
//! phones.

// Error handling discipline: propagate, don't panic.
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod broadcast;
pub mod config;
pub mod defaults;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod providers;
pub mod segment;

// Core traits (source → stages → sinks)
pub use audio::capture::AudioSource;
pub use output::sink::{AudioSink, CollectorDisplay, DisplaySink, NullAudioSink, StdoutDisplay};
pub use providers::{RecognitionEngine, SynthesisProvider, TranslationProvider};

// Pipeline
pub use pipeline::coordinator::{Pipeline, PipelineHandle};
pub use pipeline::dispatch::{JobStatus, TranslationDispatcher, TranslationJob};

// Broadcast
pub use broadcast::state::{ListenerBroadcastState, ListenerSnapshot};

// Error handling
pub use error::{PredikaError, Result};

// Config
pub use config::RuntimeConfig;

/// Build version string.
pub fn version_string() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_matches_cargo_version() {
        assert_eq!(version_string(), env!("CARGO_PKG_VERSION"));
    }
}
