//! External provider contracts.
//!
//! The recognition engine, translation LLM and speech synthesizer are
//! collaborators behind narrow traits. Real implementations talk HTTP
//! (`ollama`, `kokoro`, feature `remote-providers`); the mocks here allow
//! swapping them out in tests, mirroring the real providers' failure modes.

use crate::error::{PredikaError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

pub mod health;
#[cfg(feature = "remote-providers")]
pub mod kokoro;
#[cfg(feature = "remote-providers")]
pub mod ollama;
pub mod whisper;

pub use health::{ServiceHealth, ServiceStatus};
pub use whisper::{WhisperConfig, WhisperRecognizer};

/// Translation provider failure, classified for retry policy.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("translation request timed out")]
    Timeout,

    #[error("translation server error: status {status}")]
    Server { status: u16 },

    #[error("translation connection failed: {message}")]
    Connection { message: String },

    #[error("translation request rejected: {message}")]
    Rejected { message: String },

    #[error("translation result was empty")]
    EmptyResult,
}

impl ProviderError {
    /// Transient failures (timeout, 5xx) earn exactly one retry; everything
    /// else is terminal for the utterance.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Server { .. })
    }
}

/// Speech synthesis failure. Never fatal to the pipeline: output degrades to
/// text-only.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("synthesis connection failed: {message}")]
    Connection { message: String },

    #[error("synthesis server error: status {status}")]
    Server { status: u16 },

    #[error("synthesis rejected: {message}")]
    Rejected { message: String },
}

/// Transcript returned by the recognition engine.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    /// Detected (or confirmed) source language code, when the engine knows.
    pub language: Option<String>,
    /// Engine confidence in the language decision.
    pub language_confidence: Option<f32>,
}

impl Recognition {
    pub fn from_text(text: String) -> Self {
        Self {
            text,
            language: None,
            language_confidence: None,
        }
    }
}

/// Trait for speech-to-text recognition engines.
///
/// Called with exactly one utterance's audio per invocation: real-time mode
/// never batches. Synchronous because inference engines block a thread; the
/// pipeline bridges with `spawn_blocking`.
pub trait RecognitionEngine: Send + Sync {
    /// Transcribe one utterance's audio.
    ///
    /// # Arguments
    /// * `samples` - Audio as 16-bit PCM at 16kHz mono
    /// * `language` - Source language code, or None for auto-detection
    fn transcribe(&self, samples: &[i16], language: Option<&str>) -> Result<Recognition>;

    /// Check if the engine is ready to accept audio.
    fn is_ready(&self) -> bool;
}

/// Trait for translation providers.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate `text` between the named languages.
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> std::result::Result<String, ProviderError>;
}

/// Trait for speech synthesis providers.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Synthesize `text` with the given voice, returning encoded audio bytes.
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<Vec<u8>, SynthesisError>;
}

/// Mock recognition engine for testing
pub struct MockRecognizer {
    response: String,
    language: Option<String>,
    should_fail: bool,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self {
            response: "mock transcription".to_string(),
            language: Some("en".to_string()),
            should_fail: false,
        }
    }

    /// Configure the mock to return a specific transcript
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the detected language
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionEngine for MockRecognizer {
    fn transcribe(&self, _samples: &[i16], _language: Option<&str>) -> Result<Recognition> {
        if self.should_fail {
            Err(PredikaError::Recognition {
                message: "mock recognition failure".to_string(),
            })
        } else {
            Ok(Recognition {
                text: self.response.clone(),
                language: self.language.clone(),
                language_confidence: self.language.as_ref().map(|_| 0.95),
            })
        }
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}

/// Mock translation provider for testing.
///
/// Tracks invocation counts and peak concurrency; can be scripted to fail
/// transiently a fixed number of times, or permanently.
pub struct MockTranslator {
    delay: Duration,
    transient_failures: AtomicU32,
    fail_permanently: bool,
    calls: AtomicU32,
    concurrent: AtomicU32,
    max_concurrent: AtomicU32,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            transient_failures: AtomicU32::new(0),
            fail_permanently: false,
            calls: AtomicU32::new(0),
            concurrent: AtomicU32::new(0),
            max_concurrent: AtomicU32::new(0),
        }
    }

    /// Configure a per-call delay, to observe queueing and concurrency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Configure the mock to time out this many times before succeeding
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Configure the mock to reject every request
    pub fn with_permanent_failure(mut self) -> Self {
        self.fail_permanently = true;
        self
    }

    /// Number of translate calls observed
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent translate calls observed
    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

impl Default for MockTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranslationProvider for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
    ) -> std::result::Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        if self.fail_permanently {
            return Err(ProviderError::Rejected {
                message: "mock permanent failure".to_string(),
            });
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Timeout);
        }

        Ok(format!("[{}] {}", target_language, text))
    }
}

/// Mock synthesis provider for testing
pub struct MockSynthesizer {
    audio: Vec<u8>,
    should_fail: bool,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            audio: vec![0u8; 64],
            should_fail: false,
        }
    }

    /// Configure the audio bytes returned
    pub fn with_audio(mut self, audio: Vec<u8>) -> Self {
        self.audio = audio;
        self
    }

    /// Configure the mock to fail on synthesize
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisProvider for MockSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &str,
    ) -> std::result::Result<Vec<u8>, SynthesisError> {
        if self.should_fail {
            Err(SynthesisError::Rejected {
                message: "mock synthesis failure".to_string(),
            })
        } else {
            Ok(self.audio.clone())
        }
    }
}
