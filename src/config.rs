//! Runtime configuration.
//!
//! All tunable thresholds live in one explicit [`RuntimeConfig`] value that is
//! passed by reference into every component at construction. Reconfiguration
//! rebuilds the affected component; nothing reads mutable global state.

use crate::defaults;
use crate::error::{PredikaError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub audio: AudioConfig,
    pub segmenter: SegmenterConfig,
    pub translation: TranslationConfig,
    pub synthesis: SynthesisConfig,
    pub output: OutputConfig,
    pub listener: ListenerConfig,
    pub history: HistoryConfig,
}

/// Audio capture and classification configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub block_duration_ms: u32,
    pub audio_buffer_duration_s: u32,
    pub energy_threshold: f32,
    pub no_speech_threshold: f32,
}

/// Utterance boundary configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    pub min_speech_to_start_ms: u32,
    pub min_silence_to_finalize_ms: u32,
    pub max_utterance_duration_s: f32,
    pub overlap_after_processing_ms: u32,
}

/// Translation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslationConfig {
    pub server_url: String,
    pub model: String,
    pub source_language: String,
    pub target_language: String,
    pub parallel_translation_workers: usize,
    pub drain_timeout_s: u64,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub enabled: bool,
    pub server_url: String,
    pub voice: String,
}

/// Display and playback timing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub text_display_delay_s: f32,
    pub audio_output_delay_s: f32,
    pub lines_to_keep_visible: usize,
    pub seconds_before_clearing: f32,
}

/// Listener polling endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    pub port: u16,
    pub audio_dir: PathBuf,
}

/// History log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub logs_dir: PathBuf,
    /// Archive each finalized utterance as a WAV file next to the log.
    pub archive_utterance_audio: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            block_duration_ms: defaults::BLOCK_DURATION_MS,
            audio_buffer_duration_s: defaults::AUDIO_BUFFER_DURATION_S,
            energy_threshold: defaults::ENERGY_THRESHOLD,
            no_speech_threshold: defaults::NO_SPEECH_THRESHOLD,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_speech_to_start_ms: defaults::MIN_SPEECH_TO_START_MS,
            min_silence_to_finalize_ms: defaults::MIN_SILENCE_TO_FINALIZE_MS,
            max_utterance_duration_s: defaults::MAX_UTTERANCE_DURATION_S,
            overlap_after_processing_ms: defaults::OVERLAP_AFTER_PROCESSING_MS,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            server_url: defaults::TRANSLATION_SERVER.to_string(),
            model: defaults::TRANSLATION_MODEL.to_string(),
            source_language: defaults::AUTO_LANGUAGE.to_string(),
            target_language: "Spanish".to_string(),
            parallel_translation_workers: defaults::PARALLEL_TRANSLATION_WORKERS,
            drain_timeout_s: defaults::DRAIN_TIMEOUT_S,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: defaults::TTS_SERVER.to_string(),
            voice: defaults::TTS_VOICE.to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            text_display_delay_s: 0.0,
            audio_output_delay_s: 0.0,
            lines_to_keep_visible: defaults::LINES_TO_KEEP_VISIBLE,
            seconds_before_clearing: defaults::SECONDS_BEFORE_CLEARING,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: defaults::LISTENER_PORT,
            audio_dir: PathBuf::from("temp_audio"),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("translation_logs"),
            archive_utterance_audio: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PredikaError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PredikaError::Io(e)
            }
        })?;
        let config: RuntimeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't
    /// exist.
    ///
    /// Invalid TOML is still an error; only a missing file falls back.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(PredikaError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PREDIKA_TRANSLATION_SERVER → translation.server_url
    /// - PREDIKA_TRANSLATION_MODEL → translation.model
    /// - PREDIKA_TTS_SERVER → synthesis.server_url
    /// - PREDIKA_TARGET_LANGUAGE → translation.target_language
    /// - PREDIKA_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("PREDIKA_TRANSLATION_SERVER")
            && !url.is_empty()
        {
            self.translation.server_url = url;
        }

        if let Ok(model) = std::env::var("PREDIKA_TRANSLATION_MODEL")
            && !model.is_empty()
        {
            self.translation.model = model;
        }

        if let Ok(url) = std::env::var("PREDIKA_TTS_SERVER")
            && !url.is_empty()
        {
            self.synthesis.server_url = url;
        }

        if let Ok(lang) = std::env::var("PREDIKA_TARGET_LANGUAGE")
            && !lang.is_empty()
        {
            self.translation.target_language = lang;
        }

        if let Ok(device) = std::env::var("PREDIKA_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        self
    }

    /// Validate threshold combinations.
    ///
    /// The pipeline never starts with an invalid configuration; every rule
    /// here is checked up front rather than surfacing mid-stream.
    pub fn validate(&self) -> Result<()> {
        if self.audio.block_duration_ms == 0 {
            return Err(invalid("audio.block_duration_ms", "must be positive"));
        }
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.audio.no_speech_threshold) {
            return Err(invalid(
                "audio.no_speech_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.segmenter.max_utterance_duration_s <= 0.0 {
            return Err(invalid(
                "segmenter.max_utterance_duration_s",
                "must be positive",
            ));
        }
        if self.segmenter.min_speech_to_start_ms as f32
            > self.segmenter.max_utterance_duration_s * 1000.0
        {
            return Err(invalid(
                "segmenter.min_speech_to_start_ms",
                "exceeds max_utterance_duration_s",
            ));
        }
        if (self.audio.audio_buffer_duration_s as f32) < self.segmenter.max_utterance_duration_s {
            return Err(invalid(
                "audio.audio_buffer_duration_s",
                "must cover at least one maximum-length utterance",
            ));
        }
        if self.segmenter.overlap_after_processing_ms
            > self.audio.audio_buffer_duration_s.saturating_mul(1000)
        {
            return Err(invalid(
                "segmenter.overlap_after_processing_ms",
                "exceeds the rolling buffer duration",
            ));
        }
        if self.translation.parallel_translation_workers == 0 {
            return Err(invalid(
                "translation.parallel_translation_workers",
                "must be at least 1",
            ));
        }
        if self.output.lines_to_keep_visible == 0 {
            return Err(invalid(
                "output.lines_to_keep_visible",
                "must be at least 1",
            ));
        }
        if self.output.seconds_before_clearing < 0.0
            || self.output.text_display_delay_s < 0.0
            || self.output.audio_output_delay_s < 0.0
        {
            return Err(invalid("output", "durations must not be negative"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/predika/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("predika")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> PredikaError {
    PredikaError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = RuntimeConfig::default();

        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.block_duration_ms, 100);
        assert_eq!(config.audio.audio_buffer_duration_s, 30);

        assert_eq!(config.segmenter.min_speech_to_start_ms, 1500);
        assert_eq!(config.segmenter.min_silence_to_finalize_ms, 800);
        assert_eq!(config.segmenter.overlap_after_processing_ms, 500);

        assert_eq!(config.translation.parallel_translation_workers, 2);
        assert_eq!(config.output.lines_to_keep_visible, 3);
        assert_eq!(config.listener.port, 8765);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            device = "hw:0,0"
            block_duration_ms = 50
            energy_threshold = 0.002

            [segmenter]
            min_silence_to_finalize_ms = 650
            max_utterance_duration_s = 12.0

            [translation]
            target_language = "French"
            parallel_translation_workers = 4

            [listener]
            port = 9000
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = RuntimeConfig::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.block_duration_ms, 50);
        assert_eq!(config.audio.energy_threshold, 0.002);
        assert_eq!(config.segmenter.min_silence_to_finalize_ms, 650);
        assert_eq!(config.segmenter.max_utterance_duration_s, 12.0);
        assert_eq!(config.translation.target_language, "French");
        assert_eq!(config.translation.parallel_translation_workers, 4);
        assert_eq!(config.listener.port, 9000);

        // Untouched sections keep defaults
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.synthesis.voice, "af_heart");
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing = Path::new("/tmp/nonexistent_predika_config_12345.toml");
        let config = RuntimeConfig::load_or_default(missing).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [audio
            device = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(RuntimeConfig::load(temp_file.path()).is_err());
        assert!(RuntimeConfig::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_speech_threshold_over_cap() {
        let mut config = RuntimeConfig::default();
        config.segmenter.min_speech_to_start_ms = 30_000;
        config.segmenter.max_utterance_duration_s = 20.0;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            PredikaError::ConfigInvalidValue { ref key, .. }
                if key == "segmenter.min_speech_to_start_ms"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = RuntimeConfig::default();
        config.translation.parallel_translation_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_buffer() {
        let mut config = RuntimeConfig::default();
        config.audio.audio_buffer_duration_s = 5;
        config.segmenter.max_utterance_duration_s = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_delays() {
        let mut config = RuntimeConfig::default();
        config.output.text_display_delay_s = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_no_speech_threshold() {
        let mut config = RuntimeConfig::default();
        config.audio.no_speech_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
