//! Error types for predika.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredikaError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors (fatal: the pipeline halts on these)
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioDevice { message: String },

    // Recognition errors (terminal for one utterance, pipeline continues)
    #[error("Recognition failed: {message}")]
    Recognition { message: String },

    // Listener endpoint errors
    #[error("Listener endpoint error: {message}")]
    Listener { message: String },

    // History log errors
    #[error("History log error: {message}")]
    History { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PredikaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = PredikaError::ConfigInvalidValue {
            key: "min_speech_to_start_ms".to_string(),
            message: "exceeds max utterance duration".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for min_speech_to_start_ms: exceeds max utterance duration"
        );
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = PredikaError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_device_display() {
        let error = PredikaError::AudioDevice {
            message: "stream closed".to_string(),
        };
        assert_eq!(error.to_string(), "Audio capture failed: stream closed");
    }

    #[test]
    fn test_recognition_display() {
        let error = PredikaError::Recognition {
            message: "engine not ready".to_string(),
        };
        assert_eq!(error.to_string(), "Recognition failed: engine not ready");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: PredikaError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: PredikaError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PredikaError>();
        assert_sync::<PredikaError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
