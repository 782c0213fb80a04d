//! Whisper-backed recognition engine.
//!
//! Thin adapter over whisper-rs implementing [`RecognitionEngine`]. Requires
//! the `whisper` feature and cmake to build; without the feature a stub with
//! the same surface is compiled that fails loudly when used.

use super::{Recognition, RecognitionEngine};
use crate::defaults;
use crate::error::{PredikaError, Result};
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for the Whisper engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Number of inference threads (None = auto-detect)
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-small.bin"),
            threads: None,
        }
    }
}

/// Whisper recognition engine.
#[cfg(feature = "whisper")]
pub struct WhisperRecognizer {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
}

/// Whisper recognition engine placeholder (without the `whisper` feature).
#[cfg(not(feature = "whisper"))]
pub struct WhisperRecognizer {
    #[allow(dead_code)]
    config: WhisperConfig,
}

#[cfg(feature = "whisper")]
impl WhisperRecognizer {
    /// Loads the model from `config.model_path`.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // Route whisper.cpp's stderr chatter through the logging hooks once.
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(PredikaError::Recognition {
                message: format!("model not found at {}", config.model_path.display()),
            });
        }

        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| PredikaError::Recognition {
                    message: "invalid UTF-8 in model path".to_string(),
                })?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| PredikaError::Recognition {
            message: format!("failed to load model: {}", e),
        })?;

        Ok(Self {
            context: Mutex::new(context),
            config,
        })
    }
}

#[cfg(feature = "whisper")]
impl RecognitionEngine for WhisperRecognizer {
    fn transcribe(&self, samples: &[i16], language: Option<&str>) -> Result<Recognition> {
        let audio_f32 = convert_audio(samples);

        let context = self
            .context
            .lock()
            .map_err(|e| PredikaError::Recognition {
                message: format!("context lock poisoned: {}", e),
            })?;
        let mut state = context.create_state().map_err(|e| PredikaError::Recognition {
            message: format!("failed to create state: {}", e),
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(language);
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| PredikaError::Recognition {
                message: format!("inference failed: {}", e),
            })?;

        let lang_id = state.full_lang_id_from_state();
        let detected = whisper_rs::get_lang_str(lang_id).map(|s| s.to_string());

        let mut text = String::new();
        let mut confidence_sum = 0.0_f32;
        let mut segment_count = 0u32;
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
            confidence_sum += 1.0 - segment.no_speech_probability();
            segment_count += 1;
        }
        let confidence = if segment_count > 0 {
            (confidence_sum / segment_count as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(Recognition {
            text: text.trim().to_string(),
            language: detected,
            language_confidence: Some(confidence),
        })
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperRecognizer {
    /// Stub constructor; the engine errors on first use.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        Ok(Self { config })
    }
}

#[cfg(not(feature = "whisper"))]
impl RecognitionEngine for WhisperRecognizer {
    fn transcribe(&self, _samples: &[i16], _language: Option<&str>) -> Result<Recognition> {
        Err(PredikaError::Recognition {
            message: concat!(
                "whisper feature not enabled; this binary was built without ",
                "speech recognition. Rebuild with: cargo build --features whisper ",
                "(requires cmake)"
            )
            .to_string(),
        })
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// Convert 16-bit PCM to the f32 [-1.0, 1.0] range Whisper expects.
pub fn convert_audio(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Default source language argument for the engine.
///
/// None means auto-detect; mirrors [`defaults::AUTO_LANGUAGE`].
pub fn language_argument(configured: &str) -> Option<&str> {
    if configured == defaults::AUTO_LANGUAGE {
        None
    } else {
        Some(configured)
    }
}
