//! Transcription stage.
//!
//! Synchronous adapter around the recognition engine with an enforced batch
//! size of one: real-time mode never batches, and no two transcriptions of
//! the same utterance can exist. Inference blocks a thread, so the async
//! path bridges through `spawn_blocking`.

use crate::audio::gate::calculate_rms;
use crate::error::{PredikaError, Result};
use crate::providers::{Recognition, RecognitionEngine};
use crate::segment::utterance::Utterance;
use std::sync::Arc;
use tracing::debug;

/// Minimum RMS energy for an utterance to be worth transcribing.
///
/// Anything below is silence that slipped through segmentation; skip the
/// engine entirely.
const MIN_ENERGY_FOR_TRANSCRIPTION: f32 = 0.0005;

/// Adapter submitting one utterance at a time to the recognition engine.
pub struct TranscriptionStage<R: RecognitionEngine> {
    engine: Arc<R>,
    /// Source language code, or None for auto-detection.
    language: Option<String>,
}

impl<R: RecognitionEngine + 'static> TranscriptionStage<R> {
    pub fn new(engine: R, language: Option<String>) -> Self {
        Self {
            engine: Arc::new(engine),
            language,
        }
    }

    pub fn from_arc(engine: Arc<R>, language: Option<String>) -> Self {
        Self { engine, language }
    }

    /// Transcribes one utterance.
    ///
    /// Returns `Ok(None)` when the audio carries nothing transcribable
    /// (pure silence, empty result). Errors are terminal for the utterance:
    /// the caller logs, marks it failed and moves on; a retry would delay
    /// every following utterance more than a live audience can tolerate.
    pub fn transcribe(&self, utterance: &Utterance) -> Result<Option<Recognition>> {
        let energy = calculate_rms(&utterance.samples);
        if energy < MIN_ENERGY_FOR_TRANSCRIPTION {
            debug!(
                id = utterance.id,
                energy, "utterance energy too low, skipping"
            );
            return Ok(None);
        }

        let recognition = self
            .engine
            .transcribe(&utterance.samples, self.language.as_deref())?;

        if recognition.text.trim().is_empty() {
            debug!(id = utterance.id, "empty transcription, skipping");
            return Ok(None);
        }

        debug!(id = utterance.id, "transcription: {}", recognition.text);
        Ok(Some(recognition))
    }

    /// Transcribes one utterance on the blocking thread pool.
    pub async fn transcribe_async(&self, utterance: Utterance) -> Result<Option<Recognition>> {
        let engine = self.engine.clone();
        let language = self.language.clone();

        let result = tokio::task::spawn_blocking(move || {
            let energy = calculate_rms(&utterance.samples);
            if energy < MIN_ENERGY_FOR_TRANSCRIPTION {
                return Ok(None);
            }
            engine
                .transcribe(&utterance.samples, language.as_deref())
                .map(Some)
        })
        .await
        .map_err(|e| PredikaError::Recognition {
            message: format!("transcription task panicked: {}", e),
        })??;

        Ok(result.filter(|r| !r.text.trim().is_empty()))
    }

    /// Returns true if the engine is ready for audio.
    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockRecognizer;
    use crate::segment::utterance::UtteranceState;

    fn make_utterance(id: u64, samples: Vec<i16>) -> Utterance {
        let end = samples.len() as u64;
        Utterance {
            id,
            start_sample: 0,
            end_sample: end,
            overlap_start: 0,
            started_at_ms: 0,
            ended_at_ms: end * 1000 / 16000,
            forced: false,
            samples,
            state: UtteranceState::Finalized,
        }
    }

    #[test]
    fn test_transcribe_returns_recognition() {
        let stage = TranscriptionStage::new(
            MockRecognizer::new().with_response("thus says the preacher"),
            None,
        );

        let utterance = make_utterance(0, vec![3000i16; 16000]);
        let result = stage.transcribe(&utterance).unwrap().unwrap();
        assert_eq!(result.text, "thus says the preacher");
    }

    #[test]
    fn test_silent_utterance_skips_engine() {
        // An engine configured to fail proves it was never invoked.
        let stage = TranscriptionStage::new(MockRecognizer::new().with_failure(), None);

        let utterance = make_utterance(0, vec![0i16; 16000]);
        assert!(stage.transcribe(&utterance).unwrap().is_none());
    }

    #[test]
    fn test_empty_transcription_is_skipped() {
        let stage = TranscriptionStage::new(MockRecognizer::new().with_response("   "), None);

        let utterance = make_utterance(0, vec![3000i16; 16000]);
        assert!(stage.transcribe(&utterance).unwrap().is_none());
    }

    #[test]
    fn test_engine_failure_propagates() {
        let stage = TranscriptionStage::new(MockRecognizer::new().with_failure(), None);

        let utterance = make_utterance(0, vec![3000i16; 16000]);
        assert!(stage.transcribe(&utterance).is_err());
    }

    #[tokio::test]
    async fn test_transcribe_async() {
        let stage = TranscriptionStage::new(
            MockRecognizer::new().with_response("async transcript"),
            Some("en".to_string()),
        );

        let utterance = make_utterance(5, vec![3000i16; 16000]);
        let result = stage.transcribe_async(utterance).await.unwrap().unwrap();
        assert_eq!(result.text, "async transcript");
    }

    #[tokio::test]
    async fn test_transcribe_async_silent_skips() {
        let stage = TranscriptionStage::new(MockRecognizer::new().with_failure(), None);

        let utterance = make_utterance(5, vec![0i16; 16000]);
        assert!(stage.transcribe_async(utterance).await.unwrap().is_none());
    }
}
