//! Synthesis stage.
//!
//! Fire-and-forget: every completed translation spawns an independent task
//! that asks the synthesis provider for audio, writes the bytes next to the
//! listener endpoint, and attaches the reference to the broadcast snapshot.
//! Nothing upstream ever waits on it: a slow or failing TTS server costs
//! the audience the voice, never the text.

use crate::broadcast::state::ListenerBroadcastState;
use crate::output::synchronizer::OutputEvent;
use crate::pipeline::dispatch::TranslationJob;
use crate::providers::SynthesisProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawns one synthesis task per completed translation job.
pub struct SynthesisStage {
    provider: Arc<dyn SynthesisProvider>,
    voice: String,
    audio_dir: PathBuf,
    broadcast: Arc<ListenerBroadcastState>,
    output_tx: mpsc::Sender<OutputEvent>,
}

impl SynthesisStage {
    pub fn new(
        provider: Arc<dyn SynthesisProvider>,
        voice: &str,
        audio_dir: PathBuf,
        broadcast: Arc<ListenerBroadcastState>,
        output_tx: mpsc::Sender<OutputEvent>,
    ) -> Self {
        Self {
            provider,
            voice: voice.to_string(),
            audio_dir,
            broadcast,
            output_tx,
        }
    }

    /// Spawns synthesis for one completed job and returns immediately.
    ///
    /// The handle is only used by tests and the shutdown drain; dropping it
    /// detaches the task.
    pub fn spawn(&self, job: &TranslationJob) -> JoinHandle<()> {
        let provider = self.provider.clone();
        let voice = self.voice.clone();
        let audio_dir = self.audio_dir.clone();
        let broadcast = self.broadcast.clone();
        let output_tx = self.output_tx.clone();

        let utterance_id = job.utterance_id;
        let sequence = job.sequence;
        let text = job.result.clone().unwrap_or_default();

        tokio::spawn(async move {
            if text.is_empty() {
                return;
            }

            let bytes = match provider.synthesize(&text, &voice).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Text-only degradation: the line is already displayed.
                    warn!(utterance_id, "synthesis failed, text-only output: {}", e);
                    return;
                }
            };

            let file_name = format!("utterance_{}.mp3", utterance_id);
            let path = audio_dir.join(&file_name);
            if let Err(e) = tokio::fs::write(&path, &bytes).await {
                warn!(utterance_id, "could not store synthesized audio: {}", e);
                return;
            }

            let audio_ref = format!("/audio/{}", file_name);
            if !broadcast.attach_audio(sequence, audio_ref.clone()) {
                // Listeners have moved on to a newer line; the file stays
                // available but is not announced.
                debug!(utterance_id, "snapshot advanced past this line");
            }

            let _ = output_tx
                .send(OutputEvent::Audio {
                    utterance_id,
                    audio_ref,
                })
                .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dispatch::JobStatus;
    use crate::providers::MockSynthesizer;
    use std::time::SystemTime;

    fn completed_job(utterance_id: u64, sequence: u64, text: &str) -> TranslationJob {
        TranslationJob {
            utterance_id,
            sequence,
            source_text: "source".to_string(),
            target_language: "Spanish".to_string(),
            status: JobStatus::Done,
            result: Some(text.to_string()),
            enqueued_at: SystemTime::now(),
            completed_at: Some(SystemTime::now()),
        }
    }

    fn make_stage(
        provider: MockSynthesizer,
        audio_dir: PathBuf,
        broadcast: Arc<ListenerBroadcastState>,
    ) -> (SynthesisStage, mpsc::Receiver<OutputEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let stage = SynthesisStage::new(Arc::new(provider), "af_heart", audio_dir, broadcast, tx);
        (stage, rx)
    }

    #[tokio::test]
    async fn test_success_writes_audio_and_attaches_reference() {
        let dir = tempfile::tempdir().unwrap();
        let broadcast = Arc::new(ListenerBroadcastState::new());
        broadcast.publish(5, "la palabra".to_string(), None);

        let (stage, mut rx) = make_stage(
            MockSynthesizer::new().with_audio(b"mp3!".to_vec()),
            dir.path().to_path_buf(),
            broadcast.clone(),
        );

        stage.spawn(&completed_job(4, 5, "la palabra")).await.unwrap();

        let written = std::fs::read(dir.path().join("utterance_4.mp3")).unwrap();
        assert_eq!(written, b"mp3!");
        assert_eq!(
            broadcast.snapshot().audio_ref.as_deref(),
            Some("/audio/utterance_4.mp3")
        );

        match rx.recv().await.unwrap() {
            OutputEvent::Audio {
                utterance_id,
                audio_ref,
            } => {
                assert_eq!(utterance_id, 4);
                assert_eq!(audio_ref, "/audio/utterance_4.mp3");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_degrades_to_text_only() {
        let dir = tempfile::tempdir().unwrap();
        let broadcast = Arc::new(ListenerBroadcastState::new());
        broadcast.publish(5, "la palabra".to_string(), None);

        let (stage, mut rx) = make_stage(
            MockSynthesizer::new().with_failure(),
            dir.path().to_path_buf(),
            broadcast.clone(),
        );

        stage.spawn(&completed_job(4, 5, "la palabra")).await.unwrap();

        // No audio reference, no playback event, snapshot text untouched.
        assert!(broadcast.snapshot().audio_ref.is_none());
        assert_eq!(broadcast.snapshot().text, "la palabra");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_superseded_line_keeps_file_but_not_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let broadcast = Arc::new(ListenerBroadcastState::new());
        broadcast.publish(5, "old line".to_string(), None);
        broadcast.publish(6, "new line".to_string(), None);

        let (stage, _rx) = make_stage(
            MockSynthesizer::new(),
            dir.path().to_path_buf(),
            broadcast.clone(),
        );

        stage.spawn(&completed_job(4, 5, "old line")).await.unwrap();

        assert!(dir.path().join("utterance_4.mp3").exists());
        assert!(broadcast.snapshot().audio_ref.is_none());
    }

    #[tokio::test]
    async fn test_spawn_returns_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let broadcast = Arc::new(ListenerBroadcastState::new());
        let (stage, _rx) = make_stage(
            MockSynthesizer::new(),
            dir.path().to_path_buf(),
            broadcast,
        );

        // spawn is synchronous and non-blocking; the handle resolves later.
        let handle = stage.spawn(&completed_job(0, 1, "text"));
        handle.await.unwrap();
    }
}
