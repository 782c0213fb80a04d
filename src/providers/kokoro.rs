//! OpenAI-compatible speech synthesis provider (Kokoro).

use super::{SynthesisError, SynthesisProvider};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Speech synthesis through an OpenAI-compatible `/audio/speech` endpoint.
pub struct KokoroSynthesizer {
    client: reqwest::Client,
    base_url: String,
}

impl KokoroSynthesizer {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SynthesisProvider for KokoroSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
        debug!(voice, "synthesizing: '{}'", text);

        let payload = json!({
            "model": "kokoro",
            "voice": voice,
            "response_format": "mp3",
            "input": text,
            "speed": 1.0,
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SynthesisError::Connection {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SynthesisError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SynthesisError::Rejected {
                message: format!("status {}", status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Connection {
                message: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}
