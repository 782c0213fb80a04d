//! Ollama-compatible translation provider.
//!
//! Posts a bare translation prompt to `/api/generate` and sanitizes the
//! reply: models love to add quotes and follow-up chatter, so only the first
//! line survives, with surrounding quotes stripped.

use super::{ProviderError, TranslationProvider};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Translation through an Ollama server.
pub struct OllamaTranslator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

impl OllamaTranslator {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Lists model names available on the server, sorted.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let tags: TagsResponse = response.json().await.map_err(classify_reqwest_error)?;
        let mut names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        names.sort();
        Ok(names)
    }

    fn build_prompt(text: &str, source_language: &str, target_language: &str) -> String {
        format!(
            "\nTranslate the following text from {source} to {target}. \
             Provide only the translation, without any explanations or extra text.\n\n\
             {source}: {text}\n{target}:\n",
            source = source_language,
            target = target_language,
            text = text,
        )
    }

    fn sanitize(raw: &str) -> String {
        let first_line = raw.trim().lines().next().unwrap_or("").trim();
        let stripped = first_line
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(first_line);
        stripped.to_string()
    }
}

#[async_trait]
impl TranslationProvider for OllamaTranslator {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, ProviderError> {
        debug!(
            source = source_language,
            target = target_language,
            model = %self.model,
            "translating: '{}'",
            text
        );

        let payload = json!({
            "model": self.model,
            "prompt": Self::build_prompt(text, source_language, target_language),
            "stream": false,
            // Keep the model resident between utterances.
            "keep_alive": "60m",
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                message: format!("status {}", status.as_u16()),
            });
        }

        let body: GenerateResponse = response.json().await.map_err(classify_reqwest_error)?;
        let translation = Self::sanitize(&body.response);
        if translation.is_empty() {
            return Err(ProviderError::EmptyResult);
        }

        info!("translation: {}", translation);
        Ok(translation)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_connect() {
        ProviderError::Connection {
            message: e.to_string(),
        }
    } else {
        ProviderError::Rejected {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_names_both_languages() {
        let prompt = OllamaTranslator::build_prompt("God is love", "English", "Spanish");
        assert!(prompt.contains("from English to Spanish"));
        assert!(prompt.contains("English: God is love"));
        assert!(prompt.ends_with("Spanish:\n"));
    }

    #[test]
    fn test_sanitize_takes_first_line() {
        assert_eq!(
            OllamaTranslator::sanitize("Dios es amor\n\nNote: this is literal."),
            "Dios es amor"
        );
    }

    #[test]
    fn test_sanitize_strips_surrounding_quotes() {
        assert_eq!(OllamaTranslator::sanitize("\"Dios es amor\""), "Dios es amor");
        // A lone quote is not a pair; leave it.
        assert_eq!(OllamaTranslator::sanitize("\"Dios es amor"), "\"Dios es amor");
    }

    #[test]
    fn test_sanitize_empty_reply() {
        assert_eq!(OllamaTranslator::sanitize("   \n  "), "");
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let translator = OllamaTranslator::new("http://localhost:11434/", "llama3.2");
        assert_eq!(translator.base_url, "http://localhost:11434");
    }
}
