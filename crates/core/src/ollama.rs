//! Minimal async client for the local Ollama HTTP API.
//!
//! Only the two endpoints the auditor needs are wrapped: `/api/embed` for
//! batch embeddings and `/api/generate` for a single non-streamed completion.

use crate::error::CapabilityError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const BACKEND: &str = "ollama";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: Client,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            seed: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, CapabilityError> {
        let parsed = Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn default_local() -> Result<Self, CapabilityError> {
        Self::new(DEFAULT_OLLAMA_URL, DEFAULT_TIMEOUT_SECS)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn embed(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest { model, input })
            .send()
            .await
            .map_err(|error| self.request_error(error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("embed returned {status}: {body}"),
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embeddings.len() != input.len() {
            return Err(CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!(
                    "embed returned {} vectors for {} inputs",
                    parsed.embeddings.len(),
                    input.len()
                ),
            });
        }

        Ok(parsed.embeddings)
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<String, CapabilityError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
                options,
            })
            .send()
            .await
            .map_err(|error| self.request_error(error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("generate returned {status}: {body}"),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed.response)
    }

    fn request_error(&self, error: reqwest::Error) -> CapabilityError {
        if error.is_timeout() {
            CapabilityError::Request(format!(
                "request to {} timed out after {}s",
                self.base_url, self.timeout_secs
            ))
        } else if error.is_connect() {
            CapabilityError::Request(format!("cannot connect to ollama at {}", self.base_url))
        } else {
            CapabilityError::Http(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_trims_trailing_slash() -> Result<(), CapabilityError> {
        let client = OllamaClient::new("http://localhost:11434/", 5)?;
        assert_eq!(client.base_url(), "http://localhost:11434");
        Ok(())
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(
            OllamaClient::new("not a url", 5),
            Err(CapabilityError::Url(_))
        ));
    }

    #[test]
    fn generate_request_is_deterministic_and_unstreamed() -> Result<(), serde_json::Error> {
        let request = GenerateRequest {
            model: "llama3.2",
            prompt: "compare",
            stream: false,
            options: GenerateOptions::default(),
        };
        let value = serde_json::to_value(&request)?;
        assert_eq!(value["stream"], json!(false));
        assert_eq!(value["options"]["temperature"], json!(0.0));
        Ok(())
    }

    #[test]
    fn embed_response_parses_batch() -> Result<(), serde_json::Error> {
        let parsed: EmbedResponse = serde_json::from_value(json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.1, 0.2], [0.3, 0.4]]
        }))?;
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1], vec![0.3, 0.4]);
        Ok(())
    }

    #[test]
    fn generate_response_tolerates_missing_text() -> Result<(), serde_json::Error> {
        let parsed: GenerateResponse = serde_json::from_value(json!({ "done": true }))?;
        assert!(parsed.response.is_empty());
        Ok(())
    }
}
