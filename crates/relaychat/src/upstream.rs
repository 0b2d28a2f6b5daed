//! HTTP client for the Ollama-style generation service
//!
//! The relay makes exactly one upstream request per inbound request:
//! `POST /api/generate` for generations and `GET /api/tags` for the model
//! list. Streaming bodies are handed back as a byte stream without reading
//! them, so the caller controls how far the upstream is consumed.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{RelayError, Result};
use crate::stream::ErrorPayload;

const GENERATE_PATH: &str = "api/generate";
const TAGS_PATH: &str = "api/tags";

/// Longest upstream error body quoted back to clients
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Failures talking to the upstream service
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Connection refused, DNS failure, timeout before a response
    #[error("{0}")]
    Unreachable(String),

    /// The upstream answered with a non-success status
    #[error("Upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response started but its body could not be read
    #[error("Failed to read upstream response: {0}")]
    Body(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Unreachable(format!("Upstream request timed out: {e}"))
        } else if e.is_connect() {
            UpstreamError::Unreachable(format!("Failed to connect to upstream: {e}"))
        } else {
            UpstreamError::Unreachable(format!("Upstream request failed: {e}"))
        }
    }
}

/// Body of a generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

/// A fully read upstream response
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Raw upstream body chunks, in arrival order
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>;

/// Client for one configured generation service
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    generate_url: Url,
    tags_url: Url,
    default_model: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| RelayError::Config(format!("Invalid upstream base URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let generate_url = base
            .join(GENERATE_PATH)
            .map_err(|e| RelayError::Config(format!("Invalid upstream base URL: {e}")))?;
        let tags_url = base
            .join(TAGS_PATH)
            .map_err(|e| RelayError::Config(format!("Invalid upstream base URL: {e}")))?;

        // No overall timeout on the client itself: it would cut long streams
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| RelayError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            generate_url,
            tags_url,
            default_model: config.default_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Build a generation request, falling back to the default model
    pub fn request(&self, prompt: &str, model: Option<&str>, stream: bool) -> GenerateRequest {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);

        GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream,
        }
    }

    /// Run a non-streaming generation and read the whole response
    pub async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<UpstreamReply, UpstreamError> {
        let response = self
            .client
            .post(self.generate_url.clone())
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;

        read_reply(check_status(response).await?).await
    }

    /// Start a streaming generation
    ///
    /// Resolves once the upstream has answered with a success status; the
    /// body has not been read yet. Dropping the returned stream closes the
    /// upstream connection.
    pub async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<ByteStream, UpstreamError> {
        let response = self
            .client
            .post(self.generate_url.clone())
            .json(request)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.bytes_stream().boxed())
    }

    /// Fetch the upstream model list
    pub async fn list_models(&self) -> std::result::Result<UpstreamReply, UpstreamError> {
        let response = self
            .client
            .get(self.tags_url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        read_reply(check_status(response).await?).await
    }
}

async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

async fn read_reply(
    response: reqwest::Response,
) -> std::result::Result<UpstreamReply, UpstreamError> {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response
        .bytes()
        .await
        .map_err(|e| UpstreamError::Body(e.to_string()))?;

    Ok(UpstreamReply { content_type, body })
}

/// Pull a readable message out of an upstream error body
fn error_message(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) {
        return payload.error;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> UpstreamConfig {
        UpstreamConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_urls_join_onto_base() {
        let client = UpstreamClient::new(&config("http://127.0.0.1:11434")).unwrap();
        assert_eq!(
            client.generate_url.as_str(),
            "http://127.0.0.1:11434/api/generate"
        );
        assert_eq!(client.tags_url.as_str(), "http://127.0.0.1:11434/api/tags");
    }

    #[test]
    fn test_base_path_is_kept() {
        let client = UpstreamClient::new(&config("http://gateway.local/ollama")).unwrap();
        assert_eq!(
            client.generate_url.as_str(),
            "http://gateway.local/ollama/api/generate"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = UpstreamClient::new(&config("not a url")).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_request_falls_back_to_default_model() {
        let client = UpstreamClient::new(&config("http://127.0.0.1:11434")).unwrap();

        let request = client.request("hi", None, true);
        assert_eq!(request.model, "qwen2.5:0.5b");
        assert!(request.stream);

        let request = client.request("hi", Some("  "), false);
        assert_eq!(request.model, "qwen2.5:0.5b");

        let request = client.request("hi", Some("llama3"), false);
        assert_eq!(request.model, "llama3");
    }

    #[test]
    fn test_generate_request_wire_shape() {
        let request = GenerateRequest {
            model: "m".to_string(),
            prompt: "p".to_string(),
            stream: true,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"model":"m","prompt":"p","stream":true}"#
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error":"model 'x' not found"}"#), "model 'x' not found");
        assert_eq!(error_message("  bad gateway \n"), "bad gateway");
        assert_eq!(error_message(""), "empty response body");
        assert_eq!(error_message(&"x".repeat(500)).len(), MAX_ERROR_BODY_CHARS);
    }
}
