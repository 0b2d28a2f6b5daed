//! HTTP client for the relay server

use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use relaychat::relay::CLIENT_ID_HEADER;
use relaychat::stream::{FrameMode, StreamOutcome, decode_stream};

use crate::error::{CliError, CliResult};

/// Rejection body returned with 429
#[derive(Debug, Deserialize)]
struct RateLimitBody {
    error: String,
    #[serde(rename = "retryAfter")]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// One entry of the upstream model list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

pub struct RelayClient {
    http: reqwest::Client,
    base_url: Url,
    identity: Option<String>,
}

impl RelayClient {
    pub fn new(server_url: &str) -> CliResult<Self> {
        let base_url = Url::parse(server_url)
            .map_err(|e| format!("Invalid server URL '{server_url}': {e}"))?;

        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url,
            identity: None,
        })
    }

    /// Send requests as `identity` so the relay counts them against it
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    fn url(&self, path: &str) -> CliResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| format!("Invalid request path {path}: {e}").into())
    }

    fn post(&self, path: &str) -> CliResult<reqwest::RequestBuilder> {
        let mut request = self.http.post(self.url(path)?);
        if let Some(identity) = &self.identity {
            request = request.header(CLIENT_ID_HEADER, identity);
        }
        Ok(request)
    }

    /// Stream a reply over SSE, calling `on_fragment(fragment, text_so_far)` as it arrives
    pub async fn stream_chat<F>(
        &self,
        message: &str,
        model: Option<&str>,
        on_fragment: F,
    ) -> CliResult<StreamOutcome>
    where
        F: FnMut(&str, &str),
    {
        let body = chat_body(message, model);
        let response = self.post("/api/stream")?.json(&body).send().await?;
        let response = check_response(response).await?;

        tracing::debug!(status = %response.status(), "Relay stream opened");
        let outcome = decode_stream(response.bytes_stream().boxed(), FrameMode::Sse, on_fragment).await;

        if outcome.malformed > 0 {
            tracing::warn!(malformed = outcome.malformed, "Some stream frames could not be decoded");
        }
        Ok(outcome)
    }

    /// One-shot generation; returns the reply text
    pub async fn chat(&self, message: &str, model: Option<&str>) -> CliResult<String> {
        let body = chat_body(message, model);
        let response = self.post("/api/chat")?.json(&body).send().await?;
        let value: Value = check_response(response).await?.json().await?;

        value
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CliError::from("Relay reply has no `response` field"))
    }

    pub async fn list_models(&self) -> CliResult<Vec<ModelInfo>> {
        let mut request = self.http.get(self.url("/api/models")?);
        if let Some(identity) = &self.identity {
            request = request.header(CLIENT_ID_HEADER, identity);
        }

        let list: ModelList = check_response(request.send().await?).await?.json().await?;
        Ok(list.models)
    }

    /// True when the relay answers its health check
    pub async fn health(&self) -> bool {
        let Ok(url) = self.url("/health") else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}

fn chat_body(message: &str, model: Option<&str>) -> Value {
    let mut body = serde_json::json!({ "message": message });
    if let Some(model) = model {
        body["model"] = Value::from(model);
    }
    body
}

/// Turn relay error responses into readable errors
async fn check_response(response: reqwest::Response) -> CliResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let message = match serde_json::from_str::<RateLimitBody>(&text) {
            Ok(RateLimitBody {
                error,
                retry_after: Some(secs),
            }) => format!("{error} Retry in {secs}s."),
            Ok(RateLimitBody { error, .. }) => error,
            Err(_) => "Too many requests. Please try again later.".to_string(),
        };
        return Err(CliError(message));
    }

    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(CliError(format!("Relay returned {status}: {message}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body() {
        assert_eq!(
            chat_body("hi", None),
            serde_json::json!({"message": "hi"})
        );
        assert_eq!(
            chat_body("hi", Some("llama3")),
            serde_json::json!({"message": "hi", "model": "llama3"})
        );
    }

    #[test]
    fn test_invalid_server_url() {
        assert!(RelayClient::new("not a url").is_err());
    }

    #[test]
    fn test_urls_resolve_against_base() {
        let client = RelayClient::new("http://127.0.0.1:3000").unwrap();
        assert_eq!(
            client.url("/api/stream").unwrap().as_str(),
            "http://127.0.0.1:3000/api/stream"
        );
    }
}
