//! HTTP-facing errors
//!
//! Every failure the relay reports to a client is a flat JSON object with an
//! `error` field. Rate-limit rejections also carry `retryAfter` and a
//! `Retry-After` header.

use axum::{
    body::Body,
    http::{Response, StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::upstream::UpstreamError;

/// Errors returned to relay clients
#[derive(Error, Debug)]
pub enum ApiError {
    /// The identity has used up its window
    #[error("Too many requests. Please try again later.")]
    RateLimited { retry_after_secs: u64 },

    /// The request body was missing or invalid
    #[error("{0}")]
    Request(String),

    /// The upstream service failed before any output was sent
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Request(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "rate_limit",
            ApiError::Request(_) => "request",
            ApiError::Upstream(_) => "upstream",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let message = self.to_string();

        match &self {
            ApiError::Upstream(_) => {
                error!(error_type = self.category(), error = %message, "Upstream request failed")
            }
            _ => warn!(error_type = self.category(), error = %message, "Rejecting request"),
        }

        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json");

        let body = match self {
            ApiError::RateLimited { retry_after_secs } => {
                builder = builder.header(header::RETRY_AFTER, retry_after_secs.to_string());
                json!({ "error": message, "retryAfter": retry_after_secs })
            }
            _ => json!({ "error": message }),
        };

        builder
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(Body::empty());
                *fallback.status_mut() = status;
                fallback
            })
    }
}
