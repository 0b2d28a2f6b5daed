//! Wire records shared by the relay and its clients
//!
//! Upstream lines decode into [`UpstreamRecord`], the relay sends
//! [`RelayEvent`]s downstream, and clients turn frames back into
//! [`DecodedFrame`]s.

use serde::{Deserialize, Serialize};

/// Terminal sentinel payload of an SSE stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Field prefix of an SSE data line
pub const DATA_PREFIX: &str = "data:";

/// Field prefix of an SSE event-name line
pub const EVENT_PREFIX: &str = "event:";

/// Event name used for inline error frames
pub const ERROR_EVENT: &str = "error";

/// Which framing the client reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// `data: <json>\n\n` frames terminated by `data: [DONE]`
    #[default]
    Sse,
    /// One JSON object per line; the transport closing ends the stream
    Ndjson,
}

impl FrameMode {
    /// Content type announced for a response body in this mode
    pub fn content_type(&self) -> &'static str {
        match self {
            FrameMode::Sse => "text/event-stream",
            FrameMode::Ndjson => "application/x-ndjson",
        }
    }
}

/// One decoded record of the upstream token stream
///
/// Only `response` is required. The metadata fields are carried along
/// when present so downstream consumers see the same stable shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationChunk {
    /// Model that produced the fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Upstream timestamp, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Text fragment; may be empty for metadata-only records
    #[serde(rename = "response")]
    pub text: String,
    /// Set on the last record of a generation
    #[serde(rename = "done", default)]
    pub is_final: bool,
    /// Why generation stopped, on the final record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
}

impl GenerationChunk {
    /// A bare fragment with no metadata
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A bare final record with an empty fragment
    pub fn finished() -> Self {
        Self {
            is_final: true,
            ..Default::default()
        }
    }

    /// Heartbeat or metadata-only record that carries nothing to render
    pub fn is_empty_heartbeat(&self) -> bool {
        self.text.is_empty() && !self.is_final
    }
}

/// Error body used both by upstream failure lines and relay error frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// A decoded upstream line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamRecord {
    /// A generation record with a text fragment
    Chunk(GenerationChunk),
    /// The upstream reported a failure in-band
    Failure(ErrorPayload),
}

impl UpstreamRecord {
    /// Parse one line of upstream output
    pub fn parse(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }
}

/// The unit sent to a client
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A re-encoded generation record
    Data(GenerationChunk),
    /// The stream failed; no further data follows
    Error(String),
    /// Terminal sentinel
    Done,
}

/// A frame reconstructed by a client from the relay stream
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// A generation record
    Chunk(GenerationChunk),
    /// An inline error reported by the relay
    Failure(String),
    /// Terminal sentinel
    Done,
    /// A frame whose payload could not be decoded
    Malformed { payload: String, reason: String },
}
