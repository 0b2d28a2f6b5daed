//! Client-facing framing of relay events
//!
//! SSE frames look like:
//! ```text
//! data: {"response":"Hello","done":false}
//!
//! data: [DONE]
//!
//! ```
//! Pass-through mode writes one JSON object per line instead and relies on
//! the connection closing to mark the end.

use bytes::Bytes;
use futures::stream::Stream;
use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::reframer::RecordStream;
use super::types::{
    DONE_SENTINEL, ERROR_EVENT, ErrorPayload, FrameMode, GenerationChunk, RelayEvent,
    UpstreamRecord,
};

/// Encodes relay events into wire frames
#[derive(Debug, Clone, Copy)]
pub struct EventEncoder {
    mode: FrameMode,
}

impl EventEncoder {
    pub fn new(mode: FrameMode) -> Self {
        Self { mode }
    }

    /// Encode one event, or `None` when the event produces no frame
    ///
    /// Heartbeat records (empty, non-final) and the NDJSON end of stream
    /// produce nothing.
    pub fn encode(&self, event: &RelayEvent) -> Option<Bytes> {
        match event {
            RelayEvent::Data(chunk) => self.encode_chunk(chunk),
            RelayEvent::Error(message) => self.encode_error(message),
            RelayEvent::Done => match self.mode {
                FrameMode::Sse => Some(Bytes::from(format!("data: {DONE_SENTINEL}\n\n"))),
                FrameMode::Ndjson => None,
            },
        }
    }

    fn encode_chunk(&self, chunk: &GenerationChunk) -> Option<Bytes> {
        if chunk.is_empty_heartbeat() {
            return None;
        }

        let json = match serde_json::to_string(chunk) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode generation chunk");
                return None;
            }
        };

        Some(self.frame(None, &json))
    }

    fn encode_error(&self, message: &str) -> Option<Bytes> {
        let payload = ErrorPayload {
            error: message.to_string(),
        };
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode error frame");
                return None;
            }
        };

        Some(self.frame(Some(ERROR_EVENT), &json))
    }

    fn frame(&self, event: Option<&str>, json: &str) -> Bytes {
        match (self.mode, event) {
            (FrameMode::Sse, Some(name)) => Bytes::from(format!("event: {name}\ndata: {json}\n\n")),
            (FrameMode::Sse, None) => Bytes::from(format!("data: {json}\n\n")),
            (FrameMode::Ndjson, _) => Bytes::from(format!("{json}\n")),
        }
    }
}

/// Body stream that relays one upstream generation to one client
///
/// Each poll pulls at most as many upstream chunks as needed to produce the
/// next frame, so nothing is buffered beyond the reframer's carry-over.
/// An upstream transport error or in-band failure becomes a single error
/// frame, after which the upstream is dropped. Dropping this stream (for
/// example when the client disconnects) drops the upstream connection too.
pub struct RelayStream<S> {
    records: Option<RecordStream<S>>,
    encoder: EventEncoder,
    forwarded: usize,
}

impl<S> RelayStream<S> {
    pub fn new(upstream: S, mode: FrameMode) -> Self {
        Self {
            records: Some(RecordStream::new(upstream)),
            encoder: EventEncoder::new(mode),
            forwarded: 0,
        }
    }

    fn terminate(&mut self, event: RelayEvent) -> Option<Bytes> {
        if let Some(records) = self.records.take() {
            tracing::debug!(
                forwarded = self.forwarded,
                malformed = records.malformed_count(),
                "Upstream stream closed"
            );
        }
        self.encoder.encode(&event)
    }
}

impl<S, E> Stream for RelayStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            let Some(records) = this.records.as_mut() else {
                return Poll::Ready(None);
            };

            let frame = match Pin::new(records).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(UpstreamRecord::Chunk(chunk)))) => {
                    match this.encoder.encode(&RelayEvent::Data(chunk)) {
                        Some(frame) => {
                            this.forwarded += 1;
                            frame
                        }
                        None => continue,
                    }
                }
                Poll::Ready(Some(Ok(UpstreamRecord::Failure(failure)))) => {
                    tracing::warn!(error = %failure.error, "Upstream reported a generation failure");
                    match this.terminate(RelayEvent::Error(failure.error)) {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::error!(error = %e, "Upstream stream failed");
                    match this.terminate(RelayEvent::Error(format!("Upstream stream failed: {e}"))) {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
                Poll::Ready(None) => match this.terminate(RelayEvent::Done) {
                    Some(frame) => frame,
                    None => continue,
                },
            };

            return Poll::Ready(Some(Ok(frame)));
        }
    }
}
