//! Client-side decoding of relay streams
//!
//! The inverse of [`super::encoder`]: rebuilds frames from byte chunks of any
//! size and folds their text fragments into a running response.

use bytes::BytesMut;
use futures::stream::{Stream, StreamExt};
use std::fmt::Display;

use super::reframer::LineReframer;
use super::types::{
    DATA_PREFIX, DONE_SENTINEL, DecodedFrame, ERROR_EVENT, EVENT_PREFIX, FrameMode,
    UpstreamRecord,
};

/// Incremental frame decoder with a carry-over buffer
#[derive(Debug)]
pub struct StreamDecoder {
    mode: FrameMode,
    events: BytesMut,
    /// Offset in `events` where the next boundary search starts
    scanned: usize,
    lines: LineReframer,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            events: BytesMut::new(),
            scanned: 0,
            lines: LineReframer::new(),
            finished: false,
        }
    }

    /// True once the terminal sentinel has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one transport chunk and return the frames it completes
    ///
    /// After the SSE sentinel, input is still accepted (so the transport can
    /// be drained) but produces no frames.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodedFrame> {
        match self.mode {
            FrameMode::Sse => self.feed_sse(chunk),
            FrameMode::Ndjson => self
                .lines
                .push(chunk)
                .iter()
                .map(|line| decode_payload(&String::from_utf8_lossy(line), None))
                .collect(),
        }
    }

    /// Drop whatever incomplete frame is left, returning its length in bytes
    pub fn finish(&mut self) -> usize {
        let leftover = self.events.len() + self.lines.discard();
        self.events.clear();
        self.scanned = 0;
        leftover
    }

    fn feed_sse(&mut self, chunk: &[u8]) -> Vec<DecodedFrame> {
        if self.finished {
            return Vec::new();
        }

        self.events.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some((end, next)) = find_event_end(&self.events, self.scanned) {
            self.scanned = 0;
            let block = self.events.split_to(next);
            let block = String::from_utf8_lossy(&block[..end]);

            if let Some(frame) = decode_sse_block(&block) {
                let done = frame == DecodedFrame::Done;
                frames.push(frame);
                if done {
                    self.finished = true;
                    self.events.clear();
                    return frames;
                }
            }
        }
        // A terminator in the last two bytes may still pair with the next chunk
        self.scanned = self.events.len().saturating_sub(2);

        frames
    }
}

/// Find the blank line ending the first event, searching from `from`
///
/// Returns the end of the event text and the start of the next event.
/// Both `\n\n` and `\r\n\r\n` end an event.
fn find_event_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while let Some(offset) = buf.get(i..)?.iter().position(|&b| b == b'\n') {
        let pos = i + offset;
        match &buf[pos + 1..] {
            [b'\n', ..] => return Some((pos, pos + 2)),
            [b'\r', b'\n', ..] => return Some((pos, pos + 3)),
            _ => i = pos + 1,
        }
    }
    None
}

/// Decode one SSE event block; blocks without a data line (comments,
/// keep-alives) yield nothing
fn decode_sse_block(block: &str) -> Option<DecodedFrame> {
    let mut event_name = None;
    let mut data = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            event_name = Some(name.trim());
        } else if data.is_none() {
            if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
                data = Some(payload.trim());
            }
        }
    }

    let payload = data?;
    if payload == DONE_SENTINEL {
        return Some(DecodedFrame::Done);
    }

    Some(decode_payload(payload, event_name))
}

fn decode_payload(payload: &str, event_name: Option<&str>) -> DecodedFrame {
    match serde_json::from_str::<UpstreamRecord>(payload) {
        Ok(UpstreamRecord::Failure(failure)) => DecodedFrame::Failure(failure.error),
        Ok(UpstreamRecord::Chunk(_)) if event_name == Some(ERROR_EVENT) => DecodedFrame::Malformed {
            payload: payload.to_string(),
            reason: "error event without an error payload".to_string(),
        },
        Ok(UpstreamRecord::Chunk(chunk)) => DecodedFrame::Chunk(chunk),
        Err(e) => DecodedFrame::Malformed {
            payload: payload.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Final state of a consumed relay stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    /// Everything accumulated, including text received before an error
    pub text: String,
    /// The stream reached its sentinel or a final record
    pub complete: bool,
    /// Relay-reported or transport failure
    pub error: Option<String>,
    /// Number of fragments appended
    pub fragments: usize,
    /// Frames skipped because they failed to decode
    pub malformed: usize,
}

/// Folds decoded frames into the response text
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    outcome: StreamOutcome,
    last_start: usize,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a frame; returns true when text was appended
    ///
    /// Frames arriving after completion or an error are ignored.
    pub fn apply(&mut self, frame: DecodedFrame) -> bool {
        if self.is_terminal() {
            return false;
        }

        match frame {
            DecodedFrame::Chunk(chunk) => {
                if chunk.is_final {
                    self.outcome.complete = true;
                }
                if chunk.text.is_empty() {
                    return false;
                }
                self.last_start = self.outcome.text.len();
                self.outcome.text.push_str(&chunk.text);
                self.outcome.fragments += 1;
                true
            }
            DecodedFrame::Done => {
                self.outcome.complete = true;
                false
            }
            DecodedFrame::Failure(message) => {
                self.outcome.error = Some(message);
                false
            }
            DecodedFrame::Malformed { payload, reason } => {
                tracing::warn!(%reason, %payload, "Skipping undecodable frame");
                self.outcome.malformed += 1;
                false
            }
        }
    }

    /// Record a transport failure, keeping the partial text
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.outcome.error.is_none() {
            self.outcome.error = Some(message.into());
        }
    }

    /// The fragment appended by the most recent successful `apply`
    pub fn last_fragment(&self) -> &str {
        &self.outcome.text[self.last_start..]
    }

    /// All text accumulated so far
    pub fn text(&self) -> &str {
        &self.outcome.text
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.error.is_some() || self.outcome.complete
    }

    pub fn into_outcome(self) -> StreamOutcome {
        self.outcome
    }
}

/// Drive a decoder over a byte stream until the transport closes
///
/// `on_fragment(fragment, accumulated)` runs after every append so the
/// caller can re-render incrementally. A transport error ends decoding and
/// is reported in the outcome alongside whatever text had arrived.
pub async fn decode_stream<S, B, E, F>(
    mut stream: S,
    mode: FrameMode,
    mut on_fragment: F,
) -> StreamOutcome
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&str, &str),
{
    let mut decoder = StreamDecoder::new(mode);
    let mut accumulator = ResponseAccumulator::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(bytes) => {
                for frame in decoder.feed(bytes.as_ref()) {
                    if accumulator.apply(frame) {
                        on_fragment(accumulator.last_fragment(), accumulator.text());
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Relay stream transport failed");
                accumulator.fail(e.to_string());
                break;
            }
        }
    }

    let leftover = decoder.finish();
    if leftover > 0 {
        tracing::debug!(bytes = leftover, "Discarding incomplete trailing frame");
    }

    accumulator.into_outcome()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::GenerationChunk;
    use bytes::Bytes;
    use futures::stream;

    #[test]
    fn test_sse_event_split_across_chunks() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);

        assert!(decoder.feed(b"data: {\"respon").is_empty());
        assert!(decoder.feed(b"se\":\"Hi\"}\n").is_empty());
        let frames = decoder.feed(b"\ndata: [DO");
        assert_eq!(frames, vec![DecodedFrame::Chunk(GenerationChunk::fragment("Hi"))]);

        let frames = decoder.feed(b"NE]\n\n");
        assert_eq!(frames, vec![DecodedFrame::Done]);
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_sse_ignores_events_after_sentinel() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        let frames = decoder.feed(b"data: [DONE]\n\ndata: {\"response\":\"late\"}\n\n");

        assert_eq!(frames, vec![DecodedFrame::Done]);
        assert!(decoder.feed(b"data: {\"response\":\"later\"}\n\n").is_empty());
    }

    #[test]
    fn test_sse_error_event() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        let frames = decoder.feed(b"event: error\ndata: {\"error\":\"upstream gone\"}\n\n");

        assert_eq!(frames, vec![DecodedFrame::Failure("upstream gone".to_string())]);
    }

    #[test]
    fn test_sse_comment_block_is_skipped() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        let frames = decoder.feed(b": keep-alive\n\ndata: {\"response\":\"x\"}\n\n");

        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_sse_malformed_payload_is_reported() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        let frames = decoder.feed(b"data: {broken\n\ndata: {\"response\":\"ok\"}\n\n");

        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], DecodedFrame::Malformed { payload, .. } if payload == "{broken"));
        assert_eq!(frames[1], DecodedFrame::Chunk(GenerationChunk::fragment("ok")));
    }

    #[test]
    fn test_sse_multibyte_character_split() {
        let encoded = "data: {\"response\":\"héllo\"}\n\n".as_bytes();
        // split inside the two-byte 'é'
        let split = encoded.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        assert!(decoder.feed(&encoded[..split]).is_empty());
        let frames = decoder.feed(&encoded[split..]);

        assert_eq!(frames, vec![DecodedFrame::Chunk(GenerationChunk::fragment("héllo"))]);
    }

    #[test]
    fn test_sse_crlf_delimited_events() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        let frames = decoder.feed(
            b"data: {\"response\":\"a\"}\r\n\r\nevent: error\r\ndata: {\"error\":\"gone\"}\r\n\r\n",
        );

        assert_eq!(
            frames,
            vec![
                DecodedFrame::Chunk(GenerationChunk::fragment("a")),
                DecodedFrame::Failure("gone".to_string()),
            ]
        );
    }

    #[test]
    fn test_sse_crlf_boundary_split_across_chunks() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);

        assert!(decoder.feed(b"data: {\"response\":\"a\"}\r\n").is_empty());
        assert!(decoder.feed(b"\r").is_empty());
        let frames = decoder.feed(b"\ndata: [DONE]\r\n\r\n");

        assert_eq!(
            frames,
            vec![
                DecodedFrame::Chunk(GenerationChunk::fragment("a")),
                DecodedFrame::Done,
            ]
        );
    }

    #[test]
    fn test_sse_long_event_in_small_chunks() {
        let text = "y".repeat(4096);
        let event = format!("data: {{\"response\":\"{text}\"}}\n\n");

        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        let mut frames = Vec::new();
        for piece in event.as_bytes().chunks(5) {
            frames.extend(decoder.feed(piece));
        }

        assert_eq!(frames, vec![DecodedFrame::Chunk(GenerationChunk::fragment(text))]);
        assert_eq!(decoder.finish(), 0);
    }

    #[test]
    fn test_ndjson_carry_over() {
        let mut decoder = StreamDecoder::new(FrameMode::Ndjson);

        let frames = decoder.feed(b"{\"response\":\"a\"}\n{\"response\":");
        assert_eq!(frames, vec![DecodedFrame::Chunk(GenerationChunk::fragment("a"))]);

        let frames = decoder.feed(b"\"b\",\"done\":true}\n");
        assert_eq!(
            frames,
            vec![DecodedFrame::Chunk(GenerationChunk {
                text: "b".to_string(),
                is_final: true,
                ..Default::default()
            })]
        );
        assert_eq!(decoder.finish(), 0);
    }

    #[test]
    fn test_finish_reports_leftover() {
        let mut decoder = StreamDecoder::new(FrameMode::Sse);
        decoder.feed(b"data: {\"resp");
        assert_eq!(decoder.finish(), 12);
    }

    #[test]
    fn test_accumulator_tracks_last_fragment() {
        let mut acc = ResponseAccumulator::new();

        assert!(acc.apply(DecodedFrame::Chunk(GenerationChunk::fragment("Hello"))));
        assert_eq!(acc.last_fragment(), "Hello");
        assert!(acc.apply(DecodedFrame::Chunk(GenerationChunk::fragment(", world"))));
        assert_eq!(acc.last_fragment(), ", world");
        assert_eq!(acc.text(), "Hello, world");

        assert!(!acc.apply(DecodedFrame::Done));
        assert!(!acc.apply(DecodedFrame::Chunk(GenerationChunk::fragment("ignored"))));

        let outcome = acc.into_outcome();
        assert!(outcome.complete);
        assert_eq!(outcome.fragments, 2);
    }

    #[tokio::test]
    async fn test_decode_stream_renders_incrementally() {
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from("data: {\"response\":\"A\"}\n\ndata: {\"resp")),
            Ok(Bytes::from("onse\":\"B\"}\n\n")),
            Ok(Bytes::from("data: [DONE]\n\n")),
        ];

        let mut renders = Vec::new();
        let outcome = decode_stream(stream::iter(chunks), FrameMode::Sse, |fragment, text| {
            renders.push((fragment.to_string(), text.to_string()));
        })
        .await;

        assert_eq!(
            renders,
            vec![
                ("A".to_string(), "A".to_string()),
                ("B".to_string(), "AB".to_string()),
            ]
        );
        assert_eq!(outcome.text, "AB");
        assert!(outcome.complete);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_decode_stream_keeps_partial_text_on_transport_error() {
        let chunks = vec![
            Ok(Bytes::from("data: {\"response\":\"partial\"}\n\n")),
            Err(std::io::Error::other("connection reset by peer")),
        ];

        let outcome = decode_stream(stream::iter(chunks), FrameMode::Sse, |_, _| {}).await;

        assert_eq!(outcome.text, "partial");
        assert!(!outcome.complete);
        assert_eq!(outcome.error.as_deref(), Some("connection reset by peer"));
    }
}
