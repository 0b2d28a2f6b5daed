//! Reassembles newline-delimited JSON from arbitrarily split byte chunks
//!
//! Transport chunks from the upstream service do not line up with record
//! boundaries: one chunk may end mid-line, another may carry several lines.
//! [`LineReframer`] keeps the unfinished tail between chunks, and
//! [`RecordStream`] pulls chunks on demand and yields decoded records.

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::types::UpstreamRecord;

/// Splits a byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineReframer {
    carry: BytesMut,
    /// Prefix of `carry` already known to hold no terminator
    scanned: usize,
}

impl LineReframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes
    ///
    /// Returned lines have the terminator (and a trailing `\r`) removed.
    /// Whitespace-only lines are dropped. The bytes after the last
    /// terminator stay buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.carry[self.scanned..].iter().position(|&b| b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let mut line = self.carry.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            lines.push(line.freeze());
        }
        self.scanned = self.carry.len();

        lines
    }

    /// Bytes received but not yet terminated
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Drop the unterminated tail, returning how many bytes were discarded
    pub fn discard(&mut self) -> usize {
        let len = self.carry.len();
        self.carry.clear();
        self.scanned = 0;
        len
    }
}

/// Pull-based adapter from upstream byte chunks to decoded records
///
/// Malformed lines are logged and skipped. An unterminated tail at the end
/// of the upstream stream is discarded. A transport error is yielded once
/// and ends the stream.
pub struct RecordStream<S> {
    inner: S,
    reframer: LineReframer,
    ready: VecDeque<UpstreamRecord>,
    malformed: usize,
    finished: bool,
}

impl<S> RecordStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reframer: LineReframer::new(),
            ready: VecDeque::new(),
            malformed: 0,
            finished: false,
        }
    }

    /// Number of lines skipped because they did not decode
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    fn decode_lines(&mut self, chunk: &[u8]) {
        for line in self.reframer.push(chunk) {
            match UpstreamRecord::parse(&line) {
                Ok(record) => self.ready.push_back(record),
                Err(e) => {
                    self.malformed += 1;
                    tracing::warn!(
                        error = %e,
                        line = %String::from_utf8_lossy(&line),
                        "Skipping malformed upstream line"
                    );
                }
            }
        }
    }
}

impl<S, E> Stream for RecordStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<UpstreamRecord, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(record) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(record)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.decode_lines(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    this.reframer.discard();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    let discarded = this.reframer.discard();
                    if discarded > 0 {
                        tracing::debug!(
                            bytes = discarded,
                            "Discarding unterminated trailing upstream data"
                        );
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::GenerationChunk;
    use futures::stream::{self, StreamExt};
    use std::convert::Infallible;

    fn chunks(parts: &[&str]) -> Vec<Result<Bytes, Infallible>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect()
    }

    #[test]
    fn test_push_keeps_partial_line() {
        let mut reframer = LineReframer::new();

        assert!(reframer.push(b"{\"respo").is_empty());
        assert_eq!(reframer.pending(), 7);

        let lines = reframer.push(b"nse\":\"a\"}\n{\"response\"");
        assert_eq!(lines, vec![Bytes::from_static(b"{\"response\":\"a\"}")]);
        assert_eq!(reframer.pending(), 11);
    }

    #[test]
    fn test_push_multiple_lines_in_one_chunk() {
        let mut reframer = LineReframer::new();
        let lines = reframer.push(b"one\ntwo\r\n\n  \nthree\n");

        assert_eq!(
            lines,
            vec![
                Bytes::from_static(b"one"),
                Bytes::from_static(b"two"),
                Bytes::from_static(b"three"),
            ]
        );
        assert_eq!(reframer.pending(), 0);
    }

    #[test]
    fn test_long_line_in_small_chunks() {
        let mut reframer = LineReframer::new();
        let line = format!("{{\"response\":\"{}\"}}", "x".repeat(4096));

        for piece in line.as_bytes().chunks(7) {
            assert!(reframer.push(piece).is_empty());
        }
        assert_eq!(reframer.pending(), line.len());

        let lines = reframer.push(b"\n{\"resp");
        assert_eq!(lines, vec![Bytes::from(line)]);
        assert_eq!(reframer.pending(), 6);

        let lines = reframer.push(b"onse\":\"b\"}\n");
        assert_eq!(lines, vec![Bytes::from_static(b"{\"response\":\"b\"}")]);
    }

    #[test]
    fn test_discard_clears_tail() {
        let mut reframer = LineReframer::new();
        reframer.push(b"{\"response\":\"tr");
        assert_eq!(reframer.discard(), 15);
        assert_eq!(reframer.pending(), 0);
    }

    #[tokio::test]
    async fn test_record_stream_reassembles_split_lines() {
        let upstream = stream::iter(chunks(&[
            "{\"response\":\"Hel",
            "lo\",\"done\":false}\n{\"response\":\" wor",
            "ld\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n",
        ]));

        let records: Vec<_> = RecordStream::new(upstream)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(
            records,
            vec![
                UpstreamRecord::Chunk(GenerationChunk::fragment("Hello")),
                UpstreamRecord::Chunk(GenerationChunk::fragment(" world")),
                UpstreamRecord::Chunk(GenerationChunk::finished()),
            ]
        );
    }

    #[tokio::test]
    async fn test_record_stream_skips_malformed_line() {
        let upstream = stream::iter(chunks(&[
            "{\"response\":\"a\"}\n{oops\n{\"response\":\"b\"}\n",
        ]));

        let mut records = RecordStream::new(upstream);
        let mut decoded = Vec::new();
        while let Some(record) = records.next().await {
            decoded.push(record.unwrap());
        }

        assert_eq!(decoded.len(), 2);
        assert_eq!(records.malformed_count(), 1);
    }

    #[tokio::test]
    async fn test_record_stream_drops_trailing_partial() {
        let upstream = stream::iter(chunks(&["{\"response\":\"a\"}\n{\"response\":\"b\""]));

        let records: Vec<_> = RecordStream::new(upstream).collect().await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_record_stream_ends_after_transport_error() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\"}\n")),
            Err("connection reset"),
            Ok(Bytes::from_static(b"{\"response\":\"b\"}\n")),
        ]);

        let items: Vec<_> = RecordStream::new(upstream).collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err("connection reset"));
    }
}
