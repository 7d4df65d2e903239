//! Reassembly of a backend event stream into `data:` payloads.
//!
//! The backend body arrives in chunks whose boundaries have nothing to do with
//! the line structure (a chunk may end mid-line, or even mid-character).
//! [`LineBuffer`] turns those chunks into complete lines, [`parse_line`] turns
//! a line into a [`Frame`], and [`read_frames`] ties both to a byte stream.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use super::openai_types::ChatCompletionChunk;

pub const DATA_PREFIX: &[u8] = b"data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// A recognised payload from the backend stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chunk(ChatCompletionChunk),
    /// The `[DONE]` sentinel: the backend has nothing more to say.
    Done,
}

/// Splits incoming chunks on `\n`, keeping the trailing partial line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    // Prefix of `buf` already known to contain no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the
    /// terminator (`\n` or `\r\n`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            let mut line = self.buf.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            lines.push(line.freeze());
            from = 0;
        }
        self.scanned = self.buf.len();

        lines
    }

    /// Bytes of an unterminated line still held back.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Interpret one line. Anything that is not a well-formed `data:` payload
/// yields `None`.
pub fn parse_line(line: &[u8]) -> Option<Frame> {
    let rest = line.strip_prefix(DATA_PREFIX)?;

    let payload = match std::str::from_utf8(rest) {
        Ok(s) => s.trim(),
        Err(e) => {
            tracing::debug!("Skipping non-UTF-8 payload: {}", e);
            return None;
        }
    };

    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => Some(Frame::Chunk(chunk)),
        Err(e) => {
            tracing::debug!("Skipping unparseable chunk: {}", e);
            None
        }
    }
}

/// Lazily read frames from a backend body.
///
/// A new chunk is only pulled once every frame from the previous one has been
/// consumed. Transport errors are passed through and end the stream; bytes of
/// an unterminated final line are discarded.
pub fn read_frames<S, E>(body: S) -> impl Stream<Item = Result<Frame, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    async_stream::stream! {
        let mut lines = LineBuffer::new();
        tokio::pin!(body);

        while let Some(chunk_result) = body.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for line in lines.push(&chunk) {
                if let Some(frame) = parse_line(&line) {
                    yield Ok(frame);
                }
            }
        }

        if lines.pending() > 0 {
            tracing::debug!(bytes = lines.pending(), "Discarding unterminated trailing line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::{ChunkChoice, ChunkDelta};
    use futures::stream;

    const SAMPLE: &[u8] = b": keep-alive\r\n\
data: {\"choices\":[{\"delta\":{\"content\":\"h\xc3\xa9llo\"}}]}\r\n\
\r\n\
event: ignored\n\
data:{\"choices\":[{\"delta\":{\"content\":\" w\xe4\xb8\x96rld\"}}]}\n\
\n\
data: {not json}\n\
data:   [DONE]   \n\
data: trailing-without-newline";

    fn text_chunk(text: &str) -> Frame {
        Frame::Chunk(ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    content: Some(text.to_string()),
                }),
                finish_reason: None,
            }],
        })
    }

    fn lines_for(chunks: &[&[u8]]) -> Vec<Bytes> {
        let mut buffer = LineBuffer::new();
        chunks.iter().flat_map(|c| buffer.push(c)).collect()
    }

    #[test]
    fn test_lines_are_split_and_terminators_stripped() {
        let lines = lines_for(&[b"a\r\nb\n\nc"]);
        assert_eq!(lines, vec![Bytes::from("a"), Bytes::from("b"), Bytes::new()]);
    }

    #[test]
    fn test_partial_line_is_held_until_completed() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"cho").is_empty());
        assert_eq!(buffer.pending(), 11);
        assert!(buffer.push(b"").is_empty());
        assert_eq!(buffer.pending(), 11);

        let lines = buffer.push(b"ices\":[]}\nda");
        assert_eq!(lines, vec![Bytes::from("data: {\"choices\":[]}")]);
        assert_eq!(buffer.pending(), 2);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_lines() {
        let whole = lines_for(&[SAMPLE]);

        for split in 0..=SAMPLE.len() {
            let (a, b) = SAMPLE.split_at(split);
            assert_eq!(lines_for(&[a, b]), whole, "split at {split}");
        }

        for size in 1..=7 {
            let pieces: Vec<&[u8]> = SAMPLE.chunks(size).collect();
            assert_eq!(lines_for(&pieces), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_parse_line_recognises_data_prefix() {
        assert_eq!(
            parse_line(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"),
            Some(text_chunk("x"))
        );
        assert_eq!(
            parse_line(b"data:{\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"),
            Some(text_chunk("x"))
        );
        assert_eq!(parse_line(b"data: [DONE]"), Some(Frame::Done));
        assert_eq!(parse_line(b"data:[DONE]"), Some(Frame::Done));
    }

    #[test]
    fn test_parse_line_drops_noise() {
        assert_eq!(parse_line(b""), None);
        assert_eq!(parse_line(b": comment"), None);
        assert_eq!(parse_line(b"event: message"), None);
        assert_eq!(parse_line(b"Data: [DONE]"), None);
        assert_eq!(parse_line(b" data: [DONE]"), None);
        assert_eq!(parse_line(b"data: {broken"), None);
        assert_eq!(parse_line(b"data:"), None);
        assert_eq!(parse_line(b"data: \xff\xfe"), None);
        assert_eq!(parse_line(b"data: [DONE] extra"), None);
    }

    #[test]
    fn test_read_frames_over_a_chunked_body() {
        let body = stream::iter(
            SAMPLE
                .chunks(5)
                .map(|c| Ok::<_, std::io::Error>(Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>(),
        );

        let frames: Vec<Frame> = tokio_test::block_on(
            read_frames(body).map(|r| r.unwrap()).collect::<Vec<_>>(),
        );

        assert_eq!(
            frames,
            vec![text_chunk("h\u{e9}llo"), text_chunk(" w\u{4e16}rld"), Frame::Done]
        );
    }

    #[test]
    fn test_read_frames_surfaces_transport_error_once() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: [DONE]\n")),
            Err("connection reset"),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ]);

        let items: Vec<Result<Frame, &str>> = tokio_test::block_on(read_frames(body).collect());

        assert_eq!(items, vec![Ok(Frame::Done), Err("connection reset")]);
    }
}
