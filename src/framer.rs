//! Streaming JSON framer (spec §4.1).
//!
//! Splits an async byte source on newlines, parses each line that looks like
//! a JSON object, and tags it with its 1-based line number. Partial reads
//! (no terminating newline yet) stay buffered until more bytes arrive.

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8192;

/// One unit of output from the framer.
#[derive(Debug)]
pub enum Frame {
    /// A line that parsed as a JSON object.
    Message { line: usize, value: serde_json::Value },
    /// A line that looked like a JSON object (started with `{`) but failed
    /// to parse.
    ParserError {
        line: usize,
        offset: usize,
        preview: String,
        reason: String,
    },
}

/// Line-oriented reassembly buffer over an [`AsyncRead`] source.
pub struct JsonLineFramer<R> {
    reader: R,
    buf: Vec<u8>,
    cursor: usize,
    /// 1-based line number that will be assigned to the next line produced.
    next_line_no: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> JsonLineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            cursor: 0,
            next_line_no: 1,
            eof: false,
        }
    }

    /// The number of lines handed to the caller so far (matches the number
    /// of `\n` bytes consumed from the source, spec §8).
    pub fn lines_consumed(&self) -> usize {
        self.next_line_no - 1
    }

    /// Read until the next complete frame is available, or `Ok(None)` on
    /// EOF with no more buffered data. A 0-byte read from the source is not
    /// an error — it's simply how an `AsyncRead` signals EOF, which this
    /// loop treats as "keep draining the buffer, then stop".
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            if let Some(idx) = find_newline(&self.buf[self.cursor..]) {
                let line_end = self.cursor + idx;
                let raw = self.buf[self.cursor..line_end].to_vec();
                self.cursor = line_end + 1;
                let line_no = self.claim_line_no();
                self.compact();
                if let Some(frame) = Self::frame_from_line(line_no, &raw) {
                    return Ok(Some(frame));
                }
                continue;
            }

            if self.eof {
                if self.cursor < self.buf.len() {
                    let raw = self.buf[self.cursor..].to_vec();
                    self.cursor = self.buf.len();
                    let line_no = self.claim_line_no();
                    self.compact();
                    if let Some(frame) = Self::frame_from_line(line_no, &raw) {
                        return Ok(Some(frame));
                    }
                }
                return Ok(None);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
                continue;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn claim_line_no(&mut self) -> usize {
        let n = self.next_line_no;
        self.next_line_no += 1;
        n
    }

    /// Drop already-consumed bytes once the buffer has been fully drained,
    /// so a long-running stream doesn't grow the buffer unboundedly.
    fn compact(&mut self) {
        if self.cursor > 0 && self.cursor == self.buf.len() {
            self.buf.clear();
            self.cursor = 0;
        }
    }

    fn frame_from_line(line_no: usize, raw: &[u8]) -> Option<Frame> {
        let text = String::from_utf8_lossy(raw);
        let trimmed = text.trim();
        if trimmed.is_empty() || !trimmed.starts_with('{') {
            return None;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => Some(Frame::Message { line: line_no, value }),
            Err(e) => {
                let preview: String = trimmed.chars().take(120).collect();
                Some(Frame::ParserError {
                    line: line_no,
                    offset: e.column(),
                    preview,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    /// Pipe text through a `tokio::io::duplex` pair so tests can simulate
    /// partial reads by controlling how the writer chunks its `write_all`
    /// calls.
    async fn framer_from_chunks(chunks: &[&str]) -> JsonLineFramer<tokio::io::DuplexStream> {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let owned: Vec<String> = chunks.iter().map(|s| s.to_string()).collect();
        tokio::spawn(async move {
            for chunk in owned {
                let _ = writer.write_all(chunk.as_bytes()).await;
            }
        });
        JsonLineFramer::new(reader)
    }

    #[tokio::test]
    async fn parses_whole_lines() {
        let mut framer = framer_from_chunks(&["{\"a\":1}\n{\"b\":2}\n"]).await;
        let f1 = framer.next_frame().await.unwrap().unwrap();
        assert!(matches!(f1, Frame::Message { line: 1, .. }));
        let f2 = framer.next_frame().await.unwrap().unwrap();
        assert!(matches!(f2, Frame::Message { line: 2, .. }));
    }

    #[tokio::test]
    async fn reassembles_partial_reads() {
        // Split a single JSON object across three writes with no newline
        // boundary alignment.
        let mut framer = framer_from_chunks(&["{\"a\":", "1,\"b\":", "2}\n"]).await;
        let frame = framer.next_frame().await.unwrap().unwrap();
        match frame {
            Frame::Message { line, value } => {
                assert_eq!(line, 1);
                assert_eq!(value["a"], 1);
                assert_eq!(value["b"], 2);
            }
            _ => panic!("expected Message frame"),
        }
    }

    #[tokio::test]
    async fn malformed_line_yields_parser_error_and_continues() {
        let mut framer =
            framer_from_chunks(&["{\"a\":\n{\"b\":2}\n"]).await;
        let f1 = framer.next_frame().await.unwrap().unwrap();
        assert!(matches!(f1, Frame::ParserError { line: 1, .. }));
        let f2 = framer.next_frame().await.unwrap().unwrap();
        assert!(matches!(f2, Frame::Message { line: 2, .. }));
    }

    #[tokio::test]
    async fn non_json_lines_are_skipped_but_counted() {
        let mut framer = framer_from_chunks(&["not json\n{\"a\":1}\n"]).await;
        let frame = framer.next_frame().await.unwrap().unwrap();
        // The skipped line still claimed line number 1; the object is line 2.
        assert!(matches!(frame, Frame::Message { line: 2, .. }));
        assert_eq!(framer.lines_consumed(), 2);
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let mut framer = framer_from_chunks(&["\n\n{\"a\":1}\n"]).await;
        let frame = framer.next_frame().await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Message { .. }));
    }

    #[tokio::test]
    async fn trailing_partial_line_without_newline_is_flushed_at_eof() {
        let mut framer = framer_from_chunks(&["{\"a\":1}"]).await;
        let frame = framer.next_frame().await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Message { line: 1, .. }));
        assert!(framer.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_with_no_data_yields_none() {
        let mut framer = framer_from_chunks(&[]).await;
        assert!(framer.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_counter_equals_newline_count() {
        let text = "{\"a\":1}\njunk\n{\"b\":2}\n\n{\"c\":3}\n";
        let newline_count = text.matches('\n').count();
        let mut framer = framer_from_chunks(&[text]).await;
        let mut consumed_lines = 0;
        while framer.next_frame().await.unwrap().is_some() {
            consumed_lines += 1;
        }
        let _ = consumed_lines;
        assert_eq!(framer.lines_consumed(), newline_count);
    }

    #[tokio::test]
    async fn long_line_grows_buffer_without_loss() {
        let big = "x".repeat(READ_CHUNK * 4);
        let line = format!("{{\"a\":\"{big}\"}}\n");
        let mut framer = framer_from_chunks(&[&line]).await;
        let frame = framer.next_frame().await.unwrap().unwrap();
        match frame {
            Frame::Message { value, .. } => {
                assert_eq!(value["a"].as_str().unwrap().len(), big.len());
            }
            _ => panic!("expected Message frame"),
        }
    }
}
