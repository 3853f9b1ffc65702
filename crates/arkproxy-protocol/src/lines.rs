use bytes::{Bytes, BytesMut};

/// Re-frames an upstream byte stream into newline-terminated lines.
///
/// `\n`, `\r\n` and a lone `\r` all end a line. Blank lines are skipped and
/// every emitted line ends with exactly one `\n`. Content is not otherwise
/// interpreted, so SSE `data:` lines and JSON lines pass unchanged.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: BytesMut,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();

        // `\r\n` yields an empty second line, which framing drops.
        while let Some(pos) = self.buffer.iter().position(|b| matches!(*b, b'\n' | b'\r')) {
            let line = self.buffer.split_to(pos + 1);
            if let Some(line) = frame_line(&line[..pos]) {
                lines.push(line);
            }
        }

        lines
    }

    /// Flushes a trailing line that was never terminated.
    pub fn finish(&mut self) -> Option<Bytes> {
        let rest = self.buffer.split();
        frame_line(&rest)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn frame_line(line: &[u8]) -> Option<Bytes> {
    if line.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(line);
    let mut out = String::with_capacity(text.len() + 1);
    out.push_str(&text);
    out.push('\n');
    Some(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::LineSplitter;

    #[test]
    fn splits_sse_frames_and_drops_blank_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push_bytes(b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\n");
        assert_eq!(lines, vec!["data: {\"a\":1}\n", "data: {\"a\":2}\n"]);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push_bytes(b"data: {\"cho").is_empty());
        assert!(splitter.push_bytes(b"ices\":[]}").is_empty());
        let lines = splitter.push_bytes(b"\r\ndata: [DONE]");
        assert_eq!(lines, vec!["data: {\"choices\":[]}\n"]);
        assert_eq!(splitter.finish().unwrap(), "data: [DONE]\n");
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn crlf_is_normalized_to_single_newline() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push_bytes(b"one\r\n\r\ntwo\r\n");
        assert_eq!(lines, vec!["one\n", "two\n"]);
    }

    #[test]
    fn lone_carriage_return_ends_a_line() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push_bytes(b"data: 1\r\rdata: 2\r");
        assert_eq!(lines, vec!["data: 1\n", "data: 2\n"]);

        // A CRLF pair split across chunks still yields one line.
        assert!(splitter.push_bytes(b"data: 3").is_empty());
        assert_eq!(splitter.push_bytes(b"\r"), vec!["data: 3\n"]);
        assert!(splitter.push_bytes(b"\ndata: 4").is_empty());
        assert_eq!(splitter.finish().unwrap(), "data: 4\n");
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let text = "data: 你好\n".as_bytes();
        let mut splitter = LineSplitter::new();
        assert!(splitter.push_bytes(&text[..8]).is_empty());
        let lines = splitter.push_bytes(&text[8..]);
        assert_eq!(lines, vec!["data: 你好\n"]);
    }

    #[test]
    fn whitespace_only_lines_are_forwarded() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push_bytes(b"  \n");
        assert_eq!(lines, vec!["  \n"]);
    }
}
