//! Incremental stderr line splitting that treats `\r` as a line break.
//!
//! NVEncC rewrites its progress row with bare carriage returns, so a plain
//! `BufRead::lines` would sit on one giant "line" until the child exits.

/// Splits a byte stream on `\r`, `\n`, or `\r\n` (one break), surviving
/// chunk boundaries between the two bytes of a CRLF pair. Emitted lines are
/// whitespace-trimmed; empty tokens are emitted as empty lines.
pub(crate) struct LineSplitter {
    buf: Vec<u8>,
    last_was_cr: bool,
}

impl LineSplitter {
    pub(crate) fn new() -> Self {
        LineSplitter {
            buf: Vec::new(),
            last_was_cr: false,
        }
    }

    pub(crate) fn feed(&mut self, bytes: &[u8], mut on_line: impl FnMut(&str)) {
        for &b in bytes {
            match b {
                b'\r' => {
                    self.emit(&mut on_line);
                    self.last_was_cr = true;
                }
                b'\n' => {
                    if self.last_was_cr {
                        // Second half of a CRLF pair; the line already went out.
                        self.last_was_cr = false;
                    } else {
                        self.emit(&mut on_line);
                    }
                }
                _ => {
                    self.last_was_cr = false;
                    self.buf.push(b);
                }
            }
        }
    }

    /// Flushes any unterminated trailing line at end of stream.
    pub(crate) fn finish(&mut self, mut on_line: impl FnMut(&str)) {
        if !self.buf.is_empty() {
            self.emit(&mut on_line);
        }
        self.last_was_cr = false;
    }

    fn emit(&mut self, on_line: &mut impl FnMut(&str)) {
        let line = String::from_utf8_lossy(&self.buf);
        on_line(line.trim());
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut splitter = LineSplitter::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            splitter.feed(chunk, |line| lines.push(line.to_string()));
        }
        splitter.finish(|line| lines.push(line.to_string()));
        lines
    }

    #[test]
    fn lf_only() {
        assert_eq!(split_all(&[b"line1\nline2\nline3\n"]), vec![
            "line1", "line2", "line3"
        ]);
    }

    #[test]
    fn cr_only_progress_rewrites() {
        assert_eq!(split_all(&[b"progress1\rprogress2\rprogress3\r"]), vec![
            "progress1",
            "progress2",
            "progress3"
        ]);
    }

    #[test]
    fn crlf_pairs_are_one_break() {
        assert_eq!(split_all(&[b"line1\r\nline2\r\nline3\r\n"]), vec![
            "line1", "line2", "line3"
        ]);
    }

    #[test]
    fn mixed_cr_and_lf_stream() {
        assert_eq!(
            split_all(&[b"header\ninfo\rprogress1\rprogress2\r\nfinal\n"]),
            vec!["header", "info", "progress1", "progress2", "final"]
        );
    }

    #[test]
    fn crlf_split_across_chunks_is_still_one_break() {
        assert_eq!(split_all(&[b"line1\r", b"\nline2\n"]), vec!["line1", "line2"]);
    }

    #[test]
    fn unterminated_tail_is_flushed_at_finish() {
        assert_eq!(split_all(&[b"last line"]), vec!["last line"]);
    }

    #[test]
    fn empty_tokens_are_emitted_as_empty_lines() {
        assert_eq!(split_all(&[b"a\n\nb\n"]), vec!["a", "", "b"]);
    }

    #[test]
    fn tokens_are_whitespace_trimmed() {
        assert_eq!(split_all(&[b"  padded line  \nnext\n"]), vec![
            "padded line",
            "next"
        ]);
    }

    #[test]
    fn empty_input_emits_nothing() {
        assert!(split_all(&[b""]).is_empty());
    }
}
