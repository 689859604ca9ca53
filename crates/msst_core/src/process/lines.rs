//! Byte stream to line splitting for worker output.
//!
//! `\n` and `\r\n` end a line. A bare `\r` also ends a segment, and the
//! next segment keeps the `\r` as its first character so progress redraws
//! stay recognizable downstream. Segments with no content are dropped.
//! A segment that reaches [`MAX_SEGMENT`] bytes without a terminator is
//! emitted as it stands.

/// Longest segment held back while waiting for a terminator.
pub const MAX_SEGMENT: usize = 64 * 1024;

/// Incremental line splitter.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
    pending_cr: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    self.emit(&mut lines);
                    continue;
                }
                self.emit(&mut lines);
                self.buf.push(b'\r');
            }

            match byte {
                b'\r' => self.pending_cr = true,
                b'\n' => self.emit(&mut lines),
                _ => {
                    self.buf.push(byte);
                    if self.buf.len() >= MAX_SEGMENT {
                        self.emit(&mut lines);
                    }
                }
            }
        }

        lines
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.pending_cr = false;
        let mut lines = Vec::with_capacity(1);
        self.emit(&mut lines);
        lines.pop()
    }

    fn emit(&mut self, lines: &mut Vec<String>) {
        let content = match self.buf.first() {
            Some(b'\r') => &self.buf[1..],
            _ => &self.buf[..],
        };
        if !content.is_empty() {
            lines.push(String::from_utf8_lossy(&self.buf).into_owned());
        }
        self.buf.clear();
    }
}
