use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};

use crate::error::{Exception, ExceptionKind, Position};

const CHUNK: usize = 4096;

/// Pulls characters off any byte source, one UTF-8 scalar at a time.
///
/// Bytes are read in chunks into a `BytesMut` and decoded lazily, so a scalar
/// split across two reads is reassembled before it is handed out. Every
/// decoded character is also appended to `text`, which diagnostics use as the
/// source code of a report.
pub struct CharStream<R> {
    reader: R,
    pending: BytesMut,
    exhausted: bool,
    text: String,
    line: usize,
    col: usize,
}

impl<R: Read> CharStream<R> {
    pub fn new(reader: R) -> Self {
        CharStream {
            reader,
            pending: BytesMut::with_capacity(CHUNK),
            exhausted: false,
            text: String::new(),
            line: 1,
            col: 0,
        }
    }

    /// Everything decoded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Position the next character will be reported at.
    pub fn position(&self) -> Position {
        Position::new(self.line, self.col + 1, self.text.len())
    }

    pub fn next_char(&mut self) -> Result<Option<(char, Position)>, Exception> {
        if self.pending.is_empty() {
            self.fill()?;
            if self.pending.is_empty() {
                return Ok(None);
            }
        }

        let width = utf8_width(self.pending[0]).ok_or_else(|| self.invalid_utf8())?;
        while self.pending.len() < width && !self.exhausted {
            self.fill()?;
        }
        if self.pending.len() < width {
            return Err(self.invalid_utf8());
        }

        let c = std::str::from_utf8(&self.pending[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .ok_or_else(|| self.invalid_utf8())?;
        self.pending.advance(width);

        let position = self.position();
        self.text.push(c);
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Ok(Some((c, position)))
    }

    fn fill(&mut self) -> Result<(), Exception> {
        if self.exhausted {
            return Ok(());
        }
        let mut chunk = [0u8; CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.exhausted = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Exception::new(
                        ExceptionKind::IOError,
                        format!("failed to read source: {e}"),
                        self.position(),
                    ));
                }
            }
        }
    }

    fn invalid_utf8(&self) -> Exception {
        Exception::syntax("unreadable character in source", self.position())
            .with_help("source files must be valid UTF-8")
    }
}

fn utf8_width(first: u8) -> Option<usize> {
    match first {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out one byte per read to exercise scalars split across reads.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.split_first() {
                Some((first, rest)) if !buf.is_empty() => {
                    buf[0] = *first;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn tracks_lines_and_columns() {
        let mut stream = CharStream::new("ab\nc".as_bytes());
        let mut seen = Vec::new();
        while let Some((c, pos)) = stream.next_char().unwrap() {
            seen.push((c, pos.line, pos.col, pos.offset));
        }
        assert_eq!(
            seen,
            vec![
                ('a', 1, 1, 0),
                ('b', 1, 2, 1),
                ('\n', 1, 3, 2),
                ('c', 2, 1, 3)
            ]
        );
        assert_eq!(stream.text(), "ab\nc");
    }

    #[test]
    fn reassembles_multibyte_scalars_across_reads() {
        let source = "é€x";
        let mut stream = CharStream::new(Trickle(source.as_bytes()));
        let mut out = String::new();
        while let Some((c, _)) = stream.next_char().unwrap() {
            out.push(c);
        }
        assert_eq!(out, source);
    }

    #[test]
    fn invalid_utf8_is_a_syntax_error() {
        let mut stream = CharStream::new(&[b'a', 0xFF][..]);
        assert!(stream.next_char().unwrap().is_some());
        let err = stream.next_char().unwrap_err();
        assert_eq!(err.kind, ExceptionKind::SyntaxError);
    }
}
