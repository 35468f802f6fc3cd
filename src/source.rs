//! Character stream over a buffered reader, pulled one line at a time.

use std::io::{self, BufRead};

/// Yields the characters of `reader` lazily, reading a new line only when
/// the current one is used up.
///
/// A read error ends the stream; it is kept so the caller can report it once
/// the driver has drained the input.
pub struct ReaderChars<R> {
    reader: R,
    line: String,
    offset: usize,
    error: Option<io::Error>,
    done: bool,
}

impl<R: BufRead> ReaderChars<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            offset: 0,
            error: None,
            done: false,
        }
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn refill(&mut self) -> bool {
        self.line.clear();
        self.offset = 0;
        match self.reader.read_line(&mut self.line) {
            Ok(0) => false,
            Ok(_) => true,
            Err(err) => {
                self.error = Some(err);
                false
            }
        }
    }
}

impl<R: BufRead> Iterator for ReaderChars<R> {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        if self.done {
            return None;
        }
        loop {
            if let Some(c) = self.line[self.offset..].chars().next() {
                self.offset += c.len_utf8();
                return Some(c);
            }
            if !self.refill() {
                self.done = true;
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn yields_every_character_across_lines() {
        let chars: String = ReaderChars::new(Cursor::new("ab\nc\n")).collect();
        assert_eq!(chars, "ab\nc\n");
    }

    #[test]
    fn stays_exhausted_after_end() {
        let mut chars = ReaderChars::new(Cursor::new("x"));
        assert_eq!(chars.next(), Some('x'));
        assert_eq!(chars.next(), None);
        assert_eq!(chars.next(), None);
        assert!(chars.take_error().is_none());
    }

    #[test]
    fn invalid_utf8_ends_stream_with_error() {
        let mut chars = ReaderChars::new(Cursor::new(vec![b'1', b'\n', 0xff, b'\n']));
        assert_eq!(chars.next(), Some('1'));
        assert_eq!(chars.next(), Some('\n'));
        assert_eq!(chars.next(), None);
        assert!(chars.take_error().is_some());
    }
}
