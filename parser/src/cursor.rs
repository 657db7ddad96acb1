//! Forward-only cursor over a borrowed byte buffer.
//!
//! Reads never advance past a short buffer: a failed read leaves the
//! position untouched so the caller decides how to recover.

#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Unread bytes, borrowed from the underlying buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.buf.get(self.pos..self.pos + n)
    }

    /// Move back to an earlier position. Positions past the current one
    /// are ignored.
    pub fn rewind_to(&mut self, pos: usize) {
        self.pos = self.pos.min(pos);
    }

    /// Advance by `n` bytes, clamped to the end of the buffer.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub fn peek_u64_le(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.peek(8)?.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        let value = self.peek_u64_le()?;
        self.pos += 8;
        Some(value)
    }

    /// Consume `expected` if the unread bytes start with it.
    pub fn eat(&mut self, expected: &[u8]) -> bool {
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    /// Skip through the next newline. Returns `false` if the buffer ran
    /// out first, in which case everything has been consumed.
    pub fn skip_line(&mut self) -> bool {
        match self.rest().iter().position(|&b| b == b'\n') {
            Some(at) => {
                self.pos += at + 1;
                true
            }
            None => {
                self.pos = self.buf.len();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_words() {
        let mut cursor = ByteCursor::new(b"abcdefgh!");
        assert_eq!(cursor.read_u64_le(), Some(u64::from_le_bytes(*b"abcdefgh")));
        assert_eq!(cursor.read_u8(), Some(b'!'));
        assert!(cursor.is_empty());
    }

    #[test]
    fn short_read_does_not_advance() {
        let mut cursor = ByteCursor::new(b"abc");
        assert_eq!(cursor.read_u64_le(), None);
        assert_eq!(cursor.position(), 0);
        assert!(!cursor.eat(b"abcd"));
        assert!(cursor.eat(b"ab"));
        assert_eq!(cursor.rest(), b"c");
    }

    #[test]
    fn skip_line_stops_after_newline() {
        let mut cursor = ByteCursor::new(b"junk\nnext");
        assert!(cursor.skip_line());
        assert_eq!(cursor.rest(), b"next");
        assert!(!cursor.skip_line());
        assert!(cursor.is_empty());
    }

    #[test]
    fn rewind_never_moves_forward() {
        let mut cursor = ByteCursor::new(b"abcdef");
        cursor.advance(4);
        cursor.rewind_to(1);
        assert_eq!(cursor.rest(), b"bcdef");
        cursor.rewind_to(5);
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn advance_is_clamped() {
        let mut cursor = ByteCursor::new(b"xy");
        cursor.advance(10);
        assert_eq!(cursor.remaining(), 0);
    }
}
