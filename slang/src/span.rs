/// Source positions for diagnostics.
///
/// The lexer only tracks byte offsets. Line and column are recovered on
/// demand by rescanning the buffer up to the offset, which keeps the hot
/// path free of bookkeeping.
use std::fmt;

use crate::lexer::char_len;

/// A single position in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
    /// Byte offset from the start of the buffer (0-based).
    pub offset: usize,
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based, in code points).
    pub column: usize,
}

impl Pos {
    pub const fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }

    pub const fn origin() -> Self {
        Self::new(0, 1, 1)
    }

    /// Find line and column of `offset` by counting newlines in `src`.
    pub fn locate(src: &[u8], offset: usize) -> Self {
        let end = offset.min(src.len());
        let mut pos = Self::origin();
        let mut i = 0;
        while i < end {
            if src[i] == b'\n' {
                pos.line += 1;
                pos.column = 1;
                i += 1;
            } else {
                pos.column += 1;
                i += char_len(src[i]);
            }
        }
        pos.offset = offset;
        pos
    }

    /// The full text of the line this position sits on, without the newline.
    pub fn line_text<'a>(&self, src: &'a [u8]) -> &'a [u8] {
        let at = self.offset.min(src.len());
        let start = src[..at]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let end = src[at..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(src.len(), |i| at + i);
        let line = &src[start..end];
        line.strip_suffix(b"\r").unwrap_or(line)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_first_line() {
        let pos = Pos::locate(b"abc def", 4);
        assert_eq!(pos, Pos::new(4, 1, 5));
    }

    #[test]
    fn test_locate_after_newlines() {
        let src = b"one\ntwo\nthree";
        let pos = Pos::locate(src, 9);
        assert_eq!(pos.line, 3);
        assert_eq!(pos.column, 2);
        assert_eq!(pos.line_text(src), b"three");
    }

    #[test]
    fn test_locate_counts_code_points() {
        let src = "é=x".as_bytes();
        let pos = Pos::locate(src, 2);
        assert_eq!(pos.column, 2);
    }

    #[test]
    fn test_line_text_strips_carriage_return() {
        let src = b"a\r\nbc\r\n";
        let pos = Pos::locate(src, 3);
        assert_eq!(pos.line_text(src), b"bc");
    }
}
