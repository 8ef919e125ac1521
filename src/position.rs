//! Descriptor position tracking
//!
//! Tracks where a cursor is inside descriptor text so parse errors can name
//! the exact byte offset (and line/column) of the offending character.

use std::fmt;

/// Represents a position in descriptor text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
    /// Byte offset from start of the input
    pub offset: usize,
}

impl Position {
    /// Create a new position
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self { line, column, offset }
    }

    /// Create a position at the start of the input
    pub fn start() -> Self {
        Self::new(1, 1, 0)
    }

    /// Advance position by one character
    pub fn advance(&mut self, ch: char) {
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.offset += ch.len_utf8();
    }

    /// Create a new position advanced by one character
    pub fn advanced(mut self, ch: char) -> Self {
        self.advance(ch);
        self
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.offset, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_tracks_lines() {
        let mut pos = Position::start();
        pos.advance('a');
        pos.advance('\n');
        pos.advance('b');
        assert_eq!(pos, Position::new(2, 2, 3));
    }

    #[test]
    fn test_display_names_offset() {
        let pos = Position::start().advanced('x').advanced('y');
        assert_eq!(pos.to_string(), "2 (line 1, column 3)");
    }
}
