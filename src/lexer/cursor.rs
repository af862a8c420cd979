//! Character cursor over a single source line.
// Heavily inspired by `rustc_lexer` and adapted to suit line-oriented assembly.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use std::str::Chars;

pub(crate) const EOF_CHAR: char = '\0';

/// Peekable iterator over a char sequence that tracks its byte position.
pub struct Cursor<'a> {
    /// Full line being scanned
    line: &'a str,
    /// Remaining characters
    chars: Chars<'a>,
}

impl<'a> Cursor<'a> {
    pub fn new(line: &'a str) -> Cursor<'a> {
        Cursor {
            line,
            chars: line.chars(),
        }
    }

    /// Peek the next char without consuming it. Returns [`EOF_CHAR`] at the end of the line.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    /// Line is finished scanning
    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Byte position inside the line.
    pub fn pos(&self) -> usize {
        self.line.len() - self.chars.as_str().len()
    }

    /// Slice of the line between byte positions.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.line[start..end]
    }

    /// Move to the next character.
    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Eats symbols while predicate returns true or until the end of the line is reached.
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.first()) && !self.is_eof() {
            self.bump();
        }
    }
}
