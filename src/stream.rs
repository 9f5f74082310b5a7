//! Cursor over one `;`-delimited section of chat input.
//!
//! The stream is the only owner of the read position. The lexer drives it
//! through `peek`/`next`/`skip_*` and asks it for an error with `croak` when
//! a read rule cannot finish.

use crate::error::StreamError;

pub struct Stream {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Stream {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 0,
            column: 0,
        }
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub fn peek_next(&self) -> Option<char> {
        self.peek_at(1)
    }

    pub fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    pub fn next(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;

        if ch == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }

        Some(ch)
    }

    pub fn advance_by(&mut self, count: usize) {
        for _ in 0..count {
            if self.next().is_none() {
                break;
            }
        }
    }

    /// Unread characters, for longest-prefix matching.
    pub fn rest(&self) -> &[char] {
        self.chars.get(self.pos..).unwrap_or(&[])
    }

    pub fn remaining(&self) -> String {
        self.rest().iter().collect()
    }

    pub fn starts_with(&self, pattern: &str) -> bool {
        let rest = self.rest();
        let mut count = 0;

        for (i, expected) in pattern.chars().enumerate() {
            if rest.get(i) != Some(&expected) {
                return false;
            }
            count += 1;
        }

        count > 0
    }

    /// Text up to (not including) the next whitespace or `;`.
    pub fn peek_to_whitespace(&self) -> String {
        self.rest()
            .iter()
            .take_while(|ch| !ch.is_whitespace() && **ch != ';')
            .collect()
    }

    pub fn skip_to_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == ';' {
                break;
            }
            self.next();
        }
    }

    pub fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.next();
        }
    }

    /// Drops everything up to the end of the current command.
    pub fn skip_to_eoc(&mut self) {
        while !self.eoc() {
            self.next();
        }
    }

    /// End of command: `;`, the start of `&&`, or end of input.
    pub fn eoc(&self) -> bool {
        match self.peek() {
            None => true,
            Some(';') => true,
            Some('&') => self.peek_next() == Some('&'),
            _ => false,
        }
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn croak(&self, message: impl Into<String>) -> StreamError {
        StreamError::new(message, self.line + 1, self.column + 1)
    }
}
