//! Lazy tokenizer over fragmented input.
//!
//! The reader walks a slice of byte segments, exactly as they arrived from
//! the network, and classifies tokens on demand. A token may span any number
//! of segment boundaries; the reader stitches the bytes together before
//! classifying so the result never depends on how the input was split.

use crate::token::{Token, TokenKind};

/// A saved reader position, used to undo speculative consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkpoint {
    segment: usize,
    offset: usize,
}

#[derive(Debug, Clone)]
pub struct TokenReader<'a, S> {
    segments: &'a [S],
    position: Checkpoint,
}

const fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte >= 0x80
}

const fn is_space_byte(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t')
}

impl<'a, S: AsRef<[u8]>> TokenReader<'a, S> {
    #[must_use]
    pub fn new(segments: &'a [S]) -> Self {
        let mut reader = Self {
            segments,
            position: Checkpoint::default(),
        };
        reader.position = reader.normalize(reader.position);
        reader
    }

    /// Returns the next token without consuming it.
    #[must_use]
    pub fn peek(&self) -> Token {
        self.scan_token().0
    }

    /// Consumes and returns the next token.
    pub fn take_token(&mut self) -> Token {
        let (token, next) = self.scan_token();
        self.position = next;
        token
    }

    #[must_use]
    pub const fn checkpoint(&self) -> Checkpoint {
        self.position
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.position = checkpoint;
    }

    /// Skip over exhausted (or empty) segments so a position always points at
    /// a readable byte, or at the end of input.
    fn normalize(&self, mut position: Checkpoint) -> Checkpoint {
        while let Some(segment) = self.segments.get(position.segment) {
            if position.offset < segment.as_ref().len() {
                break;
            }

            position.segment += 1;
            position.offset = 0;
        }

        position
    }

    fn byte_at(&self, position: Checkpoint) -> Option<u8> {
        self.segments
            .get(position.segment)
            .and_then(|segment| segment.as_ref().get(position.offset))
            .copied()
    }

    fn advance(&self, mut position: Checkpoint) -> Checkpoint {
        position.offset += 1;
        self.normalize(position)
    }

    /// Collect the run of bytes matching `pred` starting at `position`.
    fn run(&self, mut position: Checkpoint, pred: impl Fn(u8) -> bool) -> (Vec<u8>, Checkpoint) {
        let mut bytes = Vec::new();

        while let Some(byte) = self.byte_at(position) {
            if !pred(byte) {
                break;
            }

            bytes.push(byte);
            position = self.advance(position);
        }

        (bytes, position)
    }

    fn scan_token(&self) -> (Token, Checkpoint) {
        let start = self.position;
        let Some(first) = self.byte_at(start) else {
            return (Token::none(), start);
        };

        match first {
            b'\r' => {
                let next = self.advance(start);
                if self.byte_at(next) == Some(b'\n') {
                    (
                        Token::new(TokenKind::NewLine, "\r\n".to_string()),
                        self.advance(next),
                    )
                } else {
                    (Token::other('\r'), next)
                }
            }
            b'\n' => (
                Token::new(TokenKind::NewLine, "\n".to_string()),
                self.advance(start),
            ),
            byte if is_space_byte(byte) => {
                let (bytes, next) = self.run(start, is_space_byte);
                (Token::new(TokenKind::Space, into_string(bytes)), next)
            }
            byte if is_word_byte(byte) => {
                let (bytes, next) = self.run(start, is_word_byte);
                let kind = if bytes.iter().all(u8::is_ascii_digit) {
                    TokenKind::Number
                } else {
                    TokenKind::Text
                };
                (Token::new(kind, into_string(bytes)), next)
            }
            byte => (Token::other(char::from(byte)), self.advance(start)),
        }
    }
}

fn into_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

impl<S: AsRef<[u8]>> Iterator for TokenReader<'_, S> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.take_token();
        (!token.is_none()).then_some(token)
    }
}
