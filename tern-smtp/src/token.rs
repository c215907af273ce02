use core::fmt::{self, Display, Formatter};

/// Classification of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// End of the available input.
    None,
    /// A run of letters and digits containing at least one non-digit. Bytes
    /// above 0x7F are treated as letters so UTF-8 mailboxes stay in one token.
    Text,
    /// A run of ASCII digits.
    Number,
    /// A run of spaces or horizontal tabs.
    Space,
    /// CRLF, or a bare LF.
    NewLine,
    /// A single punctuation byte such as `.`, `:`, `@`, `<` or `>`.
    Other,
}

/// A classified slice of the input.
///
/// Two tokens are equal when their kinds match and their text matches
/// ignoring ASCII case.
#[derive(Debug, Clone, Eq)]
pub struct Token {
    kind: TokenKind,
    text: String,
}

impl Token {
    #[must_use]
    pub const fn new(kind: TokenKind, text: String) -> Self {
        Self { kind, text }
    }

    /// The end-of-input sentinel.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(TokenKind::None, String::new())
    }

    #[must_use]
    pub fn other(ch: char) -> Self {
        Self::new(TokenKind::Other, ch.to_string())
    }

    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self.kind, TokenKind::None)
    }

    /// Text or Number, the two kinds a word can be made of.
    #[must_use]
    pub const fn is_word(&self) -> bool {
        matches!(self.kind, TokenKind::Text | TokenKind::Number)
    }

    /// Returns `true` if this is the punctuation token for `ch`.
    #[must_use]
    pub fn is_other(&self, ch: char) -> bool {
        self.kind == TokenKind::Other && self.text.len() == ch.len_utf8() && self.text.starts_with(ch)
    }

    /// Returns `true` if this is a word spelling `word`, ignoring case.
    #[must_use]
    pub fn is_word_of(&self, word: &str) -> bool {
        self.is_word() && self.text.eq_ignore_ascii_case(word)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.text.eq_ignore_ascii_case(&other.text)
    }
}

impl Display for Token {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::None => fmt.write_str("<none>"),
            TokenKind::NewLine => fmt.write_str("<newline>"),
            _ => fmt.write_str(&self.text),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equality_ignores_case_but_not_kind() {
        let lower = Token::new(TokenKind::Text, "ehlo".to_string());
        let upper = Token::new(TokenKind::Text, "EHLO".to_string());
        assert_eq!(lower, upper);

        let number = Token::new(TokenKind::Number, "25".to_string());
        let text = Token::new(TokenKind::Text, "25".to_string());
        assert_ne!(number, text);
    }

    #[test]
    fn punctuation() {
        let colon = Token::other(':');
        assert!(colon.is_other(':'));
        assert!(!colon.is_other('.'));
        assert!(!colon.is_word());
    }
}
