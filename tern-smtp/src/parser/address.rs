//! Mailbox, domain and address literal productions.

use super::Parser;
use crate::{
    command::Mailbox,
    token::{Token, TokenKind},
};

/// Punctuation allowed in an RFC 5322 atom.
const ATEXT: &str = "!#$%&'*+-/=?^_`{|}~";

/// Where the IPv6 matcher is within the literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ipv6State {
    Start,
    AfterGroup,
    AfterColon,
    AfterCompression,
    Done,
}

fn is_atext(token: &Token) -> bool {
    token.is_word()
        || (token.kind() == TokenKind::Other && token.text().chars().all(|ch| ATEXT.contains(ch)))
}

impl<S: AsRef<[u8]>> Parser<'_, S> {
    /// local-part `@` (domain | address-literal)
    pub(super) fn mailbox(&mut self) -> Option<Mailbox> {
        self.try_make(|parser| {
            let user = parser
                .try_make(Self::quoted_string)
                .or_else(|| parser.try_make(Self::dot_string))?;

            parser.try_take_other('@').then_some(())?;

            let host = parser
                .try_make(Self::address_literal)
                .or_else(|| parser.try_make(Self::domain))?;

            Some(Mailbox::new(user, host))
        })
    }

    fn atom(&mut self) -> Option<String> {
        let mut atom = String::new();
        while let Some(token) = self.take_if(is_atext) {
            atom.push_str(token.text());
        }
        (!atom.is_empty()).then_some(atom)
    }

    /// atom *("." atom)
    fn dot_string(&mut self) -> Option<String> {
        let mut text = self.atom()?;

        while let Some(atom) = self.try_make(|parser| {
            parser.try_take_other('.').then_some(())?;
            parser.atom()
        }) {
            text.push('.');
            text.push_str(&atom);
        }

        Some(text)
    }

    /// A double quoted string, returned with its quotes and escapes intact.
    fn quoted_string(&mut self) -> Option<String> {
        self.try_take_other('"').then_some(())?;
        let mut text = String::from("\"");

        loop {
            let token = self.reader.take_token();
            match token.kind() {
                TokenKind::None | TokenKind::NewLine => return None,
                _ if token.is_other('"') => {
                    text.push('"');
                    return Some(text);
                }
                _ if token.is_other('\\') => {
                    let escaped = self.reader.take_token();
                    if matches!(escaped.kind(), TokenKind::None | TokenKind::NewLine) {
                        return None;
                    }
                    text.push('\\');
                    text.push_str(escaped.text());
                }
                _ => text.push_str(token.text()),
            }
        }
    }

    /// Let-dig [Ldh-str], where hyphens may only appear between words.
    fn sub_domain(&mut self) -> Option<String> {
        let mut label = self.try_take_word()?.into_text();

        while let Some(rest) = self.try_make(|parser| {
            let mut hyphens = String::new();
            while parser.try_take_other('-') {
                hyphens.push('-');
            }
            if hyphens.is_empty() {
                return None;
            }
            let word = parser.try_take_word()?;
            hyphens.push_str(word.text());
            Some(hyphens)
        }) {
            label.push_str(&rest);
        }

        Some(label)
    }

    /// sub-domain *("." sub-domain)
    pub(super) fn domain(&mut self) -> Option<String> {
        let mut domain = self.sub_domain()?;

        while let Some(label) = self.try_make(|parser| {
            parser.try_take_other('.').then_some(())?;
            parser.sub_domain()
        }) {
            domain.push('.');
            domain.push_str(&label);
        }

        Some(domain)
    }

    /// `[` IPv4 `]` or `[IPv6:` IPv6 `]`, returned as spelled.
    pub(super) fn address_literal(&mut self) -> Option<String> {
        self.try_take_other('[').then_some(())?;

        let inner = if let Some(v4) = self.try_make(Self::ipv4_literal) {
            v4
        } else {
            let tag = self.take_if(|token| token.is_word_of("IPv6"))?;
            self.try_take_other(':').then_some(())?;
            let v6 = self.try_make(Self::ipv6_literal)?;
            format!("{}:{v6}", tag.text())
        };

        self.try_take_other(']').then_some(())?;
        Some(format!("[{inner}]"))
    }

    /// One to three digits with a value no greater than 255.
    fn ipv4_octet(&mut self) -> Option<String> {
        self.take_if(|token| {
            token.kind() == TokenKind::Number
                && token.text().len() <= 3
                && token.text().parse::<u8>().is_ok()
        })
        .map(Token::into_text)
    }

    /// Dotted-decimal IPv4 address.
    pub(super) fn ipv4_literal(&mut self) -> Option<String> {
        let mut text = self.ipv4_octet()?;

        for _ in 0..3 {
            self.try_take_other('.').then_some(())?;
            text.push('.');
            text.push_str(&self.ipv4_octet()?);
        }

        Some(text)
    }

    /// One to four hex digits.
    fn hex16(&mut self) -> Option<String> {
        self.take_if(|token| {
            token.is_word()
                && (1..=4).contains(&token.text().len())
                && token.text().bytes().all(|byte| byte.is_ascii_hexdigit())
        })
        .map(Token::into_text)
    }

    /// An IPv6 group: an embedded IPv4 address if one fits here, else hex.
    /// Returns the text and the number of 16-bit groups it occupies.
    fn ipv6_group(&mut self) -> Option<(String, usize, bool)> {
        if let Some(v4) = self.try_make(Self::ipv4_literal) {
            return Some((v4, 2, true));
        }

        self.hex16().map(|hex| (hex, 1, false))
    }

    /// RFC 4291 text form, with `::` compression and a trailing IPv4 address.
    pub(super) fn ipv6_literal(&mut self) -> Option<String> {
        let mut text = String::new();
        let mut groups = 0;
        let mut compressed = false;
        let mut state = Ipv6State::Start;

        loop {
            state = match state {
                Ipv6State::Start => {
                    if self.try_take_other(':') {
                        self.try_take_other(':').then_some(())?;
                        compressed = true;
                        text.push_str("::");
                        Ipv6State::AfterCompression
                    } else {
                        let (group, width, last) = self.ipv6_group()?;
                        text.push_str(&group);
                        groups += width;
                        if last { Ipv6State::Done } else { Ipv6State::AfterGroup }
                    }
                }
                Ipv6State::AfterGroup => {
                    if !self.try_take_other(':') {
                        break;
                    }

                    if !compressed && self.try_take_other(':') {
                        compressed = true;
                        text.push_str("::");
                        Ipv6State::AfterCompression
                    } else {
                        text.push(':');
                        Ipv6State::AfterColon
                    }
                }
                Ipv6State::AfterColon => {
                    let (group, width, last) = self.ipv6_group()?;
                    text.push_str(&group);
                    groups += width;
                    if last { Ipv6State::Done } else { Ipv6State::AfterGroup }
                }
                Ipv6State::AfterCompression => match self.ipv6_group() {
                    Some((group, width, last)) => {
                        text.push_str(&group);
                        groups += width;
                        if last { Ipv6State::Done } else { Ipv6State::AfterGroup }
                    }
                    None => break,
                },
                Ipv6State::Done => break,
            };

            if groups > 8 {
                return None;
            }
        }

        let valid = if compressed { groups <= 7 } else { groups == 8 };
        valid.then_some(text)
    }
}
