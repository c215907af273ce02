//! Recursive-descent parser for SMTP command lines.
//!
//! Every production follows the same contract: it either matches and leaves
//! the reader just past the match, or it fails and leaves the reader exactly
//! where it started. [`Parser::try_make`] provides the rollback.

mod address;

use std::net::{IpAddr, SocketAddr};

use crate::{
    command::{AuthenticationMethod, Command, Mailbox, Parameters, ProxyProtocol},
    error::ParseError,
    token::{Token, TokenKind},
    tokenizer::TokenReader,
};

pub struct Parser<'a, S> {
    reader: TokenReader<'a, S>,
}

/// Parse a single, newline terminated command line.
///
/// # Errors
/// Returns a [`ParseError`] if the verb is unknown or its arguments are malformed.
pub fn parse(line: &[u8]) -> Result<Command, ParseError> {
    Parser::new(&[line]).parse_command()
}

const fn syntax(command: &'static str, reason: &'static str) -> ParseError {
    ParseError::Syntax { command, reason }
}

impl<'a, S: AsRef<[u8]>> Parser<'a, S> {
    #[must_use]
    pub fn new(segments: &'a [S]) -> Self {
        Self {
            reader: TokenReader::new(segments),
        }
    }

    /// Returns `true` once every token has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.reader.peek().is_none()
    }

    /// Parse one command line, verb through to the terminating newline.
    ///
    /// # Errors
    /// Returns a [`ParseError`] if the verb is unknown or its arguments are malformed.
    pub fn parse_command(&mut self) -> Result<Command, ParseError> {
        let verb = self.reader.take_token();
        if !verb.is_word() {
            return Err(ParseError::UnrecognizedCommand);
        }

        match verb.text().to_ascii_uppercase().as_str() {
            Command::HELO => self
                .hello(Command::HELO)
                .map(|domain_or_address| Command::Helo { domain_or_address }),
            Command::EHLO => self
                .hello(Command::EHLO)
                .map(|domain_or_address| Command::Ehlo { domain_or_address }),
            Command::MAIL => self.mail(),
            Command::RCPT => self.rcpt(),
            Command::AUTH => self.auth(),
            Command::PROXY => self.proxy(),
            Command::NOOP => {
                self.skip_to_end_of_line();
                Ok(Command::Noop)
            }
            Command::DATA => self.bare(Command::DATA, Command::Data),
            Command::STARTTLS => self.bare(Command::STARTTLS, Command::StartTls),
            Command::RSET => self.bare(Command::RSET, Command::Rset),
            Command::QUIT => self.bare(Command::QUIT, Command::Quit),
            _ => Err(ParseError::UnrecognizedCommand),
        }
    }

    /// Run `make`, restoring the reader if it fails to match.
    fn try_make<T>(&mut self, make: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        let checkpoint = self.reader.checkpoint();
        let made = make(self);
        if made.is_none() {
            self.reader.rollback(checkpoint);
        }
        made
    }

    fn take_if(&mut self, pred: impl FnOnce(&Token) -> bool) -> Option<Token> {
        pred(&self.reader.peek()).then(|| self.reader.take_token())
    }

    fn try_take_other(&mut self, ch: char) -> bool {
        self.take_if(|token| token.is_other(ch)).is_some()
    }

    fn try_take_word_of(&mut self, word: &str) -> bool {
        self.take_if(|token| token.is_word_of(word)).is_some()
    }

    fn try_take_word(&mut self) -> Option<Token> {
        self.take_if(Token::is_word)
    }

    /// Consume any run of spaces, returning whether there was one.
    fn skip_space(&mut self) -> bool {
        let mut skipped = false;
        while self.take_if(|token| token.kind() == TokenKind::Space).is_some() {
            skipped = true;
        }
        skipped
    }

    /// Optional trailing spaces, then the newline.
    fn try_end_of_line(&mut self) -> bool {
        self.try_make(|parser| {
            parser.skip_space();
            parser
                .take_if(|token| token.kind() == TokenKind::NewLine)
                .map(|_| ())
        })
        .is_some()
    }

    fn skip_to_end_of_line(&mut self) {
        loop {
            let token = self.reader.take_token();
            if token.is_none() || token.kind() == TokenKind::NewLine {
                break;
            }
        }
    }

    fn end_of_line(&mut self, command: &'static str) -> Result<(), ParseError> {
        if self.try_end_of_line() {
            Ok(())
        } else {
            Err(syntax(command, "unexpected trailing characters"))
        }
    }

    fn bare(&mut self, name: &'static str, command: Command) -> Result<Command, ParseError> {
        self.end_of_line(name)?;
        Ok(command)
    }

    fn hello(&mut self, command: &'static str) -> Result<String, ParseError> {
        if !self.skip_space() {
            return Err(syntax(command, "expected a domain or address literal"));
        }

        let domain = self
            .try_make(Self::address_literal)
            .or_else(|| self.try_make(Self::domain))
            .ok_or_else(|| syntax(command, "expected a domain or address literal"))?;

        self.end_of_line(command)?;
        Ok(domain)
    }

    fn mail(&mut self) -> Result<Command, ParseError> {
        let address = self
            .try_make(|parser| {
                parser.skip_space();
                (parser.try_take_word_of("FROM") && parser.try_take_other(':')).then_some(())?;
                parser.skip_space();
                parser.reverse_path()
            })
            .ok_or_else(|| syntax(Command::MAIL, "expected FROM:<reverse-path>"))?;

        let parameters = self.parameters(Command::MAIL)?;
        Ok(Command::Mail {
            address,
            parameters,
        })
    }

    fn rcpt(&mut self) -> Result<Command, ParseError> {
        let address = self
            .try_make(|parser| {
                parser.skip_space();
                (parser.try_take_word_of("TO") && parser.try_take_other(':')).then_some(())?;
                parser.skip_space();
                parser.forward_path()
            })
            .ok_or_else(|| syntax(Command::RCPT, "expected TO:<forward-path>"))?;

        let parameters = self.parameters(Command::RCPT)?;
        Ok(Command::Rcpt {
            address,
            parameters,
        })
    }

    /// `<>` or a path. `None` stands for the null path.
    fn reverse_path(&mut self) -> Option<Option<Mailbox>> {
        if self
            .try_make(|parser| (parser.try_take_other('<') && parser.try_take_other('>')).then_some(()))
            .is_some()
        {
            return Some(None);
        }

        self.path().map(Some)
    }

    /// `<Postmaster>`, matched without regard to case, or a path.
    fn forward_path(&mut self) -> Option<Mailbox> {
        self.try_make(|parser| {
            (parser.try_take_other('<')
                && parser.try_take_word_of("Postmaster")
                && parser.try_take_other('>'))
            .then(Mailbox::postmaster)
        })
        .or_else(|| self.path())
    }

    /// `<` [at-domain-list `:`] mailbox `>`. Source routes are discarded.
    fn path(&mut self) -> Option<Mailbox> {
        self.try_make(|parser| {
            parser.try_take_other('<').then_some(())?;
            parser.try_make(Self::source_route);
            let mailbox = parser.mailbox()?;
            parser.try_take_other('>').then_some(mailbox)
        })
    }

    fn source_route(&mut self) -> Option<()> {
        self.try_take_other('@').then_some(())?;
        self.domain()?;

        while self.try_take_other(',') {
            self.try_take_other('@').then_some(())?;
            self.domain()?;
        }

        self.try_take_other(':').then_some(())
    }

    /// Space separated `keyword[=value]` pairs up to the end of the line.
    fn parameters(&mut self, command: &'static str) -> Result<Parameters, ParseError> {
        let mut parameters = Parameters::new();

        loop {
            if self.try_end_of_line() {
                return Ok(parameters);
            }

            if !self.skip_space() {
                return Err(syntax(command, "expected a space before the parameter"));
            }

            let keyword = self
                .esmtp_keyword()
                .ok_or_else(|| syntax(command, "invalid parameter keyword"))?;

            let value = if self.try_take_other('=') {
                Some(
                    self.esmtp_value()
                        .ok_or_else(|| syntax(command, "invalid parameter value"))?,
                )
            } else {
                None
            };

            parameters.insert(keyword, value);
        }
    }

    fn esmtp_keyword(&mut self) -> Option<String> {
        let mut keyword = self.try_take_word()?.into_text();

        loop {
            if let Some(word) = self.try_take_word() {
                keyword.push_str(word.text());
            } else if self.try_take_other('-') {
                keyword.push('-');
            } else {
                return Some(keyword);
            }
        }
    }

    fn esmtp_value(&mut self) -> Option<String> {
        let mut value = String::new();

        while let Some(token) = self.take_if(|token| {
            matches!(token.kind(), TokenKind::Text | TokenKind::Number)
                || (token.kind() == TokenKind::Other && !token.is_other('='))
        }) {
            value.push_str(token.text());
        }

        (!value.is_empty()).then_some(value)
    }

    fn auth(&mut self) -> Result<Command, ParseError> {
        if !self.skip_space() {
            return Err(syntax(Command::AUTH, "expected a mechanism"));
        }

        let method = self
            .try_take_word()
            .and_then(|word| AuthenticationMethod::parse(word.text()))
            .ok_or_else(|| syntax(Command::AUTH, "unsupported mechanism"))?;

        let initial_response = self.try_make(|parser| {
            parser.skip_space().then_some(())?;
            let mut response = String::new();
            while let Some(token) = parser.take_if(|token| {
                matches!(
                    token.kind(),
                    TokenKind::Text | TokenKind::Number | TokenKind::Other
                )
            }) {
                response.push_str(token.text());
            }
            (!response.is_empty()).then_some(response)
        });

        self.end_of_line(Command::AUTH)?;
        Ok(Command::Auth {
            method,
            initial_response,
        })
    }

    /// `PROXY TCP4|TCP6 <src> <dst> <sport> <dport>`, or `PROXY UNKNOWN ...`.
    fn proxy(&mut self) -> Result<Command, ParseError> {
        if !self.skip_space() {
            return Err(syntax(Command::PROXY, "expected a protocol"));
        }

        let protocol = if self.try_take_word_of("TCP4") {
            ProxyProtocol::Tcp4
        } else if self.try_take_word_of("TCP6") {
            ProxyProtocol::Tcp6
        } else if self.try_take_word_of("UNKNOWN") {
            self.skip_to_end_of_line();
            return Ok(Command::Proxy {
                protocol: ProxyProtocol::Unknown,
                source: None,
                destination: None,
            });
        } else {
            return Err(syntax(Command::PROXY, "expected TCP4, TCP6 or UNKNOWN"));
        };

        let addresses = self
            .try_make(|parser| {
                let source = parser.proxy_address(protocol)?;
                let destination = parser.proxy_address(protocol)?;
                let source_port = parser.proxy_port()?;
                let destination_port = parser.proxy_port()?;
                Some((
                    SocketAddr::new(source, source_port),
                    SocketAddr::new(destination, destination_port),
                ))
            })
            .ok_or_else(|| syntax(Command::PROXY, "malformed addresses"))?;

        self.end_of_line(Command::PROXY)?;
        Ok(Command::Proxy {
            protocol,
            source: Some(addresses.0),
            destination: Some(addresses.1),
        })
    }

    fn proxy_address(&mut self, protocol: ProxyProtocol) -> Option<IpAddr> {
        self.skip_space().then_some(())?;
        let text = match protocol {
            ProxyProtocol::Tcp4 => self.try_make(Self::ipv4_literal)?,
            ProxyProtocol::Tcp6 => self.try_make(Self::ipv6_literal)?,
            ProxyProtocol::Unknown => return None,
        };
        text.parse().ok()
    }

    fn proxy_port(&mut self) -> Option<u16> {
        self.skip_space().then_some(())?;
        self.take_if(|token| token.kind() == TokenKind::Number)?
            .text()
            .parse()
            .ok()
    }
}
