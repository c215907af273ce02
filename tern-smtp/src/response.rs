use core::fmt::{self, Display, Formatter, Write};
use std::borrow::Cow;

/// SMTP reply codes used by the server.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ReplyCode {
    ServiceReady,
    Closing,
    AuthSuccessful,
    Ok,
    Continue,
    StartMailInput,
    ServiceUnavailable,
    MailboxBusy,
    ErrorInProcessing,
    TlsNotAvailable,
    CommandUnrecognized,
    SyntaxError,
    AuthRequired,
    AuthFailed,
    MailboxUnavailable,
    ExceededStorage,
    TransactionFailed,
    Unknown(u16),
}

impl ReplyCode {
    /// Checks if the code is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        u16::from(self) >= 500
    }

    /// Checks if the code is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u16::from(self))
    }

    /// Checks if the code is a positive completion or intermediate reply
    #[must_use]
    pub fn is_positive(self) -> bool {
        u16::from(self) < 400
    }
}

impl From<u16> for ReplyCode {
    fn from(value: u16) -> Self {
        match value {
            220 => Self::ServiceReady,
            221 => Self::Closing,
            235 => Self::AuthSuccessful,
            250 => Self::Ok,
            334 => Self::Continue,
            354 => Self::StartMailInput,
            421 => Self::ServiceUnavailable,
            450 => Self::MailboxBusy,
            451 => Self::ErrorInProcessing,
            454 => Self::TlsNotAvailable,
            500 => Self::CommandUnrecognized,
            501 => Self::SyntaxError,
            530 => Self::AuthRequired,
            535 => Self::AuthFailed,
            550 => Self::MailboxUnavailable,
            552 => Self::ExceededStorage,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<ReplyCode> for u16 {
    fn from(value: ReplyCode) -> Self {
        match value {
            ReplyCode::ServiceReady => 220,
            ReplyCode::Closing => 221,
            ReplyCode::AuthSuccessful => 235,
            ReplyCode::Ok => 250,
            ReplyCode::Continue => 334,
            ReplyCode::StartMailInput => 354,
            ReplyCode::ServiceUnavailable => 421,
            ReplyCode::MailboxBusy => 450,
            ReplyCode::ErrorInProcessing => 451,
            ReplyCode::TlsNotAvailable => 454,
            ReplyCode::CommandUnrecognized => 500,
            ReplyCode::SyntaxError => 501,
            ReplyCode::AuthRequired => 530,
            ReplyCode::AuthFailed => 535,
            ReplyCode::MailboxUnavailable => 550,
            ReplyCode::ExceededStorage => 552,
            ReplyCode::TransactionFailed => 554,
            ReplyCode::Unknown(v) => v,
        }
    }
}

impl Display for ReplyCode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", u16::from(*self))
    }
}

/// A reply sent to the client.
///
/// Text containing `\n` is written as a multi-line reply, one line per
/// segment, with `-` continuation markers on all but the last.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Response {
    code: ReplyCode,
    text: Cow<'static, str>,
}

impl Response {
    pub const SERVICE_READY: Self = Self::fixed(ReplyCode::ServiceReady, "Ready to start TLS");
    pub const CLOSING: Self = Self::fixed(ReplyCode::Closing, "Bye");
    pub const AUTH_SUCCESSFUL: Self =
        Self::fixed(ReplyCode::AuthSuccessful, "Authentication successful");
    pub const OK: Self = Self::fixed(ReplyCode::Ok, "Ok");
    pub const START_MAIL_INPUT: Self =
        Self::fixed(ReplyCode::StartMailInput, "Start mail input; end with <CRLF>.<CRLF>");
    pub const TOO_MANY_ERRORS: Self = Self::fixed(
        ReplyCode::ServiceUnavailable,
        "too many errors, closing connection",
    );
    pub const TOO_MANY_AUTH_FAILURES: Self = Self::fixed(
        ReplyCode::ServiceUnavailable,
        "too many authentication failures, closing connection",
    );
    pub const TIMED_OUT: Self = Self::fixed(
        ReplyCode::ServiceUnavailable,
        "Timeout waiting for command, closing connection",
    );
    pub const MAILBOX_BUSY: Self = Self::fixed(
        ReplyCode::MailboxBusy,
        "Requested mail action not taken: mailbox unavailable",
    );
    pub const TLS_NOT_AVAILABLE: Self = Self::fixed(
        ReplyCode::TlsNotAvailable,
        "TLS not available due to temporary reason",
    );
    pub const AUTH_CANCELLED: Self =
        Self::fixed(ReplyCode::SyntaxError, "Authentication cancelled");
    pub const INVALID_BASE64: Self =
        Self::fixed(ReplyCode::SyntaxError, "Invalid base64 encoding");
    pub const AUTH_REQUIRED: Self =
        Self::fixed(ReplyCode::AuthRequired, "Authentication required");
    pub const AUTH_FAILED: Self = Self::fixed(
        ReplyCode::AuthFailed,
        "Authentication credentials invalid",
    );
    pub const MAILBOX_UNAVAILABLE: Self = Self::fixed(
        ReplyCode::MailboxUnavailable,
        "Requested action not taken: mailbox unavailable",
    );
    pub const SIZE_LIMIT_EXCEEDED: Self = Self::fixed(
        ReplyCode::ExceededStorage,
        "Requested mail action aborted: exceeded storage allocation",
    );

    #[must_use]
    pub const fn fixed(code: ReplyCode, text: &'static str) -> Self {
        Self {
            code,
            text: Cow::Borrowed(text),
        }
    }

    #[must_use]
    pub fn new(code: ReplyCode, text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// A 501 reply naming the commands the client may send instead.
    #[must_use]
    pub fn syntax_error<'a>(expected: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_expected(ReplyCode::SyntaxError, expected)
    }

    /// A 500 reply for a verb the server does not know.
    #[must_use]
    pub fn unrecognized<'a>(expected: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_expected(ReplyCode::CommandUnrecognized, expected)
    }

    fn with_expected<'a>(code: ReplyCode, expected: impl IntoIterator<Item = &'a str>) -> Self {
        let expected = expected.into_iter().collect::<Vec<_>>().join("/");
        if expected.is_empty() {
            Self::new(code, "syntax error")
        } else {
            Self::new(code, format!("syntax error, expected {expected}"))
        }
    }

    #[must_use]
    pub const fn code(&self) -> ReplyCode {
        self.code
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Render the reply as it goes on the wire, CRLF terminated.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut lines = self.text.split('\n').peekable();
        let mut rendered = String::new();

        while let Some(line) = lines.next() {
            let separator = if lines.peek().is_some() { '-' } else { ' ' };
            let _ = write!(rendered, "{}{separator}{}\r\n", self.code, line.trim_end());
        }

        rendered
    }
}

impl Display for Response {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} {}", self.code, self.text.replace('\n', " | "))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reply_code() {
        assert!(ReplyCode::MailboxUnavailable.is_permanent());
        assert!(!ReplyCode::MailboxUnavailable.is_temporary());

        assert!(ReplyCode::MailboxBusy.is_temporary());
        assert!(!ReplyCode::MailboxBusy.is_permanent());

        assert!(ReplyCode::StartMailInput.is_positive());

        assert_eq!(ReplyCode::from(535), ReplyCode::AuthFailed);
        assert_eq!(u16::from(ReplyCode::AuthRequired), 530);
        assert_eq!(ReplyCode::from(299), ReplyCode::Unknown(299));
    }

    #[test]
    fn single_line_wire_format() {
        assert_eq!(Response::OK.to_wire(), "250 Ok\r\n");
    }

    #[test]
    fn multi_line_wire_format() {
        let response = Response::new(ReplyCode::Ok, "mx Hello client\nPIPELINING\nSIZE 100");
        assert_eq!(
            response.to_wire(),
            "250-mx Hello client\r\n250-PIPELINING\r\n250 SIZE 100\r\n"
        );
    }

    #[test]
    fn syntax_error_lists_expected_commands() {
        let response = Response::syntax_error(["DATA", "NOOP", "QUIT"]);
        assert_eq!(response.code(), ReplyCode::SyntaxError);
        assert_eq!(response.text(), "syntax error, expected DATA/NOOP/QUIT");

        let response = Response::unrecognized(std::iter::empty());
        assert_eq!(response.to_wire(), "500 syntax error\r\n");
    }
}
