use core::fmt::{self, Display, Formatter};
use std::net::SocketAddr;

/// An email address decomposed into its user and host parts.
///
/// The host is either a domain name or a bracketed address literal such as
/// `[127.0.0.1]` or `[IPv6:::1]`, kept exactly as it was spelled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox {
    user: String,
    host: String,
}

impl Mailbox {
    #[must_use]
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    /// The bare `<Postmaster>` recipient, which has no host part.
    #[must_use]
    pub fn postmaster() -> Self {
        Self::new("Postmaster", "")
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.host.is_empty() {
            f.write_str(&self.user)
        } else {
            write!(f, "{}@{}", self.user, self.host)
        }
    }
}

/// ESMTP parameters attached to MAIL or RCPT, in the order they were given.
///
/// Keys are compared without regard to case. A parameter without `=value` is
/// a flag and has no value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Parameters {
    entries: Vec<(String, Option<String>)>,
}

impl Parameters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add or replace a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.entries
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(key))
    }

    /// The value of `key`, if it is present and has a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
            .and_then(|(_, value)| value.as_deref())
    }

    /// The declared message size (RFC 1870), if any.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }
}

impl Display for Parameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }

            match value {
                Some(value) => write!(f, "{key}={value}")?,
                None => f.write_str(key)?,
            }
        }

        Ok(())
    }
}

/// SASL mechanisms the server negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationMethod {
    Login,
    Plain,
}

impl AuthenticationMethod {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else if name.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else {
            None
        }
    }
}

impl Display for AuthenticationMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Login => "LOGIN",
            Self::Plain => "PLAIN",
        })
    }
}

/// The address family announced by a PROXY line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyProtocol {
    Tcp4,
    Tcp6,
    Unknown,
}

impl Display for ProxyProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp4 => "TCP4",
            Self::Tcp6 => "TCP6",
            Self::Unknown => "UNKNOWN",
        })
    }
}

/// A parsed SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo {
        domain_or_address: String,
    },
    Ehlo {
        domain_or_address: String,
    },
    Mail {
        /// `None` for the null reverse-path `<>`.
        address: Option<Mailbox>,
        parameters: Parameters,
    },
    Rcpt {
        address: Mailbox,
        parameters: Parameters,
    },
    Data,
    Auth {
        method: AuthenticationMethod,
        initial_response: Option<String>,
    },
    StartTls,
    Noop,
    Rset,
    Quit,
    Proxy {
        protocol: ProxyProtocol,
        source: Option<SocketAddr>,
        destination: Option<SocketAddr>,
    },
}

impl Command {
    pub const HELO: &'static str = "HELO";
    pub const EHLO: &'static str = "EHLO";
    pub const MAIL: &'static str = "MAIL";
    pub const RCPT: &'static str = "RCPT";
    pub const DATA: &'static str = "DATA";
    pub const AUTH: &'static str = "AUTH";
    pub const STARTTLS: &'static str = "STARTTLS";
    pub const NOOP: &'static str = "NOOP";
    pub const RSET: &'static str = "RSET";
    pub const QUIT: &'static str = "QUIT";
    pub const PROXY: &'static str = "PROXY";

    /// The canonical verb, used as the state table key.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Helo { .. } => Self::HELO,
            Self::Ehlo { .. } => Self::EHLO,
            Self::Mail { .. } => Self::MAIL,
            Self::Rcpt { .. } => Self::RCPT,
            Self::Data => Self::DATA,
            Self::Auth { .. } => Self::AUTH,
            Self::StartTls => Self::STARTTLS,
            Self::Noop => Self::NOOP,
            Self::Rset => Self::RSET,
            Self::Quit => Self::QUIT,
            Self::Proxy { .. } => Self::PROXY,
        }
    }
}

/// Renders the command the way a client would have sent it, for tracing.
/// AUTH initial responses carry credentials and are never rendered.
impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo { domain_or_address } | Self::Ehlo { domain_or_address } => {
                write!(f, "{} {domain_or_address}", self.name())
            }
            Self::Mail {
                address,
                parameters,
            } => {
                match address {
                    Some(address) => write!(f, "MAIL FROM:<{address}>")?,
                    None => f.write_str("MAIL FROM:<>")?,
                }
                if !parameters.is_empty() {
                    write!(f, " {parameters}")?;
                }
                Ok(())
            }
            Self::Rcpt {
                address,
                parameters,
            } => {
                write!(f, "RCPT TO:<{address}>")?;
                if !parameters.is_empty() {
                    write!(f, " {parameters}")?;
                }
                Ok(())
            }
            Self::Auth {
                method,
                initial_response,
            } => {
                write!(f, "AUTH {method}")?;
                if initial_response.is_some() {
                    f.write_str(" <redacted>")?;
                }
                Ok(())
            }
            Self::Proxy {
                protocol,
                source,
                destination,
            } => {
                write!(f, "PROXY {protocol}")?;
                if let (Some(source), Some(destination)) = (source, destination) {
                    write!(
                        f,
                        " {} {} {} {}",
                        source.ip(),
                        destination.ip(),
                        source.port(),
                        destination.port()
                    )?;
                }
                Ok(())
            }
            Self::Data | Self::StartTls | Self::Noop | Self::Rset | Self::Quit => {
                f.write_str(self.name())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parameters_are_ordered_and_case_insensitive() {
        let mut parameters = Parameters::new();
        parameters.insert("SIZE", Some("1024".to_string()));
        parameters.insert("BODY", Some("8BITMIME".to_string()));
        parameters.insert("SMTPUTF8", None);

        assert_eq!(parameters.size(), Some(1024));
        assert_eq!(parameters.get("body"), Some("8BITMIME"));
        assert!(parameters.has("smtputf8"));
        assert_eq!(parameters.get("SMTPUTF8"), None);
        assert_eq!(parameters.to_string(), "SIZE=1024 BODY=8BITMIME SMTPUTF8");

        parameters.insert("size", Some("2048".to_string()));
        assert_eq!(parameters.len(), 3);
        assert_eq!(parameters.size(), Some(2048));
    }

    #[test]
    fn mailbox_display() {
        assert_eq!(Mailbox::new("to", "sample.com").to_string(), "to@sample.com");
        assert_eq!(Mailbox::postmaster().to_string(), "Postmaster");
    }

    #[test]
    fn auth_display_hides_credentials() {
        let command = Command::Auth {
            method: AuthenticationMethod::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };

        assert_eq!(command.to_string(), "AUTH PLAIN <redacted>");
        assert_eq!(command.name(), "AUTH");
    }

    #[test]
    fn mail_display() {
        let command = Command::Mail {
            address: Some(Mailbox::new("from", "sample.com")),
            parameters: Parameters::new(),
        };
        assert_eq!(command.to_string(), "MAIL FROM:<from@sample.com>");

        let bounce = Command::Mail {
            address: None,
            parameters: Parameters::new(),
        };
        assert_eq!(bounce.to_string(), "MAIL FROM:<>");
    }
}
