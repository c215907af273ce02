//! Error types for the tern-smtp engine.
//!
//! Grammar failures, pipe failures and TLS failures each get their own enum;
//! the session loop folds them into [`tern_common::error::SessionError`].

use std::io;

use tern_common::error::{ListenerError, SessionError};
use thiserror::Error;

/// Errors that can occur while reading from or writing to a pipe.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error during connection operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection was closed by peer.
    #[error("Connection closed by peer")]
    Closed,

    /// The client sent a line longer than the server accepts.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The pipe was already upgraded, or torn down by a failed upgrade.
    #[error("Connection is not in a usable state: {0}")]
    InvalidState(&'static str),
}

/// Errors that can occur during TLS operations.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Failed to load TLS certificate.
    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to load TLS private key.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// A secure endpoint was configured without a certificate.
    #[error("Endpoint {0} requires a certificate")]
    MissingCertificate(String),

    /// The pipe is already secure.
    #[error("Connection is already secure")]
    AlreadySecure,

    /// TLS handshake or upgrade failed.
    #[error("TLS upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Rustls library error.
    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// Why a command line failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The verb is not one the server knows.
    #[error("Unrecognized command")]
    UnrecognizedCommand,

    /// The verb is known but its arguments are malformed.
    #[error("Syntax error in {command}: {reason}")]
    Syntax {
        command: &'static str,
        reason: &'static str,
    },
}

/// Errors raised while binding or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("No endpoints configured")]
    NoEndpoints,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Specialized `Result` type for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Specialized `Result` type for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Io(err) => Self::Connection(err),
            ConnectionError::Closed => Self::Closed,
            ConnectionError::LineTooLong(_) => Self::Protocol(err.to_string()),
            ConnectionError::InvalidState(_) => {
                Self::Connection(io::Error::other(err.to_string()))
            }
        }
    }
}

impl From<TlsError> for SessionError {
    fn from(err: TlsError) -> Self {
        Self::Tls(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::LineTooLong(1000);
        assert_eq!(err.to_string(), "Line exceeds 1000 bytes");

        let err = ConnectionError::Closed;
        assert_eq!(err.to_string(), "Connection closed by peer");
    }

    #[test]
    fn test_tls_error_display() {
        let err = TlsError::KeyLoad {
            path: "/path/to/key.pem".to_string(),
            reason: "no private key found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load TLS private key from /path/to/key.pem: no private key found"
        );

        let err = TlsError::MissingCertificate("0.0.0.0:465".to_string());
        assert_eq!(err.to_string(), "Endpoint 0.0.0.0:465 requires a certificate");
    }

    #[test]
    fn test_session_error_conversion() {
        let err: SessionError = ConnectionError::Closed.into();
        assert!(matches!(err, SessionError::Closed));

        let err: SessionError = ConnectionError::LineTooLong(10).into();
        assert!(err.is_client_error());

        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err: SessionError = ConnectionError::from(io_err).into();
        assert!(matches!(err, SessionError::Connection(_)));

        let err: SessionError = TlsError::AlreadySecure.into();
        assert!(matches!(err, SessionError::Tls(_)));
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::Syntax {
            command: "MAIL",
            reason: "expected FROM:",
        };
        assert_eq!(err.to_string(), "Syntax error in MAIL: expected FROM:");
    }
}
