//! Error types shared by the listener and the session loop.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client violated the protocol in a way the session cannot recover from.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The underlying transport failed.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// The client closed the connection in the middle of a command or message.
    #[error("Connection closed by peer")]
    Closed,

    /// The TLS handshake or its configuration failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The session was cancelled, either on its own or by a server shutdown.
    #[error("Session cancelled")]
    Cancelled,

    /// No input arrived within the command wait timeout.
    #[error("Session timed out after {0:?}")]
    Timeout(Duration),
}

impl SessionError {
    /// Returns `true` if the session ended because it was asked to.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if the client is to blame for the session ending.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_) | Self::Closed)
    }
}

/// Errors raised by an endpoint listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to the configured socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}
