use std::{io, net::SocketAddr, sync::Arc};

use tern_common::{error::ListenerError, internal};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::endpoint::EndpointDefinition;

/// A bound socket for one endpoint, plus what its sessions need to upgrade.
pub struct EndpointListener {
    listener: TcpListener,
    endpoint: Arc<EndpointDefinition>,
    acceptor: Option<TlsAcceptor>,
}

impl EndpointListener {
    /// Bind the endpoint's socket. Port 0 picks a free port.
    ///
    /// # Errors
    /// [`ListenerError::BindFailed`] if the address cannot be bound.
    pub async fn bind(
        endpoint: Arc<EndpointDefinition>,
        acceptor: Option<TlsAcceptor>,
    ) -> Result<Self, ListenerError> {
        let socket = endpoint.socket();
        let listener = TcpListener::bind(socket)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: socket.to_string(),
                source,
            })?;

        internal!(
            level = INFO,
            "Listening on {}{}",
            listener.local_addr().unwrap_or(socket),
            if endpoint.is_secure() { " (implicit TLS)" } else { "" }
        );

        Ok(Self {
            listener,
            endpoint,
            acceptor,
        })
    }

    /// # Errors
    /// Returns the underlying I/O error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Arc<EndpointDefinition> {
        &self.endpoint
    }

    #[must_use]
    pub const fn acceptor(&self) -> Option<&TlsAcceptor> {
        self.acceptor.as_ref()
    }

    /// Wait for the next connection. Returns `Ok(None)` once `cancel` fires.
    ///
    /// # Errors
    /// [`ListenerError::AcceptFailed`] if accepting fails.
    pub async fn accept(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<(TcpStream, SocketAddr)>, ListenerError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(None),
            connection = self.listener.accept() => {
                let (stream, remote) = connection?;
                if let Err(err) = stream.set_nodelay(true) {
                    internal!(level = DEBUG, "Unable to set TCP_NODELAY for {remote}: {err}");
                }

                internal!(
                    level = DEBUG,
                    "Connection received on {} from {remote}",
                    self.endpoint.socket()
                );
                Ok(Some((stream, remote)))
            }
        }
    }
}
