use std::{net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use tern_common::internal;
use tokio::{sync::mpsc::UnboundedSender, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    context::SessionContext,
    endpoint::{EndpointDefinition, ServerOptions},
    error::{ServerError, TlsError},
    listener::EndpointListener,
    services::Services,
    session::{Observer, Session, SessionEvent},
    tls,
};

/// Everything needed to start serving: endpoints, options and collaborators.
#[derive(Debug, Default)]
pub struct SmtpServer {
    endpoints: Vec<EndpointDefinition>,
    options: ServerOptions,
    services: Services,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl SmtpServer {
    /// Create a new `SmtpServer` builder
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: EndpointDefinition) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    #[must_use]
    pub fn with_endpoints(
        mut self,
        endpoints: impl IntoIterator<Item = EndpointDefinition>,
    ) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Deliver every session's lifecycle notifications to `sender`.
    #[must_use]
    pub fn with_events(mut self, sender: UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Bind every endpoint's socket and prepare its TLS acceptor.
    ///
    /// # Errors
    /// [`ServerError::NoEndpoints`] without endpoints, a [`TlsError`] if an
    /// acceptor cannot be built or a secure endpoint has no certificate, or
    /// the bind failure.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        if self.endpoints.is_empty() {
            return Err(ServerError::NoEndpoints);
        }

        let mut listeners = Vec::with_capacity(self.endpoints.len());
        for endpoint in self.endpoints {
            let acceptor = match endpoint.certificate() {
                Some(certificate) => Some(tls::acceptor(
                    certificate,
                    endpoint.protocols(),
                    self.services.certificate_validator(),
                )?),
                None if endpoint.is_secure() => {
                    return Err(TlsError::MissingCertificate(endpoint.socket().to_string()).into());
                }
                None => None,
            };

            listeners.push(EndpointListener::bind(Arc::new(endpoint), acceptor).await?);
        }

        Ok(BoundServer {
            listeners,
            options: Arc::new(self.options),
            services: self.services,
            observer: Observer::new(self.events),
        })
    }
}

/// A server whose sockets are bound but not yet accepting.
pub struct BoundServer {
    listeners: Vec<EndpointListener>,
    options: Arc<ServerOptions>,
    services: Services,
    observer: Observer,
}

impl BoundServer {
    /// The address each endpoint ended up bound to, in configuration order.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }

    /// Accept connections until `cancel` fires, then wait for every session
    /// to finish.
    pub async fn serve(self, cancel: CancellationToken) {
        join_all(self.listeners.into_iter().map(|listener| {
            serve_endpoint(
                listener,
                Arc::clone(&self.options),
                self.services.clone(),
                self.observer.clone(),
                cancel.clone(),
            )
        }))
        .await;
    }
}

async fn serve_endpoint(
    listener: EndpointListener,
    options: Arc<ServerOptions>,
    services: Services,
    observer: Observer,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(err) = finished {
                    internal!(level = ERROR, "Session task failed: {err}");
                }
            }

            accepted = listener.accept(&cancel) => {
                let (stream, remote) = match accepted {
                    Ok(Some(connection)) => connection,
                    Ok(None) => break,
                    Err(err) => {
                        internal!(level = ERROR, "{err}");
                        continue;
                    }
                };

                let local = stream
                    .local_addr()
                    .unwrap_or_else(|_| listener.endpoint().socket());
                let context = SessionContext::new(
                    Arc::clone(listener.endpoint()),
                    Arc::clone(&options),
                    remote,
                    local,
                );
                let session = Session::new(
                    stream,
                    context,
                    &services,
                    listener.acceptor().cloned(),
                    observer.clone(),
                    cancel.child_token(),
                );

                sessions.spawn(session.run());
            }
        }
    }

    internal!(
        level = INFO,
        "Listener {} received shutdown, finishing {} sessions ...",
        listener.endpoint().socket(),
        sessions.len()
    );

    while let Some(finished) = sessions.join_next().await {
        if let Err(err) = finished {
            internal!(level = ERROR, "Session task failed: {err}");
        }
    }
}
