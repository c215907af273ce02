use std::future::Future;

use tern_common::{internal, logging};
use tern_smtp::{Services, SessionEvent, SmtpServer};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Totals of how sessions ended, logged at shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionTally {
    pub created: usize,
    pub completed: usize,
    pub faulted: usize,
    pub cancelled: usize,
}

async fn count_sessions(mut events: UnboundedReceiver<SessionEvent>) -> SessionTally {
    let mut tally = SessionTally::default();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Created { .. } => tally.created += 1,
            SessionEvent::Completed { .. } => tally.completed += 1,
            SessionEvent::Faulted { id, error } => {
                tally.faulted += 1;
                if !error.is_client_error() {
                    internal!(level = WARN, "Session {id} ended with a server side fault: {error}");
                }
            }
            SessionEvent::Cancelled { .. } => tally.cancelled += 1,
        }
    }

    tally
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

pub struct Tern {
    config: Config,
    services: Services,
}

impl Tern {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            services: Services::default(),
        }
    }

    /// Use these collaborators instead of the defaults.
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Run until SIGINT or SIGTERM.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be initialised or an
    /// endpoint cannot be bound.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let tally = self
            .serve_until(async {
                if let Err(err) = shutdown().await {
                    internal!(level = ERROR, "Unable to listen for signals: {err}");
                }
            })
            .await?;

        internal!(
            level = INFO,
            "Served {} sessions: {} completed, {} faulted, {} cancelled",
            tally.created,
            tally.completed,
            tally.faulted,
            tally.cancelled
        );

        Ok(())
    }

    /// Serve until `stop` resolves, then cancel every session and wait for
    /// them to finish.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be initialised or an
    /// endpoint cannot be bound.
    pub async fn serve_until(
        mut self,
        stop: impl Future<Output = ()>,
    ) -> anyhow::Result<SessionTally> {
        self.config.init()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let server = SmtpServer::builder()
            .with_endpoints(self.config.endpoints)
            .with_options(self.config.server)
            .with_services(self.services)
            .with_events(sender)
            .bind()
            .await?;

        internal!(level = INFO, "Controller running on {:?}", server.local_addrs());

        let cancel = CancellationToken::new();
        let mut serving = tokio::spawn(server.serve(cancel.clone()));
        let tally = tokio::spawn(count_sessions(receiver));

        stop.await;
        internal!(level = INFO, "Shutting down...");
        cancel.cancel();

        tokio::select! {
            finished = &mut serving => finished?,
            _ = tokio::signal::ctrl_c() => {
                internal!(level = WARN, "Forcing shutdown");
                serving.abort();
            }
        }

        Ok(tally.await?)
    }
}
