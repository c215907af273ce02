use std::{net::SocketAddr, sync::Arc};

use tern_common::{error::SessionError, internal};
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle notification for one session.
///
/// Every session emits exactly one `Created`, then exactly one of the
/// terminal variants.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created { id: u64, remote: SocketAddr },
    Completed { id: u64 },
    Faulted { id: u64, error: Arc<SessionError> },
    Cancelled { id: u64 },
}

impl SessionEvent {
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Created { id, .. }
            | Self::Completed { id }
            | Self::Faulted { id, .. }
            | Self::Cancelled { id } => *id,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created { .. })
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed,
    Faulted(Arc<SessionError>),
    Cancelled,
}

impl SessionOutcome {
    pub(crate) fn into_event(self, id: u64) -> SessionEvent {
        match self {
            Self::Completed => SessionEvent::Completed { id },
            Self::Faulted(error) => SessionEvent::Faulted { id, error },
            Self::Cancelled => SessionEvent::Cancelled { id },
        }
    }
}

/// Delivers [`SessionEvent`]s to whoever is listening, if anyone.
#[derive(Debug, Clone, Default)]
pub struct Observer {
    sender: Option<UnboundedSender<SessionEvent>>,
}

impl Observer {
    #[must_use]
    pub const fn new(sender: Option<UnboundedSender<SessionEvent>>) -> Self {
        Self { sender }
    }

    pub fn notify(&self, event: SessionEvent) {
        match &event {
            SessionEvent::Created { id, remote } => {
                internal!(level = DEBUG, "Session {id} created for {remote}");
            }
            SessionEvent::Completed { id } => {
                internal!(level = DEBUG, "Session {id} completed");
            }
            SessionEvent::Faulted { id, error } => {
                internal!(level = WARN, "Session {id} faulted: {error}");
            }
            SessionEvent::Cancelled { id } => {
                internal!(level = DEBUG, "Session {id} cancelled");
            }
        }

        if let Some(sender) = &self.sender {
            // A dropped receiver only means nobody is listening any more.
            let _ = sender.send(event);
        }
    }
}
