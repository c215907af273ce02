//! One task per connection: read a line, parse it, validate it against the
//! state machine, execute it, reply, repeat.

mod events;
mod execute;

use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use tern_common::{error::SessionError, incoming, internal};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

pub use self::{
    events::{Observer, SessionEvent, SessionOutcome},
    execute::{PROXY_DESTINATION, PROXY_SOURCE},
};
use crate::{
    connection::Pipe,
    context::SessionContext,
    error::ParseError,
    parser::Parser,
    response::{ReplyCode, Response},
    services::{Services, SessionServices},
    state_machine::StateMachine,
};

/// How long a closing session waits to deliver its last reply.
const FAREWELL_WAIT: Duration = Duration::from_secs(1);

/// Whether the session carries on after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

/// Run `future`, giving up on cancellation or after `wait`.
async fn bounded<T, E>(
    cancel: &CancellationToken,
    wait: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, SessionError>
where
    SessionError: From<E>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SessionError::Cancelled),
        result = tokio::time::timeout(wait, future) => match result {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::Timeout(wait)),
        },
    }
}

pub struct Session<Stream> {
    pipe: Pipe<Stream>,
    context: SessionContext,
    machine: StateMachine,
    services: SessionServices,
    acceptor: Option<TlsAcceptor>,
    observer: Observer,
    cancel: CancellationToken,
    retries: usize,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// `acceptor` is needed for STARTTLS and implicit TLS; without one,
    /// neither is offered.
    #[must_use]
    pub fn new(
        stream: Stream,
        context: SessionContext,
        services: &Services,
        acceptor: Option<TlsAcceptor>,
        observer: Observer,
        cancel: CancellationToken,
    ) -> Self {
        let pipe = Pipe::new(stream, context.options().network_buffer_size);
        let services = services.for_session(&context);

        Self {
            pipe,
            context,
            machine: StateMachine::new(),
            services,
            acceptor,
            observer,
            cancel,
            retries: 0,
        }
    }

    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Drive the connection until QUIT, a fault, or cancellation. Implicit
    /// TLS endpoints finish the handshake before the session is announced.
    pub async fn run(mut self) -> SessionOutcome {
        let id = self.context.id();
        let upgraded = if self.context.endpoint().is_secure() {
            self.upgrade().await
        } else {
            Ok(())
        };

        self.observer.notify(SessionEvent::Created {
            id,
            remote: self.context.remote(),
        });

        let served = match upgraded {
            Ok(()) => self.serve().await,
            Err(err) => Err(err),
        };

        let outcome = match served {
            Ok(()) => SessionOutcome::Completed,
            Err(error) if error.is_shutdown() => SessionOutcome::Cancelled,
            Err(error) => {
                if matches!(error, SessionError::Timeout(_)) {
                    self.farewell(&Response::TIMED_OUT).await;
                }
                SessionOutcome::Faulted(Arc::new(error))
            }
        };

        if let Ok(Err(err)) = tokio::time::timeout(FAREWELL_WAIT, self.pipe.shutdown()).await {
            internal!(level = DEBUG, "Error closing connection: {err}");
        }

        self.observer.notify(outcome.clone().into_event(id));
        outcome
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        let greeting = Response::new(
            ReplyCode::ServiceReady,
            format!("{} ESMTP ready", self.context.options().name),
        );
        self.write(&greeting).await?;

        loop {
            let Some(line) = self.read_line().await? else {
                internal!("Connection closed by client");
                return Ok(());
            };

            if self.handle_line(&line).await? == Flow::Close || self.context.is_quitting() {
                return Ok(());
            }
        }
    }

    async fn handle_line(&mut self, line: &[Bytes]) -> Result<Flow, SessionError> {
        let command = match Parser::new(line).parse_command() {
            Ok(command) => command,
            Err(err) => {
                incoming!(level = DEBUG, "Rejected line: {err}");
                let response = match err {
                    ParseError::UnrecognizedCommand => StateMachine::unrecognized(&self.context),
                    ParseError::Syntax { .. } => StateMachine::syntax_error(&self.context),
                };
                return self.reject(&response).await;
            }
        };

        incoming!("{command}");

        if let Err(response) = self.machine.try_accept(&self.context, command.name()) {
            return self.reject(&response).await;
        }

        self.retries = 0;
        let flow = self.execute(command).await;
        // Anything not committed by the command is dropped here.
        self.machine.abandon();
        flow
    }

    /// Reply to a rejected command, closing once the client has used up
    /// its retries.
    async fn reject(&mut self, response: &Response) -> Result<Flow, SessionError> {
        self.write(response).await?;
        self.retries += 1;

        if self.retries > self.context.options().max_retry_count {
            internal!(
                level = INFO,
                "Closing session {} after {} rejected commands",
                self.context.id(),
                self.retries
            );
            self.write(&Response::TOO_MANY_ERRORS).await?;
            return Ok(Flow::Close);
        }

        Ok(Flow::Continue)
    }

    /// Switch the pipe to TLS and mark the context secure.
    async fn upgrade(&mut self) -> Result<(), SessionError> {
        let Some(acceptor) = self.acceptor.clone() else {
            return Err(SessionError::Tls(
                "no certificate available for this endpoint".to_string(),
            ));
        };

        let wait = self.context.endpoint().command_wait();
        bounded(&self.cancel, wait, self.pipe.upgrade(&acceptor)).await?;
        self.context.set_secure();
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<Vec<Bytes>>, SessionError> {
        let wait = self.context.endpoint().command_wait();
        bounded(&self.cancel, wait, self.pipe.read_line()).await
    }

    async fn write(&mut self, response: &Response) -> Result<(), SessionError> {
        let wait = self.context.endpoint().command_wait();
        bounded(&self.cancel, wait, self.pipe.write_response(response)).await
    }

    /// Best effort final reply; failures are only logged.
    async fn farewell(&mut self, response: &Response) {
        match tokio::time::timeout(FAREWELL_WAIT, self.pipe.write_response(response)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => internal!(level = DEBUG, "Unable to send {response}: {err}"),
            Err(_) => internal!(level = DEBUG, "Timed out sending {response}"),
        }
    }
}
