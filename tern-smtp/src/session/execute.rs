use std::net::SocketAddr;

use bytes::Bytes;
use tern_common::{error::SessionError, internal};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Flow, Session};
use crate::{
    authentication::{
        self, Credentials, LOGIN_PASSWORD_CHALLENGE, LOGIN_USERNAME_CHALLENGE, SaslError,
    },
    command::{AuthenticationMethod, Command, Mailbox, Parameters, ProxyProtocol},
    connection::DotUnstuffer,
    response::{ReplyCode, Response},
};

/// Property holding the client address a PROXY line announced.
pub const PROXY_SOURCE: &str = "proxy.source";
/// Property holding the server address a PROXY line announced.
pub const PROXY_DESTINATION: &str = "proxy.destination";

fn joined(line: &[Bytes]) -> String {
    let mut bytes = Vec::with_capacity(line.iter().map(Bytes::len).sum());
    for segment in line {
        bytes.extend_from_slice(segment);
    }
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Run a command the state machine has already accepted. Each handler
    /// commits the pending transition only if the command succeeded.
    pub(super) async fn execute(&mut self, command: Command) -> Result<Flow, SessionError> {
        match command {
            Command::Helo { domain_or_address } => self.helo(&domain_or_address).await,
            Command::Ehlo { domain_or_address } => self.ehlo(&domain_or_address).await,
            Command::Mail {
                address,
                parameters,
            } => self.mail(address, parameters).await,
            Command::Rcpt { address, .. } => self.rcpt(address).await,
            Command::Data => self.data().await,
            Command::Auth {
                method,
                initial_response,
            } => self.auth(method, initial_response).await,
            Command::StartTls => self.start_tls().await,
            Command::Proxy {
                protocol,
                source,
                destination,
            } => {
                self.proxy(protocol, source, destination);
                Ok(Flow::Continue)
            }
            Command::Noop => self.commit_with(&Response::OK).await,
            Command::Rset => {
                self.context.transaction_mut().reset();
                self.commit_with(&Response::OK).await
            }
            Command::Quit => {
                self.context.set_quit();
                self.commit_with(&Response::CLOSING).await?;
                Ok(Flow::Close)
            }
        }
    }

    async fn commit_with(&mut self, response: &Response) -> Result<Flow, SessionError> {
        self.machine.commit(&mut self.context);
        self.write(response).await?;
        Ok(Flow::Continue)
    }

    async fn helo(&mut self, domain: &str) -> Result<Flow, SessionError> {
        let response = Response::new(
            ReplyCode::Ok,
            format!("{} Hello {domain}", self.context.options().name),
        );
        self.commit_with(&response).await
    }

    /// The EHLO reply: a greeting line, then one capability per line.
    fn capabilities(&self, domain: &str) -> Response {
        let options = self.context.options();
        let endpoint = self.context.endpoint();
        let mut lines = vec![
            format!("{} Hello {domain}", options.name),
            "PIPELINING".to_string(),
            "8BITMIME".to_string(),
            "SMTPUTF8".to_string(),
        ];

        if options.max_message_size > 0 {
            lines.push(format!("SIZE {}", options.max_message_size));
        } else {
            lines.push("SIZE".to_string());
        }

        if endpoint.has_certificate() && self.acceptor.is_some() && !self.context.is_secure() {
            lines.push("STARTTLS".to_string());
        }

        if (self.context.is_secure() || endpoint.allow_unsecure_authentication())
            && !self.context.is_authenticated()
        {
            lines.push("AUTH PLAIN LOGIN".to_string());
        }

        Response::new(ReplyCode::Ok, lines.join("\n"))
    }

    async fn ehlo(&mut self, domain: &str) -> Result<Flow, SessionError> {
        let response = self.capabilities(domain);
        self.commit_with(&response).await
    }

    async fn mail(
        &mut self,
        from: Option<Mailbox>,
        parameters: Parameters,
    ) -> Result<Flow, SessionError> {
        let size = parameters.size().unwrap_or(0);
        if self.context.options().exceeds_message_size(size) {
            self.write(&Response::SIZE_LIMIT_EXCEEDED).await?;
            return Ok(Flow::Continue);
        }

        let verdict = self
            .services
            .mailbox_filter
            .can_accept_from(&self.context, from.as_ref(), size)
            .await;

        if !verdict.is_accepted() {
            internal!(level = DEBUG, "Sender rejected: {verdict:?}");
            self.write(&verdict.response()).await?;
            return Ok(Flow::Continue);
        }

        self.context.transaction_mut().begin(from, parameters);
        self.commit_with(&Response::OK).await
    }

    async fn rcpt(&mut self, to: Mailbox) -> Result<Flow, SessionError> {
        let verdict = self
            .services
            .mailbox_filter
            .can_deliver_to(&self.context, &to, self.context.transaction().from())
            .await;

        if !verdict.is_accepted() {
            internal!(level = DEBUG, "Recipient {to} rejected: {verdict:?}");
            self.write(&verdict.response()).await?;
            return Ok(Flow::Continue);
        }

        self.context.transaction_mut().add_recipient(to);
        self.commit_with(&Response::OK).await
    }

    /// Read the dot-terminated block and hand it to the store. The
    /// transaction ends whatever the outcome.
    async fn data(&mut self) -> Result<Flow, SessionError> {
        self.write(&Response::START_MAIL_INPUT).await?;

        let mut content = DotUnstuffer::new(self.context.options().max_message_size);
        loop {
            let Some(line) = self.read_line().await? else {
                return Err(SessionError::Closed);
            };

            if content.push_line(&line) {
                break;
            }
        }

        let response = if content.exceeded() {
            internal!(
                level = INFO,
                "Message of {} bytes exceeds the limit of {}",
                content.size(),
                self.context.options().max_message_size
            );
            Response::SIZE_LIMIT_EXCEEDED
        } else {
            self.context.transaction_mut().set_size(content.size());
            self.services
                .message_store
                .save(&self.context, self.context.transaction(), content.finish())
                .await
        };

        self.commit_with(&response).await
    }

    async fn start_tls(&mut self) -> Result<Flow, SessionError> {
        if self.acceptor.is_none() {
            self.write(&Response::TLS_NOT_AVAILABLE).await?;
            return Ok(Flow::Continue);
        }

        self.write(&Response::SERVICE_READY).await?;
        self.upgrade().await?;
        self.machine.commit(&mut self.context);
        internal!(level = DEBUG, "Session {} is now secure", self.context.id());
        Ok(Flow::Continue)
    }

    fn proxy(
        &mut self,
        protocol: ProxyProtocol,
        source: Option<SocketAddr>,
        destination: Option<SocketAddr>,
    ) {
        internal!(level = DEBUG, "PROXY {protocol} {source:?} -> {destination:?}");

        if let Some(source) = source {
            self.context.set_remote(source);
            self.context.properties_mut().insert(PROXY_SOURCE, source);
        }

        if let Some(destination) = destination {
            self.context
                .properties_mut()
                .insert(PROXY_DESTINATION, destination);
        }

        self.machine.commit(&mut self.context);
    }

    /// Send a 334 challenge and decode the reply.
    async fn challenge(
        &mut self,
        challenge: &'static str,
    ) -> Result<Result<String, SaslError>, SessionError> {
        self.write(&Response::fixed(ReplyCode::Continue, challenge))
            .await?;

        let Some(line) = self.read_line().await? else {
            return Err(SessionError::Closed);
        };

        Ok(authentication::decode_response(&joined(&line)))
    }

    async fn credentials(
        &mut self,
        method: AuthenticationMethod,
        initial_response: Option<String>,
    ) -> Result<Result<Credentials, SaslError>, SessionError> {
        match method {
            AuthenticationMethod::Plain => {
                let response = match initial_response {
                    Some(response) if response == "=" => String::new(),
                    Some(response) => response,
                    None => {
                        self.write(&Response::fixed(ReplyCode::Continue, ""))
                            .await?;
                        let Some(line) = self.read_line().await? else {
                            return Err(SessionError::Closed);
                        };
                        joined(&line)
                    }
                };

                Ok(authentication::decode_plain(&response))
            }
            AuthenticationMethod::Login => {
                let user = match initial_response {
                    Some(response) => authentication::decode_response(&response),
                    None => self.challenge(LOGIN_USERNAME_CHALLENGE).await?,
                };
                let user = match user {
                    Ok(user) => user,
                    Err(err) => return Ok(Err(err)),
                };

                let password = match self.challenge(LOGIN_PASSWORD_CHALLENGE).await? {
                    Ok(password) => password,
                    Err(err) => return Ok(Err(err)),
                };

                Ok(Ok(Credentials { user, password }))
            }
        }
    }

    async fn auth(
        &mut self,
        method: AuthenticationMethod,
        initial_response: Option<String>,
    ) -> Result<Flow, SessionError> {
        let credentials = match self.credentials(method, initial_response).await? {
            Ok(credentials) => credentials,
            Err(SaslError::Cancelled) => {
                self.write(&Response::AUTH_CANCELLED).await?;
                return Ok(Flow::Continue);
            }
            Err(SaslError::InvalidEncoding | SaslError::Malformed) => {
                self.write(&Response::INVALID_BASE64).await?;
                return Ok(Flow::Continue);
            }
        };

        let accepted = self
            .services
            .user_authenticator
            .authenticate(&self.context, &credentials.user, &credentials.password)
            .await;

        if accepted {
            internal!(level = INFO, "Authenticated {} using {method}", credentials.user);
            self.context.set_authenticated(credentials.user);
            return self.commit_with(&Response::AUTH_SUCCESSFUL).await;
        }

        let failures = self.context.record_authentication_failure();
        internal!(
            level = INFO,
            "Authentication failed for {} ({failures} so far)",
            credentials.user
        );

        if failures >= self.context.options().max_authentication_attempts {
            self.write(&Response::TOO_MANY_AUTH_FAILURES).await?;
            return Ok(Flow::Close);
        }

        self.write(&Response::AUTH_FAILED).await?;
        Ok(Flow::Continue)
    }
}
