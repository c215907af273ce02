pub mod authentication;
pub mod command;
pub mod connection;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod listener;
pub mod parser;
pub mod response;
pub mod server;
pub mod services;
pub mod session;
pub mod state;
pub mod state_machine;
pub mod store;
pub mod tls;
pub mod token;
pub mod tokenizer;

pub use crate::{
    authentication::{DefaultUserAuthenticator, UserAuthenticator, UserAuthenticatorFactory},
    command::{Command, Mailbox, Parameters},
    context::{MessageTransaction, SessionContext},
    endpoint::{EndpointDefinition, ServerOptions},
    filter::{CompositeMailboxFilter, DefaultMailboxFilter, MailboxFilter, MailboxFilterResult},
    response::{ReplyCode, Response},
    server::{BoundServer, SmtpServer},
    services::Services,
    session::{SessionEvent, SessionOutcome},
    store::{DefaultMessageStore, MemoryMessageStore, MessageStore},
    tls::{ClientCertificateValidator, TlsContext, TlsVersion},
};
