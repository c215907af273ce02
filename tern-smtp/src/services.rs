use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use crate::{
    authentication::{DefaultUserAuthenticator, UserAuthenticator, UserAuthenticatorFactory},
    context::SessionContext,
    filter::{DefaultMailboxFilter, MailboxFilter, MailboxFilterFactory},
    store::{DefaultMessageStore, MessageStore, MessageStoreFactory},
    tls::ClientCertificateValidator,
};

/// The policy collaborators a server hands to its sessions.
#[derive(Clone)]
pub struct Services {
    mailbox_filter: Arc<dyn MailboxFilterFactory>,
    message_store: Arc<dyn MessageStoreFactory>,
    user_authenticator: Arc<dyn UserAuthenticatorFactory>,
    certificate_validator: Option<Arc<dyn ClientCertificateValidator>>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            mailbox_filter: Arc::new(DefaultMailboxFilter),
            message_store: Arc::new(DefaultMessageStore),
            user_authenticator: Arc::new(DefaultUserAuthenticator),
            certificate_validator: None,
        }
    }
}

impl Debug for Services {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field(
                "certificate_validator",
                &self.certificate_validator.is_some(),
            )
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Create a new `Services` builder
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mailbox_filter(mut self, factory: impl MailboxFilterFactory + 'static) -> Self {
        self.mailbox_filter = Arc::new(factory);
        self
    }

    #[must_use]
    pub fn with_message_store(mut self, factory: impl MessageStoreFactory + 'static) -> Self {
        self.message_store = Arc::new(factory);
        self
    }

    #[must_use]
    pub fn with_user_authenticator(
        mut self,
        factory: impl UserAuthenticatorFactory + 'static,
    ) -> Self {
        self.user_authenticator = Arc::new(factory);
        self
    }

    #[must_use]
    pub fn with_certificate_validator(
        mut self,
        validator: impl ClientCertificateValidator + 'static,
    ) -> Self {
        self.certificate_validator = Some(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn certificate_validator(&self) -> Option<Arc<dyn ClientCertificateValidator>> {
        self.certificate_validator.clone()
    }

    /// Instantiate the collaborators for one session.
    #[must_use]
    pub fn for_session(&self, context: &SessionContext) -> SessionServices {
        SessionServices {
            mailbox_filter: self.mailbox_filter.create(context),
            message_store: self.message_store.create(context),
            user_authenticator: self.user_authenticator.create(context),
        }
    }
}

/// Collaborators owned by a single session.
pub struct SessionServices {
    pub mailbox_filter: Box<dyn MailboxFilter>,
    pub message_store: Box<dyn MessageStore>,
    pub user_authenticator: Box<dyn UserAuthenticator>,
}

impl Debug for SessionServices {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionServices").finish_non_exhaustive()
    }
}
