use std::{
    any::Any,
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    command::{Mailbox, Parameters},
    endpoint::{EndpointDefinition, ServerOptions},
    state::SessionState,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Open-ended values attached to a session by surrounding code.
///
/// Keys are plain strings; values are retrieved by asking for the type they
/// were stored as.
#[derive(Default)]
pub struct Properties {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Properties {
    /// Store `value` under `key`, replacing anything already there.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// The value under `key`, if there is one and it is a `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut()
    }

    /// Remove and return the value under `key` if it is a `T`. A value of
    /// another type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key)?.is::<T>() {
            return None;
        }

        self.values
            .remove(key)
            .and_then(|value| value.downcast().ok())
            .map(|value| *value)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Debug for Properties {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// The sender, recipients and size accumulated between MAIL and the end of DATA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTransaction {
    from: Option<Mailbox>,
    to: Vec<Mailbox>,
    parameters: Parameters,
    size: usize,
}

impl MessageTransaction {
    /// The reverse path. `None` for the null sender, or before MAIL.
    #[must_use]
    pub const fn from(&self) -> Option<&Mailbox> {
        self.from.as_ref()
    }

    #[must_use]
    pub fn to(&self) -> &[Mailbox] {
        &self.to
    }

    /// The ESMTP parameters given with MAIL.
    #[must_use]
    pub const fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Bytes of message content received so far.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_empty() && self.parameters.is_empty() && self.size == 0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn begin(&mut self, from: Option<Mailbox>, parameters: Parameters) {
        self.reset();
        self.from = from;
        self.parameters = parameters;
    }

    pub(crate) fn add_recipient(&mut self, recipient: Mailbox) {
        self.to.push(recipient);
    }

    pub(crate) const fn set_size(&mut self, size: usize) {
        self.size = size;
    }
}

/// Everything one connection knows about itself.
#[derive(Debug)]
pub struct SessionContext {
    id: u64,
    state: SessionState,
    endpoint: Arc<EndpointDefinition>,
    options: Arc<ServerOptions>,
    is_secure: bool,
    authenticated_user: Option<String>,
    authentication_failures: usize,
    transaction: MessageTransaction,
    remote: SocketAddr,
    local: SocketAddr,
    properties: Properties,
    quit: bool,
}

impl SessionContext {
    #[must_use]
    pub fn new(
        endpoint: Arc<EndpointDefinition>,
        options: Arc<ServerOptions>,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            state: SessionState::Initialized,
            endpoint,
            options,
            is_secure: false,
            authenticated_user: None,
            authentication_failures: 0,
            transaction: MessageTransaction::default(),
            remote,
            local,
            properties: Properties::default(),
            quit: false,
        }
    }

    /// Unique, increasing identifier for this session.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn endpoint(&self) -> &EndpointDefinition {
        &self.endpoint
    }

    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.is_secure
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated_user.is_some()
    }

    #[must_use]
    pub fn authenticated_user(&self) -> Option<&str> {
        self.authenticated_user.as_deref()
    }

    #[must_use]
    pub const fn transaction(&self) -> &MessageTransaction {
        &self.transaction
    }

    #[must_use]
    pub const fn remote(&self) -> SocketAddr {
        self.remote
    }

    #[must_use]
    pub const fn local(&self) -> SocketAddr {
        self.local
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub const fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Whether QUIT has been executed.
    #[must_use]
    pub const fn is_quitting(&self) -> bool {
        self.quit
    }

    pub(crate) const fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Mark the connection secure. There is no way back.
    pub(crate) const fn set_secure(&mut self) {
        self.is_secure = true;
    }

    pub(crate) fn set_authenticated(&mut self, user: String) {
        self.authenticated_user = Some(user);
    }

    /// Count a failed authentication attempt, returning the running total.
    pub(crate) const fn record_authentication_failure(&mut self) -> usize {
        self.authentication_failures += 1;
        self.authentication_failures
    }

    pub(crate) const fn transaction_mut(&mut self) -> &mut MessageTransaction {
        &mut self.transaction
    }

    pub(crate) const fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = remote;
    }

    pub(crate) const fn set_quit(&mut self) {
        self.quit = true;
    }
}

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) fn context(endpoint: EndpointDefinition) -> SessionContext {
        SessionContext::new(
            Arc::new(endpoint),
            Arc::new(ServerOptions::builder().with_name("test.local")),
            "127.0.0.1:50000".parse().expect("remote"),
            "127.0.0.1:25".parse().expect("local"),
        )
    }

    #[test]
    fn properties_are_typed_at_the_edges() {
        let mut properties = Properties::default();
        properties.insert("proxy.source", "10.0.0.1:4000".parse::<SocketAddr>().expect("addr"));
        properties.insert("greylisted", true);

        assert_eq!(
            properties.get::<SocketAddr>("proxy.source"),
            Some(&"10.0.0.1:4000".parse().expect("addr"))
        );
        assert_eq!(properties.get::<String>("proxy.source"), None);
        assert_eq!(properties.remove::<String>("greylisted"), None);
        assert_eq!(properties.remove::<bool>("greylisted"), Some(true));
        assert!(!properties.contains("greylisted"));
        assert_eq!(properties.len(), 1);
    }

    #[test]
    fn transaction_begin_clears_previous_content() {
        let mut transaction = MessageTransaction::default();
        assert!(transaction.is_empty());

        transaction.begin(Some(Mailbox::new("a", "b.com")), Parameters::new());
        transaction.add_recipient(Mailbox::new("c", "d.com"));
        transaction.set_size(42);
        assert!(!transaction.is_empty());

        transaction.begin(None, Parameters::new());
        assert!(transaction.to().is_empty());
        assert_eq!(transaction.size(), 0);
        assert_eq!(transaction.from(), None);

        transaction.reset();
        assert!(transaction.is_empty());
    }

    #[test]
    fn session_ids_are_unique() {
        let first = context(EndpointDefinition::builder());
        let second = context(EndpointDefinition::builder());
        assert!(second.id() > first.id());
        assert_eq!(first.state(), SessionState::Initialized);
        assert!(!first.is_secure());
    }

    #[test]
    fn security_is_monotonic() {
        let mut context = context(EndpointDefinition::builder());
        context.set_secure();
        context.set_secure();
        assert!(context.is_secure());
    }

    #[test]
    fn authentication_failures_accumulate() {
        let mut context = context(EndpointDefinition::builder());
        assert_eq!(context.record_authentication_failure(), 1);
        assert_eq!(context.record_authentication_failure(), 2);
        assert!(!context.is_authenticated());

        context.set_authenticated("user".to_string());
        assert_eq!(context.authenticated_user(), Some("user"));
    }
}
