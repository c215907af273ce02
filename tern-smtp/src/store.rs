//! Message persistence.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{
    command::Mailbox,
    context::{MessageTransaction, SessionContext},
    response::{ReplyCode, Response},
};

/// Receives each completed message.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `content`, the unstuffed DATA block, and say how it went.
    async fn save(
        &self,
        context: &SessionContext,
        transaction: &MessageTransaction,
        content: Bytes,
    ) -> Response;
}

/// Creates the store a session will use.
pub trait MessageStoreFactory: Send + Sync {
    fn create(&self, context: &SessionContext) -> Box<dyn MessageStore>;
}

impl<T: MessageStore + Clone + 'static> MessageStoreFactory for T {
    fn create(&self, _context: &SessionContext) -> Box<dyn MessageStore> {
        Box::new(self.clone())
    }
}

/// Acknowledges and discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessageStore;

#[async_trait]
impl MessageStore for DefaultMessageStore {
    async fn save(
        &self,
        _context: &SessionContext,
        _transaction: &MessageTransaction,
        _content: Bytes,
    ) -> Response {
        Response::OK
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub session: u64,
    pub from: Option<Mailbox>,
    pub to: Vec<Mailbox>,
    pub content: Bytes,
}

/// Keeps messages in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageStore {
    messages: Arc<RwLock<Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.messages.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(
        &self,
        context: &SessionContext,
        transaction: &MessageTransaction,
        content: Bytes,
    ) -> Response {
        let mut messages = self.messages.write().await;
        messages.push(StoredMessage {
            session: context.id(),
            from: transaction.from().cloned(),
            to: transaction.to().to_vec(),
            content,
        });

        Response::new(
            ReplyCode::Ok,
            format!("Ok: queued as {}-{}", context.id(), messages.len()),
        )
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{command::Parameters, context::test::context, endpoint::EndpointDefinition};

    #[tokio::test]
    async fn memory_store_shares_between_clones() {
        let store = MemoryMessageStore::new();
        let handle = store.clone();
        let context = context(EndpointDefinition::builder());

        let mut transaction = MessageTransaction::default();
        transaction.begin(Some(Mailbox::new("from", "sample.com")), Parameters::new());
        transaction.add_recipient(Mailbox::new("to", "sample.com"));

        let response = store
            .save(&context, &transaction, Bytes::from_static(b"Subject: hi\r\n\r\nbody\r\n"))
            .await;
        assert_eq!(response.code(), ReplyCode::Ok);
        assert!(response.text().starts_with("Ok: queued as"));

        let messages = handle.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, Some(Mailbox::new("from", "sample.com")));
        assert_eq!(messages[0].to, vec![Mailbox::new("to", "sample.com")]);
        assert_eq!(messages[0].session, context.id());
    }

    #[tokio::test]
    async fn default_store_acknowledges() {
        let context = context(EndpointDefinition::builder());
        let response = DefaultMessageStore
            .save(&context, &MessageTransaction::default(), Bytes::new())
            .await;
        assert_eq!(response, Response::OK);
    }
}
