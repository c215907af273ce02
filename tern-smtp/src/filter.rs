//! Sender and recipient acceptance policy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{command::Mailbox, context::SessionContext, response::Response};

/// Verdict of a [`MailboxFilter`].
///
/// Declaration order is restrictiveness: combining filters keeps the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MailboxFilterResult {
    #[default]
    Yes,
    NoTemporarily,
    NoPermanently,
    SizeLimitExceeded,
}

impl MailboxFilterResult {
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Yes)
    }

    /// The reply a client gets for this verdict.
    #[must_use]
    pub const fn response(self) -> Response {
        match self {
            Self::Yes => Response::OK,
            Self::NoTemporarily => Response::MAILBOX_BUSY,
            Self::NoPermanently => Response::MAILBOX_UNAVAILABLE,
            Self::SizeLimitExceeded => Response::SIZE_LIMIT_EXCEEDED,
        }
    }
}

/// Decides whether a sender or recipient is acceptable.
#[async_trait]
pub trait MailboxFilter: Send + Sync {
    /// Called for MAIL. `from` is `None` for the null reverse path; `size` is
    /// the declared SIZE, or 0 when none was given.
    async fn can_accept_from(
        &self,
        context: &SessionContext,
        from: Option<&Mailbox>,
        size: usize,
    ) -> MailboxFilterResult;

    /// Called for each RCPT.
    async fn can_deliver_to(
        &self,
        context: &SessionContext,
        to: &Mailbox,
        from: Option<&Mailbox>,
    ) -> MailboxFilterResult;
}

/// Creates the filter a session will use.
pub trait MailboxFilterFactory: Send + Sync {
    fn create(&self, context: &SessionContext) -> Box<dyn MailboxFilter>;
}

impl<T: MailboxFilter + Clone + 'static> MailboxFilterFactory for T {
    fn create(&self, _context: &SessionContext) -> Box<dyn MailboxFilter> {
        Box::new(self.clone())
    }
}

/// Accepts every sender and recipient.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMailboxFilter;

#[async_trait]
impl MailboxFilter for DefaultMailboxFilter {
    async fn can_accept_from(
        &self,
        _context: &SessionContext,
        _from: Option<&Mailbox>,
        _size: usize,
    ) -> MailboxFilterResult {
        MailboxFilterResult::Yes
    }

    async fn can_deliver_to(
        &self,
        _context: &SessionContext,
        _to: &Mailbox,
        _from: Option<&Mailbox>,
    ) -> MailboxFilterResult {
        MailboxFilterResult::Yes
    }
}

/// Asks every constituent and keeps the most restrictive verdict.
#[derive(Clone, Default)]
pub struct CompositeMailboxFilter {
    filters: Vec<Arc<dyn MailboxFilter>>,
}

impl CompositeMailboxFilter {
    #[must_use]
    pub fn new(filters: Vec<Arc<dyn MailboxFilter>>) -> Self {
        Self { filters }
    }

    #[must_use]
    pub fn with(mut self, filter: impl MailboxFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }
}

#[async_trait]
impl MailboxFilter for CompositeMailboxFilter {
    async fn can_accept_from(
        &self,
        context: &SessionContext,
        from: Option<&Mailbox>,
        size: usize,
    ) -> MailboxFilterResult {
        let mut result = MailboxFilterResult::Yes;
        for filter in &self.filters {
            result = result.max(filter.can_accept_from(context, from, size).await);
        }
        result
    }

    async fn can_deliver_to(
        &self,
        context: &SessionContext,
        to: &Mailbox,
        from: Option<&Mailbox>,
    ) -> MailboxFilterResult {
        let mut result = MailboxFilterResult::Yes;
        for filter in &self.filters {
            result = result.max(filter.can_deliver_to(context, to, from).await);
        }
        result
    }
}
