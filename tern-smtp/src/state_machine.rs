use crate::{
    context::SessionContext,
    response::Response,
    state::{SessionState, StateTable, Transition},
};

/// Two-phase driver over the [`StateTable`].
///
/// [`StateMachine::try_accept`] validates a command and remembers the matching
/// transition; [`StateMachine::commit`] applies it once the command has run.
/// At most one transition is pending at a time.
#[derive(Debug, Default)]
pub struct StateMachine {
    pending: Option<&'static Transition>,
}

impl StateMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Check whether `command` is legal right now.
    ///
    /// # Errors
    /// Returns the reply to send when it is not: the transition's own denial
    /// if it has one, else a syntax error listing what is legal.
    pub fn try_accept(&mut self, context: &SessionContext, command: &str) -> Result<(), Response> {
        self.pending = None;

        match StateTable::shared().lookup(context.state(), command) {
            Some(transition) if transition.is_allowed(context) => {
                self.pending = Some(transition);
                Ok(())
            }
            Some(transition) => Err(transition
                .denied()
                .cloned()
                .unwrap_or_else(|| Self::syntax_error(context))),
            None => Err(Self::syntax_error(context)),
        }
    }

    /// Apply the pending transition. Entering either waiting state clears
    /// the transaction.
    pub fn commit(&mut self, context: &mut SessionContext) -> Option<SessionState> {
        let transition = self.pending.take()?;
        let next = transition.next(context);

        if next.is_waiting_for_mail() {
            context.transaction_mut().reset();
        }

        context.set_state(next);
        Some(next)
    }

    /// Drop the pending transition without applying it.
    pub const fn abandon(&mut self) {
        self.pending = None;
    }

    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 501 naming the commands legal in the current state.
    #[must_use]
    pub fn syntax_error(context: &SessionContext) -> Response {
        Response::syntax_error(StateTable::shared().expected(context))
    }

    /// 500 naming the commands legal in the current state.
    #[must_use]
    pub fn unrecognized(context: &SessionContext) -> Response {
        Response::unrecognized(StateTable::shared().expected(context))
    }
}
