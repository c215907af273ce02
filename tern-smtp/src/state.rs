//! Session states and the table of legal transitions between them.

use core::fmt::{self, Display, Formatter};
use std::{
    collections::{BTreeMap, HashMap},
    sync::LazyLock,
};

use crate::{command::Command, context::SessionContext, response::Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Connected, nothing said yet.
    #[default]
    Initialized,
    /// Greeted over a plaintext channel.
    WaitingForMail,
    /// Greeted over a secure channel.
    WaitingForMailSecure,
    /// MAIL accepted, no recipients yet.
    WithinTransaction,
    /// At least one recipient accepted.
    CanAcceptData,
}

impl SessionState {
    /// Entering one of these states clears the transaction.
    #[must_use]
    pub const fn is_waiting_for_mail(self) -> bool {
        matches!(self, Self::WaitingForMail | Self::WaitingForMailSecure)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialized => "Initialized",
            Self::WaitingForMail => "WaitingForMail",
            Self::WaitingForMailSecure => "WaitingForMailSecure",
            Self::WithinTransaction => "WithinTransaction",
            Self::CanAcceptData => "CanAcceptData",
        })
    }
}

pub type Guard = fn(&SessionContext) -> bool;
pub type Next = fn(&SessionContext) -> SessionState;

/// One row of the state table.
#[derive(Debug)]
pub struct Transition {
    guard: Guard,
    next: Next,
    /// Sent instead of the generic syntax error when the guard fails.
    denied: Option<Response>,
}

impl Transition {
    fn always(next: Next) -> Self {
        Self {
            guard: |_| true,
            next,
            denied: None,
        }
    }

    fn when(guard: Guard, next: Next) -> Self {
        Self {
            guard,
            next,
            denied: None,
        }
    }

    fn when_or(guard: Guard, next: Next, denied: Response) -> Self {
        Self {
            guard,
            next,
            denied: Some(denied),
        }
    }

    #[must_use]
    pub fn is_allowed(&self, context: &SessionContext) -> bool {
        (self.guard)(context)
    }

    #[must_use]
    pub fn next(&self, context: &SessionContext) -> SessionState {
        (self.next)(context)
    }

    #[must_use]
    pub const fn denied(&self) -> Option<&Response> {
        self.denied.as_ref()
    }
}

fn stay(context: &SessionContext) -> SessionState {
    context.state()
}

/// `WaitingForMailSecure` on a secure channel, `WaitingForMail` otherwise.
fn waiting(context: &SessionContext) -> SessionState {
    if context.is_secure() {
        SessionState::WaitingForMailSecure
    } else {
        SessionState::WaitingForMail
    }
}

fn can_start_tls(context: &SessionContext) -> bool {
    context.endpoint().has_certificate() && !context.is_secure()
}

fn can_authenticate_unsecure(context: &SessionContext) -> bool {
    context.endpoint().allow_unsecure_authentication() && !context.is_authenticated()
}

fn can_authenticate(context: &SessionContext) -> bool {
    !context.is_authenticated()
}

fn may_send_mail(context: &SessionContext) -> bool {
    !context.endpoint().authentication_required() || context.is_authenticated()
}

/// Every legal (state, command) pair. Built once, read by every session.
#[derive(Debug)]
pub struct StateTable {
    states: HashMap<SessionState, BTreeMap<&'static str, Transition>>,
}

static TABLE: LazyLock<StateTable> = LazyLock::new(StateTable::build);

impl StateTable {
    #[must_use]
    pub fn shared() -> &'static Self {
        &TABLE
    }

    fn build() -> Self {
        let common = || {
            BTreeMap::from([
                (Command::NOOP, Transition::always(stay)),
                (Command::QUIT, Transition::always(stay)),
            ])
        };

        let mut initialized = common();
        initialized.extend([
            (Command::RSET, Transition::always(stay)),
            (Command::PROXY, Transition::always(stay)),
            (Command::HELO, Transition::always(waiting)),
            (Command::EHLO, Transition::always(waiting)),
        ]);

        let mail = || {
            Transition::when_or(
                may_send_mail,
                |_| SessionState::WithinTransaction,
                Response::AUTH_REQUIRED,
            )
        };

        let mut waiting_for_mail = common();
        waiting_for_mail.extend([
            (Command::RSET, Transition::always(waiting)),
            (Command::HELO, Transition::always(stay)),
            (Command::EHLO, Transition::always(stay)),
            (
                Command::STARTTLS,
                Transition::when(can_start_tls, |_| SessionState::WaitingForMailSecure),
            ),
            (Command::AUTH, Transition::when(can_authenticate_unsecure, stay)),
            (Command::MAIL, mail()),
        ]);

        let mut waiting_for_mail_secure = common();
        waiting_for_mail_secure.extend([
            (Command::RSET, Transition::always(waiting)),
            (Command::HELO, Transition::always(stay)),
            (Command::EHLO, Transition::always(stay)),
            (Command::AUTH, Transition::when(can_authenticate, stay)),
            (Command::MAIL, mail()),
        ]);

        let mut within_transaction = common();
        within_transaction.extend([
            (Command::RSET, Transition::always(waiting)),
            (
                Command::RCPT,
                Transition::always(|_| SessionState::CanAcceptData),
            ),
        ]);

        let mut can_accept_data = common();
        can_accept_data.extend([
            (Command::RSET, Transition::always(waiting)),
            (Command::RCPT, Transition::always(stay)),
            (
                Command::DATA,
                Transition::always(|_| SessionState::WaitingForMail),
            ),
        ]);

        Self {
            states: HashMap::from([
                (SessionState::Initialized, initialized),
                (SessionState::WaitingForMail, waiting_for_mail),
                (SessionState::WaitingForMailSecure, waiting_for_mail_secure),
                (SessionState::WithinTransaction, within_transaction),
                (SessionState::CanAcceptData, can_accept_data),
            ]),
        }
    }

    #[must_use]
    pub fn lookup(&self, state: SessionState, command: &str) -> Option<&Transition> {
        self.states.get(&state)?.get(command)
    }

    /// Commands whose guards currently pass, in sorted order.
    #[must_use]
    pub fn expected(&self, context: &SessionContext) -> Vec<&'static str> {
        self.states
            .get(&context.state())
            .map(|transitions| {
                transitions
                    .iter()
                    .filter(|(_, transition)| transition.is_allowed(context))
                    .map(|(name, _)| *name)
                    .collect()
            })
            .unwrap_or_default()
    }
}
