//! Scope guard for handshake sessions.

use skewguard_store::{Session, StoreResult};
use std::fmt;
use tracing::{trace, warn};

/// Which half of the handshake a session serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionRole {
    Outer,
    Inner,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Outer => write!(f, "outer"),
            SessionRole::Inner => write!(f, "inner"),
        }
    }
}

/// Owns a session and rolls it back on drop if it is still active.
///
/// A rollback failure during drop is logged, never raised, so it cannot
/// replace the error that caused the unwind. Use [`SessionGuard::release`]
/// where the rollback result matters.
pub(crate) struct SessionGuard<S: Session> {
    session: Option<S>,
    role: SessionRole,
}

impl<S: Session> SessionGuard<S> {
    pub(crate) fn new(session: S, role: SessionRole) -> Self {
        trace!(session = %session.id(), role = %role, "session opened");
        Self {
            session: Some(session),
            role,
        }
    }

    pub(crate) fn session(&self) -> &S {
        match &self.session {
            Some(session) => session,
            None => unreachable!("session is only taken by a consuming method"),
        }
    }

    pub(crate) fn session_mut(&mut self) -> &mut S {
        match &mut self.session {
            Some(session) => session,
            None => unreachable!("session is only taken by a consuming method"),
        }
    }

    /// Rolls the session back now and reports the outcome.
    pub(crate) fn release(mut self) -> StoreResult<()> {
        match self.session.take() {
            Some(mut session) if session.is_active() => {
                trace!(session = %session.id(), role = %self.role, "releasing session");
                session.rollback()
            }
            _ => Ok(()),
        }
    }

    /// Hands the session to the caller without rolling it back.
    pub(crate) fn disarm(mut self) -> S {
        match self.session.take() {
            Some(session) => session,
            None => unreachable!("session is only taken by a consuming method"),
        }
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if !session.is_active() {
            return;
        }
        if let Err(e) = session.rollback() {
            warn!(
                session = %session.id(),
                role = %self.role,
                error = %e,
                "rollback during cleanup failed"
            );
        }
    }
}
