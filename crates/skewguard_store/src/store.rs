//! Transactional store trait definitions.

use crate::cursor::RowCursor;
use crate::error::StoreResult;
use crate::types::SessionId;
use std::sync::Arc;

/// A store that hands out independent transactional sessions.
///
/// # Invariants
///
/// - Every session returned by `open_session` is independent: it has its
///   own snapshot and its own advisory locks
/// - Sessions from the same store may be used concurrently from different
///   threads
/// - Advisory locks are released by the store when the owning session ends
pub trait TransactionalStore: Send + Sync {
    /// Session type produced by this store.
    type Session: Session;

    /// Opens a new transactional session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot open a session.
    fn open_session(&self) -> StoreResult<Self::Session>;
}

impl<T: TransactionalStore + ?Sized> TransactionalStore for Arc<T> {
    type Session = T::Session;

    fn open_session(&self) -> StoreResult<Self::Session> {
        (**self).open_session()
    }
}

/// An open transaction against a [`TransactionalStore`].
///
/// A session is used by one thread of control at a time. Dropping an
/// active session rolls it back, the way a disconnect would.
pub trait Session: Send {
    /// Returns the store-assigned session ID.
    fn id(&self) -> SessionId;

    /// Returns true until the session is committed, rolled back or expired.
    fn is_active(&self) -> bool;

    /// Runs a command and returns its result rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is malformed, references missing
    /// data, or the session is no longer active.
    fn query(&mut self, command: &str) -> StoreResult<RowCursor>;

    /// Runs a command and discards any result rows.
    fn execute(&mut self, command: &str) -> StoreResult<()> {
        self.query(command).map(drop)
    }

    /// Makes the session's writes durable and visible, then ends it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not active or the commit
    /// conflicts with a concurrent commit. The session ends either way.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discards the session's writes and ends it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not active.
    fn rollback(&mut self) -> StoreResult<()>;
}
