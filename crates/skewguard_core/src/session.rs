//! The session handed to callers of [`KeyedSerializer`](crate::KeyedSerializer).

use crate::client::AcquireResult;
use crate::guard::SessionGuard;
use crate::key::SanitizedKey;
use skewguard_store::{Session, StoreResult};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A store session holding the advisory lock for one key.
///
/// The lock lasts exactly as long as the session. Commit or roll back to
/// release it; dropping an uncommitted `KeyedSession` rolls it back.
///
/// Derefs to the underlying store session, so queries run directly on it:
///
/// ```ignore
/// let mut session = serializer.acquire("order-42")?;
/// session.execute("UPSERT INTO orders VALUES ('order-42', 1)")?;
/// session.commit()?;
/// ```
pub struct KeyedSession<S: Session> {
    key: SanitizedKey,
    guard: SessionGuard<S>,
    outer_acquire: AcquireResult,
    inner_acquire: AcquireResult,
}

impl<S: Session> KeyedSession<S> {
    pub(crate) fn new(
        key: SanitizedKey,
        guard: SessionGuard<S>,
        outer_acquire: AcquireResult,
        inner_acquire: AcquireResult,
    ) -> Self {
        Self {
            key,
            guard,
            outer_acquire,
            inner_acquire,
        }
    }

    /// Returns the key this session is serialized on.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns true if either lock had to wait for another holder.
    #[must_use]
    pub fn waited(&self) -> bool {
        self.outer_acquire.waited() || self.inner_acquire.waited()
    }

    /// How the outer (handshake) lock was obtained.
    #[must_use]
    pub fn outer_acquire(&self) -> AcquireResult {
        self.outer_acquire
    }

    /// How the inner lock, held by this session, was obtained.
    #[must_use]
    pub fn inner_acquire(&self) -> AcquireResult {
        self.inner_acquire
    }

    /// Commits the session's writes and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the commit fails. The session is rolled
    /// back in that case and the lock is released all the same.
    pub fn commit(mut self) -> StoreResult<()> {
        self.guard.session_mut().commit()
    }

    /// Discards the session's writes and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the rollback fails.
    pub fn rollback(self) -> StoreResult<()> {
        self.guard.release()
    }

    /// Takes the underlying session out of the wrapper.
    ///
    /// The caller becomes responsible for ending it.
    #[must_use]
    pub fn into_session(self) -> S {
        self.guard.disarm()
    }
}

impl<S: Session> Deref for KeyedSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.guard.session()
    }
}

impl<S: Session> DerefMut for KeyedSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.guard.session_mut()
    }
}

impl<S: Session> fmt::Debug for KeyedSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedSession")
            .field("key", &self.key.as_str())
            .field("session", &self.guard.session().id())
            .field("outer_acquire", &self.outer_acquire)
            .field("inner_acquire", &self.inner_acquire)
            .finish()
    }
}
