//! Keyed transaction serializer.
//!
//! Hands out store sessions that hold an advisory lock named after a
//! caller-chosen key. Two sessions serialized on the same key are never
//! active at once, which closes the write-skew gap snapshot isolation
//! leaves open for that key.
//!
//! ## Handshake
//!
//! Each acquire runs two sessions:
//!
//! 1. An *outer* session probes both the key and its outer name, then takes
//!    the outer lock. Only one caller per key gets past this point at a
//!    time.
//! 2. Still on the outer session, the key is probed once more. Only an
//!    outer-lock holder ever takes the inner lock, so a free key here means
//!    the previous holder has committed or rolled back.
//! 3. An *inner* session is opened and primed after that, so its snapshot
//!    includes every commit made while the caller waited. It probes and
//!    takes the inner lock.
//! 4. The outer session is rolled back, releasing the outer lock, and the
//!    inner session is returned.
//!
//! The probes only fail fast. Exclusion comes from the acquires.

use crate::client::{AcquireResult, AdvisoryLockClient};
use crate::config::SerializerConfig;
use crate::error::{LockError, LockResult};
use crate::guard::{SessionGuard, SessionRole};
use crate::key::{LockKeys, SanitizedKey};
use crate::session::KeyedSession;
use skewguard_store::{Session, TransactionalStore};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Serializes transactions per key on top of a [`TransactionalStore`].
///
/// Cheap to share: wrap it in an `Arc` and call [`acquire`](Self::acquire)
/// from any number of threads.
#[derive(Debug)]
pub struct KeyedSerializer<T: TransactionalStore> {
    store: T,
    config: SerializerConfig,
    client: AdvisoryLockClient,
    priming_command: String,
}

impl<T: TransactionalStore> KeyedSerializer<T> {
    /// Creates a serializer that primes sessions against `priming_table`,
    /// with the default lock timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfig`] if `priming_table` is not a plain
    /// identifier.
    pub fn new(store: T, priming_table: impl Into<String>) -> LockResult<Self> {
        Self::with_config(store, SerializerConfig::new(priming_table))
    }

    /// Creates a serializer with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfig`] if the configuration is invalid.
    pub fn with_config(store: T, config: SerializerConfig) -> LockResult<Self> {
        config.validate()?;
        let priming_command = config.priming_command();
        Ok(Self {
            store,
            config,
            client: AdvisoryLockClient::new(),
            priming_command,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &T {
        &self.store
    }

    /// Opens a session holding the lock for `key`, waiting up to the
    /// configured lock timeout per phase.
    ///
    /// # Errors
    ///
    /// - [`LockError::InvalidKey`] before any store call if `key` is invalid
    /// - [`LockError::LockConflict`] if another session holds the key or is
    ///   mid-handshake for it; safe to retry
    /// - [`LockError::Store`] if the store fails
    ///
    /// On every error, all sessions opened by this call have been rolled back.
    pub fn acquire(&self, key: &str) -> LockResult<KeyedSession<T::Session>> {
        self.acquire_with_timeout(key, self.config.lock_timeout)
    }

    /// Like [`acquire`](Self::acquire), with `timeout` in place of the
    /// configured lock timeout.
    ///
    /// # Errors
    ///
    /// See [`acquire`](Self::acquire).
    pub fn acquire_with_timeout(
        &self,
        key: &str,
        timeout: Duration,
    ) -> LockResult<KeyedSession<T::Session>> {
        let keys = LockKeys::derive(key)?;
        debug!(key = %keys.inner(), timeout = ?timeout, "acquiring keyed session");

        let mut outer = self.open_primed(SessionRole::Outer)?;
        self.ensure_available(outer.session_mut(), keys.inner())?;
        self.ensure_available(outer.session_mut(), keys.outer())?;
        let outer_acquire = self
            .client
            .acquire(outer.session_mut(), keys.outer(), timeout)?;
        debug!(
            key = %keys.inner(),
            session = %outer.session().id(),
            waited = outer_acquire.waited(),
            "outer lock held"
        );
        self.ensure_available(outer.session_mut(), keys.inner())?;

        let mut inner = self.open_primed(SessionRole::Inner)?;
        self.ensure_available(inner.session_mut(), keys.inner())?;
        let inner_acquire = self
            .client
            .acquire(inner.session_mut(), keys.inner(), timeout)?;
        debug!(
            key = %keys.inner(),
            session = %inner.session().id(),
            waited = inner_acquire.waited(),
            "inner lock held"
        );

        // Dropping `inner` on this path rolls it back.
        outer.release()?;

        Ok(KeyedSession::new(
            keys.into_inner(),
            inner,
            outer_acquire,
            inner_acquire,
        ))
    }

    /// Runs `f` in a session serialized on `key`.
    ///
    /// Commits when `f` returns `Ok` and rolls back when it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns any error from [`acquire`](Self::acquire), from `f`, or from
    /// the commit.
    pub fn transaction<F, R>(&self, key: &str, f: F) -> LockResult<R>
    where
        F: FnOnce(&mut T::Session) -> LockResult<R>,
    {
        let mut session = self.acquire(key)?;
        match f(&mut *session) {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = session.rollback() {
                    warn!(key, error = %rollback, "rollback after failed transaction body failed");
                }
                Err(e)
            }
        }
    }

    fn open_primed(&self, role: SessionRole) -> LockResult<SessionGuard<T::Session>> {
        let mut guard = SessionGuard::new(self.store.open_session()?, role);
        guard.session_mut().execute(&self.priming_command)?;
        trace!(session = %guard.session().id(), role = %role, "session primed");
        Ok(guard)
    }

    fn ensure_available(&self, session: &mut T::Session, key: &SanitizedKey) -> LockResult<()> {
        if self.client.is_available(session, key)? {
            Ok(())
        } else {
            debug!(resource = %key, session = %session.id(), "lock unavailable");
            Err(LockError::lock_conflict(key.as_str()))
        }
    }
}
