//! Advisory-lock client.
//!
//! Thin, validated access to the store's advisory-lock primitive. The
//! client never tracks lock state and never releases a lock: every answer
//! comes from a round-trip to the store, and locks end with the session
//! that took them.

use crate::error::{LockError, LockResult};
use crate::key::SanitizedKey;
use skewguard_store::{
    LockStatus, Session, StoreError, LOCK_AVAILABLE_COLUMN as AVAILABLE_COLUMN,
    LOCK_STATUS_COLUMN as STATUS_COLUMN,
};
use std::time::Duration;
use tracing::trace;

/// Default wait budget for a blocking acquire.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// How an acquire succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquireResult {
    /// The lock was free and granted at once.
    Acquired,
    /// The lock was granted after waiting for another holder.
    AcquiredAfterWait,
}

impl AcquireResult {
    /// Returns true if the caller had to wait.
    #[must_use]
    pub const fn waited(self) -> bool {
        matches!(self, AcquireResult::AcquiredAfterWait)
    }
}

/// Issues advisory-lock probes and acquires on a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvisoryLockClient;

impl AdvisoryLockClient {
    /// Creates a client.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates `key` and escapes it for command text.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidKey`] for empty, over-long, or reserved keys.
    pub fn sanitize(&self, key: &str) -> LockResult<SanitizedKey> {
        SanitizedKey::new(key)
    }

    /// Returns true if `key` could be granted to `session` right now.
    ///
    /// This is a read-only probe; it never takes the lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Store`] if the store fails or answers with an
    /// unexpected result shape.
    pub fn is_available<S>(&self, session: &mut S, key: &SanitizedKey) -> LockResult<bool>
    where
        S: Session + ?Sized,
    {
        let command = test_command(key);
        trace!(session = %session.id(), command = %command, "probing lock");
        let row = session.query(&command)?.next().ok_or(StoreError::NoRows)?;
        Ok(row.get_bool(AVAILABLE_COLUMN)?)
    }

    /// Takes an exclusive, transaction-scoped lock on `key`, waiting up to
    /// `timeout` if another session holds it.
    ///
    /// The lock is released by the store when `session` ends.
    ///
    /// # Errors
    ///
    /// - [`LockError::LockConflict`] if the wait timed out, was cancelled,
    ///   or lost a deadlock
    /// - [`LockError::Store`] for any other failure, including an invalid
    ///   call or an undefined status code
    pub fn acquire<S>(
        &self,
        session: &mut S,
        key: &SanitizedKey,
        timeout: Duration,
    ) -> LockResult<AcquireResult>
    where
        S: Session + ?Sized,
    {
        let command = acquire_command(key, timeout);
        trace!(session = %session.id(), command = %command, "acquiring lock");
        let row = session.query(&command)?.next().ok_or(StoreError::NoRows)?;
        classify(key, row.get_int(STATUS_COLUMN)?)
    }
}

fn classify(key: &SanitizedKey, status: i64) -> LockResult<AcquireResult> {
    match LockStatus::from_code(status) {
        Some(LockStatus::Granted) => Ok(AcquireResult::Acquired),
        Some(LockStatus::GrantedAfterWait) => Ok(AcquireResult::AcquiredAfterWait),
        Some(LockStatus::TimedOut | LockStatus::Cancelled | LockStatus::Deadlock) => {
            Err(LockError::lock_conflict(key.as_str()))
        }
        Some(LockStatus::CallError) | None => Err(StoreError::LockCallFailed {
            resource: key.as_str().to_string(),
            status,
        }
        .into()),
    }
}

fn test_command(key: &SanitizedKey) -> String {
    format!("SELECT APPLOCK_TEST({}) AS {AVAILABLE_COLUMN}", key.literal())
}

fn acquire_command(key: &SanitizedKey, timeout: Duration) -> String {
    let millis = timeout.as_millis().min(i64::MAX as u128);
    format!(
        "SELECT APPLOCK_ACQUIRE({}, {millis}) AS {STATUS_COLUMN}",
        key.literal()
    )
}
