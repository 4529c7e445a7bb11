//! Error types for keyed serialization.

use skewguard_store::StoreError;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors returned by the advisory-lock client and the keyed serializer.
///
/// Only [`LockError::LockConflict`] is an expected outcome of contention;
/// callers should branch on it and retry. Everything else is either a
/// caller bug or a store failure.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock key is empty, too long, or uses the reserved suffix.
    ///
    /// Retrying with the same key will fail the same way.
    #[error("invalid lock key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// Another session holds the inner or outer lock for this key.
    #[error("a transaction is already in progress for lock resource {resource:?}")]
    LockConflict {
        /// The contended resource name.
        resource: String,
    },

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The serializer configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl LockError {
    /// Creates an invalid key error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Creates a lock conflict error.
    pub fn lock_conflict(resource: impl Into<String>) -> Self {
        Self::LockConflict {
            resource: resource.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if the same call may succeed when retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// Returns true for [`LockError::LockConflict`].
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }
}
