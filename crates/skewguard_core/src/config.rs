//! Serializer configuration.

use crate::client::DEFAULT_LOCK_TIMEOUT;
use crate::error::{LockError, LockResult};
use std::time::Duration;

/// Configuration for a [`KeyedSerializer`](crate::KeyedSerializer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializerConfig {
    /// Table read once per session before any lock call.
    ///
    /// Must be a plain identifier and must exist in the store.
    pub priming_table: String,

    /// How long each lock acquire may block. Zero means do not wait.
    pub lock_timeout: Duration,
}

impl SerializerConfig {
    /// Creates a configuration that primes sessions against `priming_table`.
    #[must_use]
    pub fn new(priming_table: impl Into<String>) -> Self {
        Self {
            priming_table: priming_table.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets the per-phase lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfig`] if the priming table is not a
    /// plain identifier.
    pub fn validate(&self) -> LockResult<()> {
        if !is_identifier(&self.priming_table) {
            return Err(LockError::invalid_config(format!(
                "priming table {:?} is not a plain identifier",
                self.priming_table
            )));
        }
        Ok(())
    }

    /// The read that gives a fresh session its transaction context.
    pub(crate) fn priming_command(&self) -> String {
        format!("SELECT * FROM {} LIMIT 1", self.priming_table)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
