//! Store configuration.

use std::time::Duration;

/// Largest resource name the store accepts by default.
pub const DEFAULT_MAX_RESOURCE_LEN: usize = 255;

/// Configuration for an [`InMemoryStore`](crate::InMemoryStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a session may stay idle before the store reclaims it.
    ///
    /// `None` means sessions never expire. A reclaimed session loses its
    /// advisory locks and fails every later call with
    /// [`StoreError::SessionExpired`](crate::StoreError::SessionExpired).
    pub session_timeout: Option<Duration>,

    /// Refuse advisory-lock calls until the session has read or written data.
    pub require_transaction_context: bool,

    /// Maximum length of an advisory-lock resource name, in characters.
    pub max_resource_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_timeout: None,
            require_transaction_context: true,
            max_resource_len: DEFAULT_MAX_RESOURCE_LEN,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle timeout after which sessions are reclaimed.
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Sets whether lock calls require a prior data access.
    #[must_use]
    pub const fn require_transaction_context(mut self, value: bool) -> Self {
        self.require_transaction_context = value;
        self
    }

    /// Sets the maximum resource name length.
    #[must_use]
    pub const fn max_resource_len(mut self, len: usize) -> Self {
        self.max_resource_len = len;
        self
    }

    /// How often a blocked lock waiter re-checks for expired holders.
    pub(crate) fn poll_interval(&self) -> Option<Duration> {
        self.session_timeout
            .map(|t| (t / 4).clamp(Duration::from_millis(1), Duration::from_millis(50)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.session_timeout.is_none());
        assert!(config.require_transaction_context);
        assert_eq!(config.max_resource_len, 255);
        assert!(config.poll_interval().is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .session_timeout(Duration::from_millis(200))
            .require_transaction_context(false)
            .max_resource_len(64);

        assert_eq!(config.session_timeout, Some(Duration::from_millis(200)));
        assert!(!config.require_transaction_context);
        assert_eq!(config.max_resource_len, 64);
        assert_eq!(config.poll_interval(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn poll_interval_tracks_short_timeouts() {
        let config = StoreConfig::new().session_timeout(Duration::from_millis(20));
        assert_eq!(config.poll_interval(), Some(Duration::from_millis(5)));
    }
}
