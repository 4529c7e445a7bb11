//! Test fixtures and store helpers.
//!
//! Provides an in-memory store set up the way the serializer expects it,
//! plus probes for checking what a test left behind.

use skewguard_core::{AdvisoryLockClient, KeyedSerializer, LockKeys, SerializerConfig};
use skewguard_store::{InMemoryStore, Session, StoreConfig, TransactionalStore};
use std::time::Duration;
use uuid::Uuid;

/// Table every fixture store creates for priming reads.
pub const PRIMING_TABLE: &str = "priming";

/// Lock timeout used by fixture serializers.
pub const TEST_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// An in-memory store with the priming table already created.
pub struct TestStore {
    /// The store instance.
    pub store: InMemoryStore,
}

impl TestStore {
    /// Creates a store whose sessions never expire.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a store that reclaims sessions idle for longer than `timeout`.
    pub fn with_session_timeout(timeout: Duration) -> Self {
        Self::with_config(StoreConfig::new().session_timeout(timeout))
    }

    /// Creates a store with an explicit configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        let store = InMemoryStore::with_config(config);
        store
            .create_table(PRIMING_TABLE)
            .expect("Failed to create priming table");
        Self { store }
    }

    /// Returns a serializer over this store using [`TEST_LOCK_TIMEOUT`].
    pub fn serializer(&self) -> KeyedSerializer<InMemoryStore> {
        self.serializer_with_timeout(TEST_LOCK_TIMEOUT)
    }

    /// Returns a serializer over this store with the given lock timeout.
    pub fn serializer_with_timeout(&self, timeout: Duration) -> KeyedSerializer<InMemoryStore> {
        let config = SerializerConfig::new(PRIMING_TABLE).lock_timeout(timeout);
        KeyedSerializer::with_config(self.store.clone(), config)
            .expect("Fixture serializer config is valid")
    }

    /// Opens a session that has already done its priming read.
    pub fn primed_session(&self) -> skewguard_store::InMemorySession {
        let mut session = self.store.open_session().expect("Failed to open session");
        session
            .execute(&format!("SELECT * FROM {PRIMING_TABLE} LIMIT 1"))
            .expect("Failed to prime session");
        session
    }

    /// Returns true if a fresh session could take the inner lock for `key`.
    pub fn is_free(&self, key: &str) -> bool {
        let keys = LockKeys::derive(key).expect("Key is valid");
        let mut session = self.primed_session();
        AdvisoryLockClient::new()
            .is_available(&mut session, keys.inner())
            .expect("Lock probe failed")
    }

    /// Returns true if a fresh session could take the outer lock for `key`.
    pub fn is_outer_free(&self, key: &str) -> bool {
        let keys = LockKeys::derive(key).expect("Key is valid");
        let mut session = self.primed_session();
        AdvisoryLockClient::new()
            .is_available(&mut session, keys.outer())
            .expect("Lock probe failed")
    }

    /// Asserts that no session is open and no lock is held.
    pub fn assert_quiescent(&self) {
        assert_eq!(self.store.active_sessions(), 0, "sessions left open");
        assert_eq!(self.store.held_lock_count(), 0, "locks left held");
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = InMemoryStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Returns a key no other test will use.
pub fn unique_key(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Runs a test with a fresh [`TestStore`].
///
/// # Example
///
/// ```rust,ignore
/// use skewguard_testkit::with_test_store;
///
/// #[test]
/// fn my_test() {
///     with_test_store(|store| {
///         let serializer = store.serializer();
///         serializer.acquire("k").unwrap().commit().unwrap();
///     });
/// }
/// ```
pub fn with_test_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::new();
    f(&store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_store_is_primed_and_quiet() {
        let store = TestStore::new();
        store.assert_quiescent();
        assert!(store.is_free("k"));
        assert!(store.is_outer_free("k"));
        store.assert_quiescent();
    }

    #[test]
    fn serializer_uses_short_timeout() {
        let store = TestStore::new();
        assert_eq!(store.serializer().config().lock_timeout, TEST_LOCK_TIMEOUT);
        assert_eq!(store.serializer().config().priming_table, PRIMING_TABLE);
    }

    #[test]
    fn unique_keys_differ() {
        let a = unique_key("order");
        let b = unique_key("order");
        assert_ne!(a, b);
        assert!(a.starts_with("order-"));
    }

    #[test]
    fn with_test_store_passes_through_result() {
        let held = with_test_store(|store| {
            let _session = store.serializer().acquire("k").unwrap();
            store.held_lock_count()
        });
        assert_eq!(held, 1);
    }
}
