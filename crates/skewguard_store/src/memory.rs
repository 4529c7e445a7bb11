//! In-memory snapshot-isolated store.

use crate::command::{self, Command};
use crate::config::StoreConfig;
use crate::cursor::RowCursor;
use crate::error::{StoreError, StoreResult};
use crate::locks::{LockStatus, LockTable};
use crate::store::{Session, TransactionalStore};
use crate::types::{SequenceNumber, SessionId, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct Version {
    seq: SequenceNumber,
    /// `None` is a tombstone.
    value: Option<i64>,
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<String, Vec<Version>>,
}

impl Table {
    fn visible(&self, key: &str, snapshot: SequenceNumber) -> Option<i64> {
        self.rows
            .get(key)?
            .iter()
            .rev()
            .find(|v| v.seq <= snapshot)
            .and_then(|v| v.value)
    }

    fn latest_seq(&self, key: &str) -> Option<SequenceNumber> {
        self.rows.get(key)?.last().map(|v| v.seq)
    }
}

#[derive(Debug, Default)]
struct Catalog {
    tables: HashMap<String, Table>,
    committed: SequenceNumber,
}

#[derive(Debug)]
struct SessionEntry {
    last_active: Instant,
}

#[derive(Debug)]
struct Shared {
    config: StoreConfig,
    next_session: AtomicU64,
    catalog: RwLock<Catalog>,
    locks: LockTable,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl Shared {
    /// Records activity on a session, failing if the store reclaimed it.
    fn touch(&self, id: SessionId) -> StoreResult<()> {
        let mut sessions = self.sessions.lock();
        let now = Instant::now();
        let Some(entry) = sessions.get_mut(&id) else {
            return Err(StoreError::SessionExpired { session: id });
        };

        let idle = now.duration_since(entry.last_active);
        if self.config.session_timeout.is_some_and(|t| idle > t) {
            sessions.remove(&id);
            drop(sessions);
            let released = self.locks.release_all(id);
            debug!(session = %id, released, "session expired");
            return Err(StoreError::SessionExpired { session: id });
        }

        entry.last_active = now;
        Ok(())
    }

    /// Reclaims every session idle past the session timeout.
    fn reap_expired(&self) {
        let Some(timeout) = self.config.session_timeout else {
            return;
        };
        let now = Instant::now();
        let expired: Vec<SessionId> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<_> = sessions
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_active) > timeout)
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                sessions.remove(id);
            }
            ids
        };

        for id in expired {
            let released = self.locks.release_all(id);
            debug!(session = %id, released, "reclaimed expired session");
        }
    }

    fn end_session(&self, id: SessionId) {
        self.sessions.lock().remove(&id);
        self.locks.release_all(id);
    }
}

/// An in-memory transactional store with snapshot isolation.
///
/// This store is the reference collaborator for the keyed serializer and
/// is suitable for:
/// - Unit and integration tests
/// - Demonstrating write skew and its prevention
///
/// # Semantics
///
/// - Each session reads the snapshot committed at its first data command,
///   plus its own pending writes. Advisory-lock calls never move the
///   snapshot, so a session that primes and then waits for a lock keeps
///   reading the state from before the wait
/// - Commits are first-committer-wins: writing a key that someone else
///   committed after your snapshot fails with [`StoreError::WriteConflict`]
/// - Tables are created outside of transactions and are visible at once
/// - Advisory locks are exclusive, re-entrant per session, and released
///   when the session ends
///
/// # Thread Safety
///
/// Cloning the store is cheap and every clone shares the same data,
/// sessions and lock table.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store with the given configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                next_session: AtomicU64::new(1),
                catalog: RwLock::new(Catalog::default()),
                locks: LockTable::new(),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Creates an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableExists`] if the name is taken.
    pub fn create_table(&self, name: &str) -> StoreResult<()> {
        let mut catalog = self.shared.catalog.write();
        if catalog.tables.contains_key(name) {
            return Err(StoreError::TableExists {
                name: name.to_string(),
            });
        }
        catalog.tables.insert(name.to_string(), Table::default());
        Ok(())
    }

    /// Returns the sequence number of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.shared.catalog.read().committed
    }

    /// Returns the number of open, unexpired sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.shared.reap_expired();
        self.shared.sessions.lock().len()
    }

    /// Returns the session holding an advisory lock on `resource`.
    #[must_use]
    pub fn lock_holder(&self, resource: &str) -> Option<SessionId> {
        self.shared.reap_expired();
        self.shared.locks.holder(resource)
    }

    /// Returns the number of resources currently locked.
    #[must_use]
    pub fn held_lock_count(&self) -> usize {
        self.shared.reap_expired();
        self.shared.locks.held_count()
    }
}

impl TransactionalStore for InMemoryStore {
    type Session = InMemorySession;

    fn open_session(&self) -> StoreResult<InMemorySession> {
        let id = SessionId::new(self.shared.next_session.fetch_add(1, Ordering::SeqCst));
        let snapshot = self.shared.catalog.read().committed;
        self.shared.sessions.lock().insert(
            id,
            SessionEntry {
                last_active: Instant::now(),
            },
        );
        debug!(session = %id, snapshot = %snapshot, "opened session");

        Ok(InMemorySession {
            id,
            shared: Arc::clone(&self.shared),
            snapshot,
            state: SessionState::Active,
            writes: BTreeMap::new(),
            touched: false,
        })
    }
}

/// State of an [`InMemorySession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is open and accepts commands.
    Active,
    /// Session was committed.
    Committed,
    /// Session was rolled back (explicitly, by a failed commit, or on drop).
    RolledBack,
    /// Session was reclaimed by the store after idling too long.
    Expired,
}

/// A session on an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemorySession {
    id: SessionId,
    shared: Arc<Shared>,
    snapshot: SequenceNumber,
    state: SessionState,
    /// Pending writes: (table, key) -> new value, `None` for delete.
    writes: BTreeMap<(String, String), Option<i64>>,
    /// Whether a data command has run, which enables lock calls.
    touched: bool,
}

impl InMemorySession {
    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the snapshot this session reads at.
    ///
    /// Until the first data command this is the sequence committed when the
    /// session was opened; the first data command moves it to the latest.
    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    fn ensure_active(&mut self) -> StoreResult<()> {
        match self.state {
            SessionState::Active => self.shared.touch(self.id).inspect_err(|_| {
                self.state = SessionState::Expired;
                self.writes.clear();
            }),
            SessionState::Expired => Err(StoreError::SessionExpired { session: self.id }),
            SessionState::Committed | SessionState::RolledBack => {
                Err(StoreError::SessionClosed { session: self.id })
            }
        }
    }

    fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.writes.clear();
        self.shared.end_session(self.id);
    }

    fn run(&mut self, command: Command) -> StoreResult<RowCursor> {
        match command {
            Command::CreateTable { table } => {
                let mut catalog = self.shared.catalog.write();
                if catalog.tables.contains_key(&table) {
                    return Err(StoreError::TableExists { name: table });
                }
                catalog.tables.insert(table, Table::default());
                Ok(RowCursor::empty())
            }
            Command::SelectAll { table, limit } => {
                let limit = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
                let rows = self
                    .visible_rows(&table)?
                    .into_iter()
                    .take(limit)
                    .map(|(key, value)| vec![Value::Text(key), Value::Int(value)])
                    .collect();
                Ok(RowCursor::new(vec!["key".into(), "value".into()], rows))
            }
            Command::SelectValue { table, key } => {
                let rows = self
                    .read(&table, &key)?
                    .map(|v| vec![Value::Int(v)])
                    .into_iter()
                    .collect();
                Ok(RowCursor::new(vec!["value".into()], rows))
            }
            Command::SelectSum { table } => {
                let rows = self.visible_rows(&table)?;
                let sum = if rows.is_empty() {
                    Value::Null
                } else {
                    Value::Int(rows.values().fold(0i64, |acc, v| acc.saturating_add(*v)))
                };
                Ok(RowCursor::single("sum", sum))
            }
            Command::Upsert { table, key, value } => {
                self.ensure_table(&table)?;
                self.writes.insert((table, key), Some(value));
                Ok(RowCursor::empty())
            }
            Command::Delete { table, key } => {
                self.ensure_table(&table)?;
                self.writes.insert((table, key), None);
                Ok(RowCursor::empty())
            }
            Command::LockTest { resource, column } => {
                self.ensure_lock_context()?;
                self.check_resource(&resource)?;
                self.shared.reap_expired();
                let available = self.shared.locks.is_available(&resource, self.id);
                trace!(session = %self.id, resource = %resource, available, "lock test");
                Ok(RowCursor::single(column, Value::Bool(available)))
            }
            Command::LockAcquire {
                resource,
                timeout_ms,
                column,
            } => {
                self.ensure_lock_context()?;
                self.check_resource(&resource)?;
                let status = match u64::try_from(timeout_ms) {
                    Ok(ms) => self.acquire_lock(&resource, Duration::from_millis(ms))?,
                    Err(_) => LockStatus::CallError,
                };
                debug!(session = %self.id, resource = %resource, status = ?status, "lock request");
                Ok(RowCursor::single(column, Value::Int(status.code())))
            }
        }
    }

    fn acquire_lock(&mut self, resource: &str, timeout: Duration) -> StoreResult<LockStatus> {
        let id = self.id;
        let shared = Arc::clone(&self.shared);
        let result = shared.locks.acquire(
            resource,
            id,
            timeout,
            shared.config.poll_interval(),
            || {
                shared.reap_expired();
                shared.touch(id)
            },
        );
        match &result {
            Err(StoreError::SessionExpired { .. }) => {
                self.state = SessionState::Expired;
                self.writes.clear();
            }
            _ => {}
        }
        result
    }

    fn ensure_table(&self, table: &str) -> StoreResult<()> {
        if self.shared.catalog.read().tables.contains_key(table) {
            Ok(())
        } else {
            Err(StoreError::unknown_table(table))
        }
    }

    fn ensure_lock_context(&self) -> StoreResult<()> {
        if self.shared.config.require_transaction_context && !self.touched {
            return Err(StoreError::NoTransactionContext { session: self.id });
        }
        Ok(())
    }

    fn check_resource(&self, resource: &str) -> StoreResult<()> {
        if resource.is_empty() {
            return Err(StoreError::invalid_resource(
                "resource name must not be empty",
            ));
        }
        let len = resource.chars().count();
        let max = self.shared.config.max_resource_len;
        if len > max {
            return Err(StoreError::invalid_resource(format!(
                "{len} characters exceeds the maximum of {max}"
            )));
        }
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> StoreResult<Option<i64>> {
        if let Some(pending) = self.writes.get(&(table.to_string(), key.to_string())) {
            return Ok(*pending);
        }
        let catalog = self.shared.catalog.read();
        let table = catalog
            .tables
            .get(table)
            .ok_or_else(|| StoreError::unknown_table(table))?;
        Ok(table.visible(key, self.snapshot))
    }

    fn visible_rows(&self, table: &str) -> StoreResult<BTreeMap<String, i64>> {
        let mut rows = {
            let catalog = self.shared.catalog.read();
            let data = catalog
                .tables
                .get(table)
                .ok_or_else(|| StoreError::unknown_table(table))?;
            data.rows
                .keys()
                .filter_map(|k| data.visible(k, self.snapshot).map(|v| (k.clone(), v)))
                .collect::<BTreeMap<_, _>>()
        };

        for ((t, key), value) in &self.writes {
            if t != table {
                continue;
            }
            match value {
                Some(v) => {
                    rows.insert(key.clone(), *v);
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        Ok(rows)
    }

    fn apply_writes(&self) -> StoreResult<SequenceNumber> {
        let mut catalog = self.shared.catalog.write();
        if self.writes.is_empty() {
            return Ok(catalog.committed);
        }

        for (table, key) in self.writes.keys() {
            let data = catalog
                .tables
                .get(table)
                .ok_or_else(|| StoreError::unknown_table(table.as_str()))?;
            if data.latest_seq(key).is_some_and(|seq| seq > self.snapshot) {
                return Err(StoreError::WriteConflict {
                    table: table.clone(),
                    key: key.clone(),
                });
            }
        }

        let seq = catalog.committed.next();
        for ((table, key), value) in &self.writes {
            if let Some(data) = catalog.tables.get_mut(table) {
                data.rows.entry(key.clone()).or_default().push(Version {
                    seq,
                    value: *value,
                });
            }
        }
        catalog.committed = seq;
        Ok(seq)
    }
}

impl Session for InMemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    fn query(&mut self, command: &str) -> StoreResult<RowCursor> {
        self.ensure_active()?;
        trace!(session = %self.id, command, "query");
        let command = command::parse(command)?;
        let touches_data = command.touches_data();
        if touches_data && !self.touched {
            self.snapshot = self.shared.catalog.read().committed;
            trace!(session = %self.id, snapshot = %self.snapshot, "snapshot taken");
        }
        let rows = self.run(command)?;
        if touches_data {
            self.touched = true;
        }
        Ok(rows)
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        let result = self.apply_writes();
        match &result {
            Ok(seq) => {
                debug!(session = %self.id, seq = %seq, "committed");
                self.finish(SessionState::Committed);
            }
            Err(e) => {
                debug!(session = %self.id, error = %e, "commit failed, rolling back");
                self.finish(SessionState::RolledBack);
            }
        }
        result.map(drop)
    }

    fn rollback(&mut self) -> StoreResult<()> {
        match self.state {
            SessionState::Active => {
                debug!(session = %self.id, "rolled back");
                self.finish(SessionState::RolledBack);
                Ok(())
            }
            SessionState::Expired => Err(StoreError::SessionExpired { session: self.id }),
            SessionState::Committed | SessionState::RolledBack => {
                Err(StoreError::SessionClosed { session: self.id })
            }
        }
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            trace!(session = %self.id, "dropping active session");
            self.finish(SessionState::RolledBack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn store_with_table() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_table("t").unwrap();
        store
    }

    fn put(store: &InMemoryStore, key: &str, value: i64) {
        let mut s = store.open_session().unwrap();
        s.execute(&format!("UPSERT INTO t VALUES ('{key}', {value})"))
            .unwrap();
        s.commit().unwrap();
    }

    fn get(session: &mut InMemorySession, key: &str) -> Option<i64> {
        session
            .query(&format!("SELECT value FROM t WHERE key = '{key}'"))
            .unwrap()
            .next()
            .map(|row| row.get_int("value").unwrap())
    }

    fn primed(store: &InMemoryStore) -> InMemorySession {
        let mut s = store.open_session().unwrap();
        s.execute("SELECT * FROM t LIMIT 1").unwrap();
        s
    }

    fn acquire(session: &mut InMemorySession, resource: &str, timeout_ms: i64) -> LockStatus {
        let code = session
            .query(&format!("SELECT APPLOCK_ACQUIRE('{resource}', {timeout_ms})"))
            .unwrap()
            .next()
            .unwrap()
            .get_int("lock_status")
            .unwrap();
        LockStatus::from_code(code).unwrap()
    }

    fn available(session: &mut InMemorySession, resource: &str) -> bool {
        session
            .query(&format!("SELECT APPLOCK_TEST('{resource}')"))
            .unwrap()
            .next()
            .unwrap()
            .get_bool("lock_available")
            .unwrap()
    }

    #[test]
    fn open_session_is_active() {
        let store = store_with_table();
        let session = store.open_session().unwrap();
        assert!(session.is_active());
        assert_eq!(store.active_sessions(), 1);
    }

    #[test]
    fn committed_data_visible_to_new_session() {
        let store = store_with_table();
        put(&store, "a", 42);

        let mut reader = store.open_session().unwrap();
        assert_eq!(get(&mut reader, "a"), Some(42));
        assert_eq!(store.committed_seq().as_u64(), 1);
    }

    #[test]
    fn rolled_back_data_not_visible() {
        let store = store_with_table();
        let mut writer = store.open_session().unwrap();
        writer.execute("UPSERT INTO t VALUES ('a', 1)").unwrap();
        writer.rollback().unwrap();

        let mut reader = store.open_session().unwrap();
        assert_eq!(get(&mut reader, "a"), None);
        assert_eq!(store.active_sessions(), 1);
    }

    #[test]
    fn session_sees_own_pending_writes() {
        let store = store_with_table();
        let mut s = store.open_session().unwrap();
        s.execute("UPSERT INTO t VALUES ('a', 5)").unwrap();
        assert_eq!(get(&mut s, "a"), Some(5));
        assert_eq!(s.write_count(), 1);

        s.execute("DELETE FROM t WHERE key = 'a'").unwrap();
        assert_eq!(get(&mut s, "a"), None);
    }

    #[test]
    fn snapshot_reader_sees_old_version() {
        let store = store_with_table();
        put(&store, "a", 1);

        let mut reader = store.open_session().unwrap();
        assert_eq!(get(&mut reader, "a"), Some(1));
        put(&store, "a", 2);

        assert_eq!(get(&mut reader, "a"), Some(1));
        let mut fresh = store.open_session().unwrap();
        assert_eq!(get(&mut fresh, "a"), Some(2));
    }

    #[test]
    fn select_all_and_sum_merge_pending_writes() {
        let store = store_with_table();
        put(&store, "a", 1);
        put(&store, "b", 2);

        let mut s = store.open_session().unwrap();
        s.execute("UPSERT INTO t VALUES ('c', 3)").unwrap();
        s.execute("DELETE FROM t WHERE key = 'a'").unwrap();

        let keys: Vec<String> = s
            .query("SELECT * FROM t")
            .unwrap()
            .map(|row| row.get_text("key").unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["b", "c"]);

        let sum = s
            .query("SELECT SUM(value) FROM t")
            .unwrap()
            .next()
            .unwrap()
            .get_int("sum")
            .unwrap();
        assert_eq!(sum, 5);
        assert_eq!(s.query("SELECT * FROM t LIMIT 1").unwrap().remaining(), 1);
    }

    #[test]
    fn sum_of_empty_table_is_null() {
        let store = store_with_table();
        let mut s = store.open_session().unwrap();
        let row = s.query("SELECT SUM(value) FROM t").unwrap().next().unwrap();
        assert!(row.get("sum").unwrap().is_null());
    }

    #[test]
    fn first_committer_wins_on_same_key() {
        let store = store_with_table();
        let mut s1 = store.open_session().unwrap();
        let mut s2 = store.open_session().unwrap();
        s1.execute("UPSERT INTO t VALUES ('a', 1)").unwrap();
        s2.execute("UPSERT INTO t VALUES ('a', 2)").unwrap();

        s1.commit().unwrap();
        let err = s2.commit().unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict { .. }));
        assert_eq!(s2.state(), SessionState::RolledBack);
    }

    #[test]
    fn disjoint_writes_both_commit() {
        // Snapshot isolation lets both through; this is the write-skew window.
        let store = store_with_table();
        let mut s1 = store.open_session().unwrap();
        let mut s2 = store.open_session().unwrap();
        s1.execute("UPSERT INTO t VALUES ('a', 1)").unwrap();
        s2.execute("UPSERT INTO t VALUES ('b', 1)").unwrap();
        s1.commit().unwrap();
        s2.commit().unwrap();
    }

    #[test]
    fn unknown_table_fails() {
        let store = InMemoryStore::new();
        let mut s = store.open_session().unwrap();
        let err = s.execute("SELECT * FROM missing LIMIT 1").unwrap_err();
        assert_eq!(err, StoreError::unknown_table("missing"));
    }

    #[test]
    fn create_table_twice_fails() {
        let store = store_with_table();
        assert!(matches!(
            store.create_table("t"),
            Err(StoreError::TableExists { .. })
        ));
        let mut s = store.open_session().unwrap();
        assert!(s.execute("CREATE TABLE u").is_ok());
        assert!(s.execute("CREATE TABLE u").is_err());
    }

    #[test]
    fn cannot_commit_twice() {
        let store = store_with_table();
        let mut s = store.open_session().unwrap();
        s.commit().unwrap();
        assert!(matches!(s.commit(), Err(StoreError::SessionClosed { .. })));
        assert!(matches!(s.rollback(), Err(StoreError::SessionClosed { .. })));
        assert!(s.execute("SELECT * FROM t").is_err());
    }

    #[test]
    fn lock_calls_need_transaction_context() {
        let store = store_with_table();
        let mut s = store.open_session().unwrap();
        let err = s.query("SELECT APPLOCK_TEST('r')").unwrap_err();
        assert!(matches!(err, StoreError::NoTransactionContext { .. }));

        s.execute("SELECT * FROM t LIMIT 1").unwrap();
        assert!(available(&mut s, "r"));
    }

    #[test]
    fn failed_read_does_not_open_context() {
        let store = store_with_table();
        let mut s = store.open_session().unwrap();
        assert!(s.execute("SELECT * FROM missing LIMIT 1").is_err());
        assert!(s.query("SELECT APPLOCK_TEST('r')").is_err());
    }

    #[test]
    fn context_requirement_can_be_disabled() {
        let store = InMemoryStore::with_config(StoreConfig::new().require_transaction_context(false));
        let mut s = store.open_session().unwrap();
        assert!(available(&mut s, "r"));
    }

    #[test]
    fn lock_is_exclusive_until_session_ends() {
        let store = store_with_table();
        let mut holder = primed(&store);
        let mut other = primed(&store);

        assert_eq!(acquire(&mut holder, "r", 0), LockStatus::Granted);
        assert!(available(&mut holder, "r"));
        assert!(!available(&mut other, "r"));
        assert_eq!(acquire(&mut other, "r", 10), LockStatus::TimedOut);
        assert_eq!(store.lock_holder("r"), Some(holder.id()));

        holder.commit().unwrap();
        assert!(available(&mut other, "r"));
        assert_eq!(store.held_lock_count(), 0);
    }

    #[test]
    fn dropping_session_releases_locks() {
        let store = store_with_table();
        {
            let mut holder = primed(&store);
            acquire(&mut holder, "r", 0);
            assert_eq!(store.held_lock_count(), 1);
        }
        assert_eq!(store.held_lock_count(), 0);
        assert_eq!(store.active_sessions(), 0);
    }

    #[test]
    fn waiter_gets_lock_after_holder_rolls_back() {
        let store = store_with_table();
        let mut holder = primed(&store);
        acquire(&mut holder, "r", 0);

        let waiter = {
            let store = store.clone();
            thread::spawn(move || {
                let mut s = primed(&store);
                let status = acquire(&mut s, "r", 5_000);
                (status, s)
            })
        };

        thread::sleep(Duration::from_millis(50));
        holder.rollback().unwrap();

        let (status, s) = waiter.join().unwrap();
        assert_eq!(status, LockStatus::GrantedAfterWait);
        assert_eq!(store.lock_holder("r"), Some(s.id()));
    }

    #[test]
    fn snapshot_is_taken_at_first_data_command() {
        let store = store_with_table();
        let mut s = store.open_session().unwrap();
        put(&store, "a", 1);

        assert_eq!(get(&mut s, "a"), Some(1));
        put(&store, "a", 2);
        assert_eq!(get(&mut s, "a"), Some(1));
    }

    #[test]
    fn lock_grant_does_not_move_snapshot() {
        let store = store_with_table();
        let mut s = primed(&store);
        let before = s.snapshot();
        put(&store, "a", 1);

        assert_eq!(acquire(&mut s, "r", 0), LockStatus::Granted);
        assert_eq!(s.snapshot(), before);
        assert_eq!(get(&mut s, "a"), None);
    }

    #[test]
    fn waiter_keeps_snapshot_from_before_the_wait() {
        let store = store_with_table();
        let mut holder = primed(&store);
        acquire(&mut holder, "r", 0);

        let base = store.clone();
        let waiter = thread::spawn(move || {
            let mut s = primed(&base);
            let status = acquire(&mut s, "r", 5_000);
            (status, get(&mut s, "a"))
        });

        thread::sleep(Duration::from_millis(50));
        put(&store, "a", 1);
        holder.rollback().unwrap();

        let (status, value) = waiter.join().unwrap();
        assert_eq!(status, LockStatus::GrantedAfterWait);
        assert_eq!(value, None);
    }

    #[test]
    fn negative_timeout_is_a_call_error() {
        let store = store_with_table();
        let mut s = primed(&store);
        assert_eq!(acquire(&mut s, "r", -5), LockStatus::CallError);
        assert_eq!(store.held_lock_count(), 0);
    }

    #[test]
    fn resource_name_is_validated() {
        let store = store_with_table();
        let mut s = primed(&store);
        let long = "x".repeat(256);
        let err = s
            .query(&format!("SELECT APPLOCK_TEST('{long}')"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidResource { .. }));
        assert!(s.query("SELECT APPLOCK_TEST('')").is_err());
        assert!(available(&mut s, &"x".repeat(255)));
    }

    #[test]
    fn idle_session_expires_and_loses_locks() {
        let store = InMemoryStore::with_config(
            StoreConfig::new().session_timeout(Duration::from_millis(50)),
        );
        store.create_table("t").unwrap();

        let mut abandoned = primed(&store);
        acquire(&mut abandoned, "r", 0);

        let mut probe = primed(&store);
        assert!(!available(&mut probe, "r"));
        drop(probe);

        thread::sleep(Duration::from_millis(120));
        let mut fresh = primed(&store);
        assert!(available(&mut fresh, "r"));
        assert_eq!(acquire(&mut fresh, "r", 0), LockStatus::Granted);

        let err = abandoned.execute("SELECT * FROM t").unwrap_err();
        assert!(matches!(err, StoreError::SessionExpired { .. }));
        assert_eq!(abandoned.state(), SessionState::Expired);
    }

    #[test]
    fn waiter_notices_expired_holder() {
        let store = InMemoryStore::with_config(
            StoreConfig::new().session_timeout(Duration::from_millis(100)),
        );
        store.create_table("t").unwrap();

        let mut abandoned = primed(&store);
        acquire(&mut abandoned, "r", 0);

        let mut waiter = primed(&store);
        assert_eq!(acquire(&mut waiter, "r", 2_000), LockStatus::GrantedAfterWait);
        drop(abandoned);
    }
}
