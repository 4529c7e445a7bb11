//! Write-skew scenarios and cross-crate behavior tests.
//!
//! The classic example: a hospital requires at least one doctor on call.
//! Each doctor's transaction checks that someone else is still on call and
//! then takes itself off. Under snapshot isolation both checks can pass
//! against the same stale snapshot, both disjoint writes commit, and nobody
//! is left on call. Serializing both transactions on one shift key closes
//! the gap.

use crate::fixtures::TestStore;
use rand::Rng;
use serde::Serialize;
use skewguard_core::{sanitize, LockResult};
use skewguard_store::{Session, StoreError, TransactionalStore, Value};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Table holding one row per doctor: 1 when on call, 0 when off.
pub const ON_CALL_TABLE: &str = "on_call";

/// Key every serialized doctor transaction locks.
pub const SHIFT_KEY: &str = "shift-night";

/// What happened when every doctor tried to go off call at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSkewOutcome {
    /// Whether transactions went through the keyed serializer.
    pub serialized: bool,
    /// Doctors on call before the run.
    pub on_call_before: i64,
    /// Doctors on call after the run.
    pub on_call_after: i64,
    /// Transactions that took their doctor off call.
    pub went_off_call: usize,
    /// Lock conflicts retried along the way.
    pub conflicts: usize,
}

impl WriteSkewOutcome {
    /// Returns true if at least one doctor is still on call.
    pub fn invariant_held(&self) -> bool {
        self.on_call_after >= 1
    }
}

/// A store seeded with doctors who are all on call.
pub struct DoctorsScenario {
    store: TestStore,
    doctors: Vec<String>,
}

impl DoctorsScenario {
    /// Creates the scenario with the given doctors, all on call.
    pub fn new(doctors: &[&str]) -> Self {
        assert!(doctors.len() >= 2, "write skew needs at least two doctors");
        let store = TestStore::new();
        store
            .create_table(ON_CALL_TABLE)
            .expect("Failed to create on-call table");

        let mut session = store.open_session().expect("Failed to open session");
        for doctor in doctors {
            let command = set_on_call(doctor, 1).expect("Doctor name is a valid key");
            session.execute(&command).expect("Failed to seed doctor");
        }
        session.commit().expect("Failed to commit seed data");

        Self {
            store,
            doctors: doctors.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &TestStore {
        &self.store
    }

    /// Returns the number of doctors currently on call.
    pub fn on_call(&self) -> i64 {
        let mut session = self.store.open_session().expect("Failed to open session");
        on_call_count(&mut session).expect("Failed to count doctors on call")
    }

    /// Runs every doctor's transaction concurrently with no serialization.
    ///
    /// All reads happen before any commit, so every doctor sees the full
    /// roster and goes off call.
    ///
    /// # Errors
    ///
    /// Returns the first store error any transaction hit.
    pub fn run_unserialized(&self) -> LockResult<WriteSkewOutcome> {
        let before = self.on_call();
        let barrier = Arc::new(Barrier::new(self.doctors.len()));

        let handles: Vec<_> = self
            .doctors
            .iter()
            .cloned()
            .map(|doctor| {
                let store = self.store.store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || -> LockResult<bool> {
                    let mut session = store.open_session()?;
                    let on_call = on_call_count(&mut session);
                    barrier.wait();
                    if on_call? < 2 {
                        session.rollback()?;
                        return Ok(false);
                    }
                    session.execute(&set_on_call(&doctor, 0)?)?;
                    session.commit()?;
                    Ok(true)
                })
            })
            .collect();

        let mut went_off_call = 0;
        for handle in handles {
            if handle.join().expect("Thread panicked")? {
                went_off_call += 1;
            }
        }

        Ok(WriteSkewOutcome {
            serialized: false,
            on_call_before: before,
            on_call_after: self.on_call(),
            went_off_call,
            conflicts: 0,
        })
    }

    /// Runs every doctor's transaction concurrently, each serialized on
    /// [`SHIFT_KEY`] and retried with jitter on conflict.
    ///
    /// `hold` is how long a transaction keeps the lock after writing.
    ///
    /// # Errors
    ///
    /// Returns the first non-conflict error any transaction hit.
    pub fn run_serialized(&self, hold: Duration) -> LockResult<WriteSkewOutcome> {
        let before = self.on_call();
        let serializer = Arc::new(self.store.serializer());
        let barrier = Arc::new(Barrier::new(self.doctors.len()));

        let handles: Vec<_> = self
            .doctors
            .iter()
            .cloned()
            .map(|doctor| {
                let serializer = Arc::clone(&serializer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || -> LockResult<(bool, usize)> {
                    barrier.wait();
                    let mut conflicts = 0;
                    loop {
                        let result = serializer.transaction(SHIFT_KEY, |session| {
                            if on_call_count(session)? < 2 {
                                return Ok(false);
                            }
                            session.execute(&set_on_call(&doctor, 0)?)?;
                            thread::sleep(hold);
                            Ok(true)
                        });
                        match result {
                            Ok(went) => return Ok((went, conflicts)),
                            Err(e) if e.is_conflict() => {
                                conflicts += 1;
                                thread::sleep(jitter());
                            }
                            Err(e) => return Err(e),
                        }
                    }
                })
            })
            .collect();

        let mut went_off_call = 0;
        let mut conflicts = 0;
        for handle in handles {
            let (went, retried) = handle.join().expect("Thread panicked")?;
            went_off_call += usize::from(went);
            conflicts += retried;
        }

        Ok(WriteSkewOutcome {
            serialized: true,
            on_call_before: before,
            on_call_after: self.on_call(),
            went_off_call,
            conflicts,
        })
    }
}

fn set_on_call(doctor: &str, value: i64) -> LockResult<String> {
    let name = sanitize(doctor)?;
    Ok(format!(
        "UPSERT INTO {ON_CALL_TABLE} VALUES ({}, {value})",
        name.literal()
    ))
}

fn on_call_count<S: Session + ?Sized>(session: &mut S) -> LockResult<i64> {
    let row = session
        .query(&format!("SELECT SUM(value) FROM {ON_CALL_TABLE}"))?
        .next()
        .ok_or(StoreError::NoRows)?;
    match row.get("sum")? {
        Value::Int(n) => Ok(*n),
        _ => Ok(0),
    }
}

fn jitter() -> Duration {
    Duration::from_micros(rand::thread_rng().gen_range(200..2_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{unique_key, TEST_LOCK_TIMEOUT};
    use crate::generators::{
        hostile_key_strategy, invalid_key_strategy, lock_key_strategy, max_length_key_strategy,
    };
    use proptest::prelude::*;
    use skewguard_core::{KeyedSerializer, LockError, SerializerConfig};
    use std::time::Instant;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn acquired_key_leaves_outer_free(key in lock_key_strategy()) {
            let store = TestStore::new();
            let session = store.serializer().acquire(&key).unwrap();

            prop_assert!(store.is_outer_free(&key));
            prop_assert!(!store.is_free(&key));
            prop_assert_eq!(store.lock_holder(&key), Some(session.id()));

            drop(session);
            store.assert_quiescent();
        }

        #[test]
        fn max_length_keys_can_be_acquired(key in max_length_key_strategy()) {
            let store = TestStore::new();
            let session = store.serializer().acquire(&key).unwrap();

            prop_assert_eq!(store.lock_holder(&key), Some(session.id()));
            prop_assert!(store.is_outer_free(&key));

            session.commit().unwrap();
            store.assert_quiescent();
        }

        #[test]
        fn hostile_keys_lock_exactly_themselves(key in hostile_key_strategy()) {
            let store = TestStore::new();
            let session = store.serializer().acquire(&key).unwrap();

            prop_assert_eq!(store.lock_holder(&key), Some(session.id()));
            prop_assert_eq!(store.held_lock_count(), 1);

            session.commit().unwrap();
            store.assert_quiescent();
        }

        #[test]
        fn invalid_keys_touch_nothing(key in invalid_key_strategy()) {
            let store = TestStore::new();
            let seq = store.committed_seq();
            let err = store.serializer().acquire(&key).unwrap_err();

            let rejected = matches!(err, LockError::InvalidKey { .. });
            prop_assert!(rejected);
            prop_assert_eq!(store.committed_seq(), seq);
            store.assert_quiescent();
        }
    }

    #[test]
    fn second_acquire_conflicts_promptly() {
        let store = TestStore::new();
        let serializer = store.serializer();
        let key = unique_key("order");

        let held = serializer.acquire(&key).unwrap();
        let started = Instant::now();
        let err = serializer.acquire(&key).unwrap_err();

        assert!(err.is_conflict());
        assert!(started.elapsed() < TEST_LOCK_TIMEOUT * 10);
        assert_eq!(store.active_sessions(), 1);

        held.rollback().unwrap();
        store.assert_quiescent();
    }

    #[test]
    fn key_is_reusable_after_commit_and_rollback() {
        let store = TestStore::new();
        let serializer = store.serializer();

        serializer.acquire("k").unwrap().commit().unwrap();
        serializer.acquire("k").unwrap().rollback().unwrap();
        serializer.acquire("k").unwrap().commit().unwrap();
        store.assert_quiescent();
    }

    #[test]
    fn quote_in_key_is_harmless() {
        let store = TestStore::new();
        let session = store.serializer().acquire("a'b").unwrap();
        assert_eq!(session.key(), "a'b");
        assert_eq!(store.lock_holder("a'b"), Some(session.id()));
        assert!(store.is_free("a"));
    }

    #[test]
    fn two_threads_on_order_42_have_one_winner() {
        let store = TestStore::new();
        let serializer = Arc::new(store.serializer_with_timeout(Duration::ZERO));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let serializer = Arc::clone(&serializer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    serializer.acquire("order-42")
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(LockError::LockConflict { .. })))
            .count();
        let mut winners: Vec<_> = results.into_iter().filter_map(Result::ok).collect();

        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 1);
        assert_eq!(store.active_sessions(), 1);

        winners.pop().unwrap().rollback().unwrap();
        assert!(serializer.acquire("order-42").is_ok());
    }

    #[test]
    fn abandoned_session_is_reclaimed_after_timeout() {
        let store = TestStore::with_session_timeout(Duration::from_millis(100));
        let serializer = store.serializer();

        std::mem::forget(serializer.acquire("k").unwrap());
        assert!(serializer.acquire("k").unwrap_err().is_conflict());

        thread::sleep(Duration::from_millis(200));
        let session = serializer.acquire("k").unwrap();
        session.commit().unwrap();
    }

    #[test]
    fn abandoned_mid_handshake_holder_is_reclaimed() {
        let store = TestStore::with_session_timeout(Duration::from_millis(50));
        let serializer = store.serializer_with_timeout(Duration::from_secs(5));

        // A caller that crashed between taking the outer lock and returning.
        let mut rival = store.primed_session();
        rival
            .execute("SELECT APPLOCK_ACQUIRE('k_OUT', 0) AS lock_status")
            .unwrap();
        std::mem::forget(rival);

        // Expired holders are reclaimed by the next probe.
        thread::sleep(Duration::from_millis(100));
        let session = serializer.acquire("k").unwrap();
        assert!(!session.waited());
    }

    #[test]
    fn failed_priming_leaves_nothing_behind() {
        let store = TestStore::new();
        let serializer = KeyedSerializer::with_config(
            store.store.clone(),
            SerializerConfig::new("missing").lock_timeout(TEST_LOCK_TIMEOUT),
        )
        .unwrap();

        let err = serializer.acquire("k").unwrap_err();
        assert!(matches!(
            err,
            LockError::Store(StoreError::UnknownTable { .. })
        ));
        store.assert_quiescent();
    }

    #[test]
    fn locked_session_sees_previous_holders_commit() {
        let store = TestStore::new();
        let serializer = store.serializer();

        let mut first = serializer.acquire("k").unwrap();
        first
            .execute("UPSERT INTO priming VALUES ('k', 41)")
            .unwrap();
        first.commit().unwrap();

        let mut second = serializer.acquire("k").unwrap();
        let value = second
            .query("SELECT value FROM priming WHERE key = 'k'")
            .unwrap()
            .next()
            .map(|row| row.get_int("value").unwrap());
        assert_eq!(value, Some(41));
    }

    #[test]
    fn unserialized_doctors_break_the_invariant() {
        let scenario = DoctorsScenario::new(&["alice", "bob"]);
        let outcome = scenario.run_unserialized().unwrap();

        assert_eq!(outcome.on_call_before, 2);
        assert_eq!(outcome.went_off_call, 2);
        assert_eq!(outcome.on_call_after, 0);
        assert!(!outcome.invariant_held());
    }

    #[test]
    fn serialized_doctors_keep_someone_on_call() {
        let scenario = DoctorsScenario::new(&["alice", "bob", "o'brien"]);
        let outcome = scenario.run_serialized(Duration::from_millis(5)).unwrap();

        assert_eq!(outcome.on_call_before, 3);
        assert_eq!(outcome.went_off_call, 2);
        assert_eq!(outcome.on_call_after, 1);
        assert!(outcome.invariant_held());
        scenario.store().assert_quiescent();
    }

    #[test]
    fn outcome_serializes_to_json() {
        let outcome = WriteSkewOutcome {
            serialized: true,
            on_call_before: 2,
            on_call_after: 1,
            went_off_call: 1,
            conflicts: 3,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["on_call_after"], 1);
        assert_eq!(json["conflicts"], 3);
    }
}
