//! Contention stress tests for SkewGuard.
//!
//! Many threads repeatedly acquire the same key, increment a counter row
//! while holding it, and commit. The report records how often each attempt
//! won, conflicted, or failed, and how many holders were ever active at
//! once.

use rand::Rng;
use serde::Serialize;
use skewguard_core::{sanitize, KeyedSerializer, LockError, LockResult};
use skewguard_store::{Session, TransactionalStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a contention run.
#[derive(Debug, Clone)]
pub struct ContentionConfig {
    /// Key every thread contends on.
    pub key: String,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Acquire attempts per thread.
    pub attempts_per_thread: usize,
    /// Lock timeout for each acquire.
    pub lock_timeout: Duration,
    /// How long a winner holds the lock before committing.
    pub hold: Duration,
    /// Upper bound of the random pause between attempts.
    pub max_jitter: Duration,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            key: "order-42".to_string(),
            threads: 4,
            attempts_per_thread: 25,
            lock_timeout: Duration::from_millis(10),
            hold: Duration::from_millis(1),
            max_jitter: Duration::from_millis(2),
        }
    }
}

/// Result of a contention run.
#[derive(Debug, Clone, Serialize)]
pub struct ContentionReport {
    /// Key contended on.
    pub key: String,
    /// Number of threads.
    pub threads: usize,
    /// Total acquire attempts.
    pub attempts: usize,
    /// Attempts that got a session and committed.
    pub granted: usize,
    /// Attempts turned away with a lock conflict.
    pub conflicts: usize,
    /// Attempts that failed any other way.
    pub failures: usize,
    /// Granted attempts that had to wait for a lock.
    pub waited: usize,
    /// Most sessions ever holding the key at the same time.
    pub max_concurrent_holders: usize,
    /// Counter value after the run; equals `granted` when no update was lost.
    pub counter: i64,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: f64,
    /// Attempts per second.
    pub attempts_per_second: f64,
}

impl ContentionReport {
    /// Returns true if the key was never held twice and no increment was lost.
    pub fn is_consistent(&self) -> bool {
        self.max_concurrent_holders <= 1 && self.counter == self.granted as i64
    }

    /// Renders the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if encoding fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Key: {}", self.key);
        println!("Threads: {}", self.threads);
        println!("Attempts: {}", self.attempts);
        println!("Granted: {} ({} after waiting)", self.granted, self.waited);
        println!("Conflicts: {}", self.conflicts);
        println!("Failures: {}", self.failures);
        println!("Max concurrent holders: {}", self.max_concurrent_holders);
        println!("Counter: {}", self.counter);
        println!("Duration: {:.2} ms", self.elapsed_ms);
        println!("Throughput: {:.2} attempts/sec", self.attempts_per_second);
    }
}

#[derive(Default)]
struct Tally {
    granted: AtomicUsize,
    conflicts: AtomicUsize,
    failures: AtomicUsize,
    waited: AtomicUsize,
    holders: AtomicUsize,
    max_holders: AtomicUsize,
}

/// Runs a contention test against `serializer`.
///
/// Each winner increments a counter row named after the key in the
/// serializer's priming table.
///
/// # Errors
///
/// Returns [`LockError::InvalidKey`] if the configured key is invalid, or
/// a store error if the final counter cannot be read.
pub fn run_contention<T>(
    serializer: Arc<KeyedSerializer<T>>,
    config: &ContentionConfig,
) -> LockResult<ContentionReport>
where
    T: TransactionalStore + 'static,
{
    let key = sanitize(&config.key)?;
    let table = serializer.config().priming_table.clone();
    let read = format!("SELECT value FROM {table} WHERE key = {}", key.literal());
    let tally = Arc::new(Tally::default());

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let serializer = Arc::clone(&serializer);
            let tally = Arc::clone(&tally);
            let key = key.clone();
            let table = table.clone();
            let read = read.clone();
            let config = config.clone();

            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..config.attempts_per_thread {
                    let outcome = serializer
                        .acquire_with_timeout(key.as_str(), config.lock_timeout)
                        .and_then(|mut session| {
                            let held = tally.holders.fetch_add(1, Ordering::SeqCst) + 1;
                            tally.max_holders.fetch_max(held, Ordering::SeqCst);

                            let result = increment(&mut *session, &read, &table, key.literal());
                            thread::sleep(config.hold);
                            tally.holders.fetch_sub(1, Ordering::SeqCst);

                            result?;
                            let waited = session.waited();
                            session.commit()?;
                            Ok(waited)
                        });

                    match outcome {
                        Ok(waited) => {
                            tally.granted.fetch_add(1, Ordering::Relaxed);
                            if waited {
                                tally.waited.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(LockError::LockConflict { .. }) => {
                            tally.conflicts.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            tally.failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    let jitter_us = config.max_jitter.as_micros() as u64;
                    if jitter_us > 0 {
                        thread::sleep(Duration::from_micros(rng.gen_range(0..=jitter_us)));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    let elapsed = start.elapsed();

    let mut session = serializer.store().open_session()?;
    let counter = read_counter(&mut session, &read)?;
    session.rollback()?;

    let attempts = config.threads * config.attempts_per_thread;
    let attempts_per_second = if elapsed.as_secs_f64() > 0.0 {
        attempts as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    Ok(ContentionReport {
        key: config.key.clone(),
        threads: config.threads,
        attempts,
        granted: tally.granted.load(Ordering::Relaxed),
        conflicts: tally.conflicts.load(Ordering::Relaxed),
        failures: tally.failures.load(Ordering::Relaxed),
        waited: tally.waited.load(Ordering::Relaxed),
        max_concurrent_holders: tally.max_holders.load(Ordering::SeqCst),
        counter,
        elapsed_ms: elapsed.as_secs_f64() * 1_000.0,
        attempts_per_second,
    })
}

fn increment<S: Session + ?Sized>(
    session: &mut S,
    read: &str,
    table: &str,
    literal: &str,
) -> LockResult<()> {
    let next = read_counter(session, read)? + 1;
    session.execute(&format!("UPSERT INTO {table} VALUES ({literal}, {next})"))?;
    Ok(())
}

fn read_counter<S: Session + ?Sized>(session: &mut S, read: &str) -> LockResult<i64> {
    match session.query(read)?.next() {
        Some(row) => Ok(row.get_int("value")?),
        None => Ok(0),
    }
}
