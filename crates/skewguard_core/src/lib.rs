//! # SkewGuard Core
//!
//! Keyed transaction serialization for snapshot-isolated stores.
//!
//! Under snapshot isolation two transactions can each read a consistent but
//! stale view and commit disjoint writes that together break an invariant
//! (write skew). This crate closes that gap per key: for any key, at most
//! one session holding its lock is active, and that session's snapshot is
//! taken after the lock was obtained.
//!
//! This crate provides:
//! - [`AdvisoryLockClient`] for validated lock probes and acquires
//! - [`KeyedSerializer`] running the two-phase outer/inner lock handshake
//! - [`KeyedSession`], the locked session handed back to callers
//!
//! ## Example
//!
//! ```rust
//! use skewguard_core::{KeyedSerializer, LockError};
//! use skewguard_store::{InMemoryStore, Session};
//!
//! let store = InMemoryStore::new();
//! store.create_table("orders").unwrap();
//! let serializer = KeyedSerializer::new(store, "orders").unwrap();
//!
//! let mut session = serializer.acquire("order-42").unwrap();
//! session.execute("UPSERT INTO orders VALUES ('order-42', 1)").unwrap();
//!
//! // A second caller is turned away while the first session lives.
//! assert!(matches!(
//!     serializer.acquire("order-42"),
//!     Err(LockError::LockConflict { .. })
//! ));
//!
//! session.commit().unwrap();
//! assert!(serializer.acquire("order-42").is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod guard;
mod key;
mod serializer;
mod session;

pub use client::{AcquireResult, AdvisoryLockClient, DEFAULT_LOCK_TIMEOUT};
pub use config::SerializerConfig;
pub use error::{LockError, LockResult};
pub use key::{sanitize, LockKeys, SanitizedKey, MAX_KEY_LEN, OUTER_SUFFIX};
pub use serializer::KeyedSerializer;
pub use session::KeyedSession;
