//! # SkewGuard Store
//!
//! Transactional store abstraction for SkewGuard.
//!
//! This crate defines the collaborator the keyed serializer runs against:
//! a store that opens independent transactional sessions, executes text
//! commands inside them, and offers a session-scoped advisory lock.
//!
//! ## Design Principles
//!
//! - Sessions are opaque: callers only see commands, cursors and
//!   commit/rollback
//! - Advisory locks belong to the session that took them and are released
//!   by the store when that session ends
//! - Failures are typed ([`StoreError`]), never message strings
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - Snapshot-isolated reference store for tests and demos
//!
//! ## Example
//!
//! ```rust
//! use skewguard_store::{InMemoryStore, Session, TransactionalStore};
//!
//! let store = InMemoryStore::new();
//! store.create_table("accounts").unwrap();
//!
//! let mut session = store.open_session().unwrap();
//! session.execute("UPSERT INTO accounts VALUES ('alice', 100)").unwrap();
//! session.commit().unwrap();
//!
//! let mut reader = store.open_session().unwrap();
//! let mut rows = reader.query("SELECT value FROM accounts WHERE key = 'alice'").unwrap();
//! assert_eq!(rows.next().unwrap().get_int("value").unwrap(), 100);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod config;
mod cursor;
mod error;
mod locks;
mod memory;
mod store;
mod types;

pub use command::{parse, Command, LOCK_AVAILABLE_COLUMN, LOCK_STATUS_COLUMN};
pub use config::StoreConfig;
pub use cursor::{Row, RowCursor};
pub use error::{StoreError, StoreResult};
pub use locks::LockStatus;
pub use memory::{InMemorySession, InMemoryStore, SessionState};
pub use store::{Session, TransactionalStore};
pub use types::{SequenceNumber, SessionId, Value};
