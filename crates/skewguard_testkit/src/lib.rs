//! # SkewGuard Testkit
//!
//! Test utilities for SkewGuard.
//!
//! This crate provides:
//! - Store fixtures with a priming table and short lock timeouts
//! - Property-based key generators using proptest
//! - A contention harness that hammers one key from many threads
//! - The on-call doctors write-skew scenario, with and without serialization
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skewguard_testkit::prelude::*;
//!
//! #[test]
//! fn second_caller_conflicts() {
//!     let store = TestStore::new();
//!     let serializer = store.serializer();
//!     let _held = serializer.acquire("order-42").unwrap();
//!     assert!(serializer.acquire("order-42").unwrap_err().is_conflict());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scenarios;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scenarios::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use scenarios::*;
pub use stress::*;
