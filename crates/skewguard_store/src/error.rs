//! Error types for store operations.

use crate::types::SessionId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a transactional store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The command text could not be parsed.
    #[error("parse error at position {position}: {message}")]
    Parse {
        /// Byte offset in the command where parsing failed.
        position: usize,
        /// Description of the problem.
        message: String,
    },

    /// The command referenced a table that does not exist.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// Name of the table.
        name: String,
    },

    /// A table with this name already exists.
    #[error("table already exists: {name}")]
    TableExists {
        /// Name of the table.
        name: String,
    },

    /// An advisory-lock call was issued before the session touched any data.
    #[error("{session} has no transaction context: read or write data before using advisory locks")]
    NoTransactionContext {
        /// The session that issued the call.
        session: SessionId,
    },

    /// The session was already committed or rolled back.
    #[error("{session} is closed")]
    SessionClosed {
        /// The closed session.
        session: SessionId,
    },

    /// The session idled past the store's session timeout and was reclaimed.
    #[error("{session} expired after exceeding the session timeout")]
    SessionExpired {
        /// The expired session.
        session: SessionId,
    },

    /// First-committer-wins conflict on commit.
    #[error("write conflict on key {key:?} in table {table}")]
    WriteConflict {
        /// Table of the conflicting key.
        table: String,
        /// The key written concurrently.
        key: String,
    },

    /// The advisory-lock resource name is empty or too long.
    #[error("invalid lock resource: {reason}")]
    InvalidResource {
        /// Why the resource name was refused.
        reason: String,
    },

    /// The advisory-lock call itself failed (bad parameters or an unknown status).
    #[error("lock call for resource {resource:?} failed with status {status}")]
    LockCallFailed {
        /// The resource named in the call.
        resource: String,
        /// Raw status code returned by the store.
        status: i64,
    },

    /// A query that must produce a row produced none.
    #[error("query returned no rows")]
    NoRows,

    /// A row has no column with this name.
    #[error("column not found: {name}")]
    ColumnNotFound {
        /// Requested column.
        name: String,
    },

    /// A column value had an unexpected type.
    #[error("type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Expected type name.
        expected: &'static str,
        /// Actual value, rendered.
        actual: String,
    },
}

impl StoreError {
    /// Creates a parse error.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Creates an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }

    /// Creates an invalid resource error.
    pub fn invalid_resource(reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
        }
    }
}
