//! Result rows returned by queries.

use crate::error::{StoreError, StoreResult};
use crate::types::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// A forward-only cursor over the rows produced by a query.
///
/// Cursors are fully materialized; dropping one releases everything it
/// holds, so there is no separate close step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCursor {
    columns: Arc<[String]>,
    rows: VecDeque<Vec<Value>>,
}

impl RowCursor {
    /// Creates a cursor over the given rows.
    ///
    /// Every row must have one value per column.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self {
            columns: columns.into(),
            rows: rows.into(),
        }
    }

    /// Creates a cursor with no columns and no rows.
    ///
    /// Returned by commands that do not produce a result set.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Creates a cursor holding exactly one single-column row.
    #[must_use]
    pub fn single(column: impl Into<String>, value: Value) -> Self {
        Self::new(vec![column.into()], vec![vec![value]])
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of rows not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for RowCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.pop_front().map(|values| Row {
            columns: Arc::clone(&self.columns),
            values,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.rows.len(), Some(self.rows.len()))
    }
}

/// A single row from a [`RowCursor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Returns the value in the named column (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ColumnNotFound`] if the row has no such column.
    pub fn get(&self, column: &str) -> StoreResult<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|idx| &self.values[idx])
            .ok_or_else(|| StoreError::ColumnNotFound {
                name: column.to_string(),
            })
    }

    /// Returns the named column as a boolean.
    ///
    /// Integers are accepted as booleans (non-zero is true), matching
    /// stores that report bit columns as numbers.
    pub fn get_bool(&self, column: &str) -> StoreResult<bool> {
        match self.get(column)? {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => Err(mismatch(column, "bool", other)),
        }
    }

    /// Returns the named column as an integer.
    pub fn get_int(&self, column: &str) -> StoreResult<i64> {
        match self.get(column)? {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch(column, "int", other)),
        }
    }

    /// Returns the named column as text.
    pub fn get_text(&self, column: &str) -> StoreResult<&str> {
        match self.get(column)? {
            Value::Text(s) => Ok(s),
            other => Err(mismatch(column, "text", other)),
        }
    }

    /// Returns all values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

fn mismatch(column: &str, expected: &'static str, actual: &Value) -> StoreError {
    StoreError::TypeMismatch {
        column: column.to_string(),
        expected,
        actual: actual.to_string(),
    }
}
