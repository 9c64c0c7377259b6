//! Result wrapper types.
//!
//! A reply materializes into exactly one of three shapes: a decoded row set,
//! a command's affected count, or a raw value array. The deferred handle
//! dispatches its accessors here after forcing.

use crate::protocol::Oid;
use crate::value::Value;

/// A fully materialized, type-decoded row set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    /// Column names, in result order.
    pub columns: Vec<String>,
    /// Column type OIDs, parallel to `columns`.
    pub column_oids: Vec<Oid>,
    /// Decoded rows.
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the set has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first row, if any.
    pub fn first(&self) -> Option<&[Value]> {
        self.rows.first().map(|r| r.as_slice())
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// A single column's value from a row, by column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Iterate rows as `(column, value)` pairs.
    pub fn iter_named(&self) -> impl Iterator<Item = Vec<(&str, &Value)>> {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .map(|c| c.as_str())
                .zip(row.iter())
                .collect()
        })
    }
}

/// The materialized outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlResult {
    /// A decoded row set (SELECT, RETURNING, ...).
    Rows(RowSet),
    /// Rows affected by a command without a result set.
    Affected(u64),
    /// Undecoded value rows, for callers that asked for raw output.
    Values(Vec<Vec<Value>>),
}

impl SqlResult {
    /// An empty result, used when an error hook consumes a failure without
    /// supplying a replacement.
    pub fn empty() -> Self {
        SqlResult::Values(Vec::new())
    }

    /// The rows, regardless of variant. `Affected` has none.
    pub fn rows(&self) -> &[Vec<Value>] {
        match self {
            SqlResult::Rows(set) => &set.rows,
            SqlResult::Values(rows) => rows,
            SqlResult::Affected(_) => &[],
        }
    }

    /// Column names, when the result carries them.
    pub fn columns(&self) -> &[String] {
        match self {
            SqlResult::Rows(set) => &set.columns,
            _ => &[],
        }
    }

    /// The affected-row count. Row sets report their row count.
    pub fn affected(&self) -> u64 {
        match self {
            SqlResult::Affected(n) => *n,
            SqlResult::Rows(set) => set.len() as u64,
            SqlResult::Values(rows) => rows.len() as u64,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// True when there are no rows (an `Affected` result is always empty).
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// The first row, if any.
    pub fn first(&self) -> Option<&[Value]> {
        self.rows().first().map(|r| r.as_slice())
    }

    /// The row set, when this is a `Rows` result.
    pub fn row_set(&self) -> Option<&RowSet> {
        match self {
            SqlResult::Rows(set) => Some(set),
            _ => None,
        }
    }
}
