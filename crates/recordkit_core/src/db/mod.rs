//! Storage collaborator contract, stored value shapes and SQLite adapter.
//!
//! # Responsibility
//! - Define the synchronous `Storage` seam the mapping engine talks to.
//! - Define `StoredValue`, the only value shapes a raw record may hold.
//! - Provide the SQLite-backed adapter and connection bootstrap.
//!
//! # Invariants
//! - A missing target table is always reported as
//!   `StorageError::SchemaMissing`, never as a generic failure.
//! - `escape` output is safe to embed between single quotes.

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod ddl;
mod open;
mod sqlite;

pub use open::{open_db, open_db_in_memory};
pub use sqlite::SqliteStorage;

/// Marker placed right after `SELECT` to request a deferred total count.
pub const FOUND_ROWS_HINT: &str = "SQL_CALC_FOUND_ROWS";

/// Server-side "now" directive accepted by timestamp columns.
pub const CURRENT_TIMESTAMP: &str = "CURRENT_TIMESTAMP";

/// One row keyed by column name, shaped as the storage layer returns it.
pub type Row = BTreeMap<String, StoredValue>;

pub type StorageResult<T> = Result<T, StorageError>;

pub type DbResult<T> = Result<T, DbError>;

/// Raw value shape accepted and returned by the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl StoredValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for `Null` and the empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Real(value) if value.fract() == 0.0 => Some(*value as i64),
            Self::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text rendering used for escaping and for index keys.
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }

    /// Equality that treats numeric text and numbers as the same value.
    ///
    /// Numeric columns come back as numbers while coerced input may still
    /// be digit text.
    pub fn same_as(&self, other: &StoredValue) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::Text(_), Self::Integer(_) | Self::Real(_))
            | (Self::Integer(_) | Self::Real(_), Self::Text(_))
            | (Self::Integer(_), Self::Real(_))
            | (Self::Real(_), Self::Integer(_)) => {
                match (numeric_of(self), numeric_of(other)) {
                    (Some(left), Some(right)) => left == right,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

fn numeric_of(value: &StoredValue) -> Option<f64> {
    match value {
        StoredValue::Integer(number) => Some(*number as f64),
        StoredValue::Real(number) => Some(*number),
        StoredValue::Text(text) => text.trim().parse().ok(),
        StoredValue::Null => None,
    }
}

impl ToSql for StoredValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            Self::Null => SqlValue::Null,
            Self::Integer(value) => SqlValue::Integer(*value),
            Self::Real(value) => SqlValue::Real(*value),
            Self::Text(text) => SqlValue::Text(text.clone()),
        }))
    }
}

/// Synchronous storage collaborator consumed by the mapping engine.
///
/// Connection pooling, network protocol and cancellation belong to the
/// implementor.
pub trait Storage {
    /// Runs a query and returns its first row, if any.
    fn execute_one(&self, sql: &str, params: &[StoredValue]) -> StorageResult<Option<Row>>;

    /// Runs a query and returns every row in store order.
    fn execute_all(&self, sql: &str, params: &[StoredValue]) -> StorageResult<Vec<Row>>;

    /// Runs a query and keys rows by the text of `key_column`.
    fn execute_indexed(
        &self,
        key_column: &str,
        sql: &str,
        params: &[StoredValue],
    ) -> StorageResult<BTreeMap<String, Row>> {
        let rows = self.execute_all(sql, params)?;
        let mut indexed = BTreeMap::new();
        for row in rows {
            let key = row
                .get(key_column)
                .map(StoredValue::to_text)
                .ok_or_else(|| {
                    StorageError::InvalidData(format!(
                        "index column `{key_column}` missing from result row"
                    ))
                })?;
            indexed.insert(key, row);
        }
        Ok(indexed)
    }

    /// Runs a statement and returns the affected row count.
    fn execute_non_query(&self, sql: &str, params: &[StoredValue]) -> StorageResult<u64>;

    /// Identifier generated by the most recent insert.
    fn last_insert_id(&self) -> i64;

    /// Escapes text for embedding inside a single-quoted literal.
    fn escape(&self, value: &str) -> String;

    /// Total row count of the last query issued with `FOUND_ROWS_HINT`.
    fn found_row_count(&self) -> Option<u64>;
}

/// Storage-layer failure.
#[derive(Debug)]
pub enum StorageError {
    /// Target table does not exist.
    SchemaMissing {
        table: Option<String>,
        message: String,
    },
    Sqlite(rusqlite::Error),
    InvalidData(String),
}

impl StorageError {
    pub fn is_schema_missing(&self) -> bool {
        matches!(self, Self::SchemaMissing { .. })
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaMissing { message, .. } => write!(f, "schema missing: {message}"),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid storage data: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaMissing { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(_, Some(message)) = &value {
            if let Some(table) = message.strip_prefix("no such table: ") {
                return Self::SchemaMissing {
                    table: Some(table.trim().to_string()),
                    message: message.clone(),
                };
            }
        }
        Self::Sqlite(value)
    }
}

/// Connection bootstrap failure.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Quotes an identifier for embedding in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
