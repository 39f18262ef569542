//! Core Database Backend Traits
//!
//! This module defines the traits every driver implements and the values that
//! cross the seam. The migrator only talks to `dyn DatabaseConnection` and
//! `dyn DatabaseTransaction`, so tests can swap in an in-memory backend.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::config::{BackendConfig, Client};
use crate::error::{DriverError, DriverErrorKind, DriverResult};

/// Abstract database connection trait
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>>;

    /// Begin a transaction
    async fn begin_transaction(&mut self) -> DriverResult<Box<dyn DatabaseTransaction>>;

    /// Close the connection
    async fn close(&mut self) -> DriverResult<()>;
}

/// Abstract database transaction trait.
///
/// Only `Send`: a transaction is driven by one task, and the SQLite handle
/// behind it cannot be shared between threads.
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DriverResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// Database backend trait that builds connections for one client kind
pub trait DatabaseBackend: Send + Sync {
    /// The client kind this backend serves
    fn client(&self) -> Client;

    /// Build a connection for a normalized configuration.
    ///
    /// No I/O happens here; driver failures surface on the first statement.
    fn connect_lazy(&self, config: &BackendConfig) -> DriverResult<Box<dyn DatabaseConnection>>;
}

/// Database value enumeration for parameter binding and row decoding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int64(i64::from(value))
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A decoded result row, columns in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, DatabaseValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, DatabaseValue)>) -> Self {
        Self { columns }
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Get a text column, failing when it is missing or not text
    pub fn get_string(&self, name: &str) -> DriverResult<String> {
        match self.get_by_name(name) {
            Some(DatabaseValue::String(value)) => Ok(value.clone()),
            Some(DatabaseValue::Null) => Ok(String::new()),
            Some(other) => Err(DriverError::new(
                DriverErrorKind::Other,
                format!("Column '{}' is not text: {:?}", name, other),
            )),
            None => Err(DriverError::new(
                DriverErrorKind::Other,
                format!("Column '{}' not found", name),
            )),
        }
    }

    /// Get column count
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Convert row to JSON value
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL => '"',
            SqlDialect::MySQL => '`',
            SqlDialect::SQLite => '"',
        }
    }

    /// Quote an identifier, doubling any embedded quote character
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let quote = self.identifier_quote();
        let escaped = identifier.replace(quote, &format!("{}{}", quote, quote));
        format!("{}{}{}", quote, escaped, quote)
    }

    /// Get the auto-increment primary key column definition for this dialect
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "SERIAL PRIMARY KEY",
            SqlDialect::MySQL => "INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY",
            SqlDialect::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
        }
    }
}
