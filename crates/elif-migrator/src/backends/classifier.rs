//! Driver error classification
//!
//! Each backend reports "table missing" or "database exists" with its own
//! codes. The classifiers map those raw codes onto [`ErrorClass`] so the
//! connection manager and the bookkeeping store never look at codes.

use std::fmt;

use crate::error::{DriverError, DriverErrorKind};

/// Semantic outcome of a driver error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TableMissing,
    DatabaseExists,
    DatabaseMissing,
    Other,
}

/// Maps raw driver errors to an [`ErrorClass`]
pub trait ErrorClassifier: fmt::Debug + Send + Sync {
    fn classify(&self, err: &DriverError) -> ErrorClass;
}

// MySQL server error numbers
const ER_DB_CREATE_EXISTS: i64 = 1007;
const ER_DB_DROP_EXISTS: i64 = 1008;
const ER_BAD_DB_ERROR: i64 = 1049;
const ER_NO_SUCH_TABLE: i64 = 1146;

/// MySQL-family classifier, keyed on the server error number
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlErrorClassifier;

impl ErrorClassifier for MySqlErrorClassifier {
    fn classify(&self, err: &DriverError) -> ErrorClass {
        if err.kind != DriverErrorKind::Database {
            return ErrorClass::Other;
        }
        match err.errno {
            Some(ER_NO_SUCH_TABLE) => ErrorClass::TableMissing,
            Some(ER_DB_CREATE_EXISTS) => ErrorClass::DatabaseExists,
            Some(ER_BAD_DB_ERROR) | Some(ER_DB_DROP_EXISTS) => ErrorClass::DatabaseMissing,
            _ => ErrorClass::Other,
        }
    }
}

/// PostgreSQL-family classifier, keyed on SQLSTATE
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresErrorClassifier;

impl ErrorClassifier for PostgresErrorClassifier {
    fn classify(&self, err: &DriverError) -> ErrorClass {
        if err.kind != DriverErrorKind::Database {
            return ErrorClass::Other;
        }
        match err.code.as_deref() {
            // undefined_table
            Some("42P01") => ErrorClass::TableMissing,
            // duplicate_database
            Some("42P04") => ErrorClass::DatabaseExists,
            // invalid_catalog_name
            Some("3D000") => ErrorClass::DatabaseMissing,
            _ => ErrorClass::Other,
        }
    }
}

// SQLite primary result codes
const SQLITE_ERROR: i64 = 1;
const SQLITE_IOERR: i64 = 10;
const SQLITE_CANTOPEN: i64 = 14;

/// SQLite classifier, keyed on the primary result code.
///
/// `SQLITE_ERROR` covers every SQL error, so the message decides whether it
/// is a missing table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteErrorClassifier;

impl ErrorClassifier for SqliteErrorClassifier {
    fn classify(&self, err: &DriverError) -> ErrorClass {
        if err.kind != DriverErrorKind::Database {
            return ErrorClass::Other;
        }
        match err.errno {
            Some(SQLITE_ERROR) if err.message.contains("no such table") => ErrorClass::TableMissing,
            Some(SQLITE_IOERR) | Some(SQLITE_CANTOPEN) => ErrorClass::DatabaseMissing,
            _ => ErrorClass::Other,
        }
    }
}
