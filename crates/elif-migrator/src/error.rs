//! Error types for the migrator
//!
//! Driver failures are normalized into [`DriverError`] at the backend seam,
//! connectivity problems surface as [`DatabaseError`], and everything the
//! public operations return is a [`MigrationError`].

use std::fmt;

use crate::config::ConfigError;

/// Result type alias for backend driver calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Result type alias for migrator operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Coarse category of a driver failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The server (or SQLite engine) rejected a statement
    Database,
    /// The configured host name could not be resolved
    HostResolution,
    /// Connecting or acquiring the connection timed out
    Timeout,
    /// Any other I/O failure on the socket or database file
    Io,
    /// The connection was already closed
    Closed,
    /// Protocol, TLS, decoding or configuration problems
    Other,
}

/// A driver failure with the raw codes the backend reported.
///
/// `code` carries the SQLSTATE (PostgreSQL, MySQL) or the extended result code
/// (SQLite). `errno` carries the MySQL error number or the primary SQLite
/// result code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub code: Option<String>,
    pub errno: Option<i64>,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            errno: None,
            message: message.into(),
        }
    }

    /// Create a statement-level error with backend codes
    pub fn database(code: Option<&str>, errno: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Database,
            code: code.map(str::to_string),
            errno,
            message: message.into(),
        }
    }

    pub fn closed() -> Self {
        Self::new(DriverErrorKind::Closed, "Connection already released")
    }

    /// Whether this failure means the host is unreachable by name or in time
    pub fn is_host_failure(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::HostResolution | DriverErrorKind::Timeout
        )
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let errno = if let Some(mysql) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                    Some(i64::from(mysql.number()))
                } else if db.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
                    // SQLite reports the extended code; the primary code is its low byte
                    db.code()
                        .and_then(|code| code.parse::<i64>().ok())
                        .map(|code| code & 0xff)
                } else {
                    None
                };
                let code = db.code().map(|code| code.into_owned());

                DriverError {
                    kind: DriverErrorKind::Database,
                    code,
                    errno,
                    message: db.message().to_string(),
                }
            }
            sqlx::Error::Io(io) => {
                let message = io.to_string();
                let kind = if io.kind() == std::io::ErrorKind::TimedOut {
                    DriverErrorKind::Timeout
                } else if is_resolution_failure(&message) {
                    DriverErrorKind::HostResolution
                } else {
                    DriverErrorKind::Io
                };
                DriverError::new(kind, message)
            }
            sqlx::Error::PoolTimedOut => DriverError::new(
                DriverErrorKind::Timeout,
                "Timed out while waiting for a database connection",
            ),
            sqlx::Error::PoolClosed => {
                DriverError::new(DriverErrorKind::Closed, "Connection pool is closed")
            }
            sqlx::Error::WorkerCrashed => {
                DriverError::new(DriverErrorKind::Closed, "Database worker thread crashed")
            }
            other => DriverError::new(DriverErrorKind::Other, other.to_string()),
        }
    }
}

/// Resolver messages differ per libc; these cover glibc, musl, macOS and Windows.
fn is_resolution_failure(message: &str) -> bool {
    const MARKERS: [&str; 6] = [
        "failed to lookup address",
        "Name or service not known",
        "nodename nor servname",
        "Temporary failure in name resolution",
        "No such host is known",
        "Name does not resolve",
    ];
    MARKERS.iter().any(|marker| message.contains(marker))
}

/// Category of a connectivity or database-lifecycle failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// DNS resolution or connect timeout; the configured host is wrong
    InvalidHost,
    /// Any other failure while talking to the server
    Unknown,
    /// `CREATE DATABASE` failed for a reason other than "already exists"
    DatabaseCreationFailed,
}

impl DatabaseErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            DatabaseErrorKind::InvalidHost => "INVALID_HOST",
            DatabaseErrorKind::Unknown => "UNKNOWN",
            DatabaseErrorKind::DatabaseCreationFailed => "DATABASE_CREATION_FAILED",
        }
    }
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Connectivity and database-lifecycle error
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub message: String,
    pub help: Option<String>,
    #[source]
    pub cause: Option<DriverError>,
}

impl DatabaseError {
    pub fn invalid_host(cause: DriverError) -> Self {
        Self {
            kind: DatabaseErrorKind::InvalidHost,
            message: "Invalid database host.".to_string(),
            help: Some("Please double check your database config.".to_string()),
            cause: Some(cause),
        }
    }

    pub fn unknown(cause: DriverError) -> Self {
        Self {
            kind: DatabaseErrorKind::Unknown,
            message: cause.message.clone(),
            help: Some("Unknown database error".to_string()),
            cause: Some(cause),
        }
    }

    pub fn creation_failed(cause: DriverError) -> Self {
        Self {
            kind: DatabaseErrorKind::DatabaseCreationFailed,
            message: cause.message.clone(),
            help: None,
            cause: Some(cause),
        }
    }
}

/// How much of a failed run the rollback undid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Every schema object and row written by the run is gone
    FullyReverted,
    /// Data changes after the last implicit commit were reverted; earlier
    /// schema changes (and anything they committed) are permanent
    PartiallyReverted,
    /// Statements already executed stay applied; only `reset` cleans up
    NotReverted,
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackOutcome::FullyReverted => write!(f, "fully reverted"),
            RollbackOutcome::PartiallyReverted => write!(f, "partially reverted"),
            RollbackOutcome::NotReverted => write!(f, "not reverted"),
        }
    }
}

/// Errors returned by the public migrator operations
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Database client not supported: {client}")]
    UnsupportedClient { client: String },

    #[error("Migration {version}/{name} failed ({rollback}): {cause}")]
    UnitFailed {
        version: String,
        name: String,
        #[source]
        cause: anyhow::Error,
        rollback: RollbackOutcome,
    },

    #[error("Database error: {0}")]
    Driver(#[from] DriverError),

    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        cause: DriverError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Duplicate migration unit {version}/{name}")]
    DuplicateUnit { version: String, name: String },

    #[error("Database is not initialised. Run init first.")]
    NotInitialized,

    #[error("Failed to load migrations: {0}")]
    Load(String),
}

impl MigrationError {
    pub fn unsupported_client(client: impl Into<String>) -> Self {
        Self::UnsupportedClient {
            client: client.into(),
        }
    }

    pub fn transaction(message: impl Into<String>, cause: DriverError) -> Self {
        Self::Transaction {
            message: message.into(),
            cause,
        }
    }

    /// Rollback outcome when this error is a failed migration unit
    pub fn rollback_outcome(&self) -> Option<RollbackOutcome> {
        match self {
            MigrationError::UnitFailed { rollback, .. } => Some(*rollback),
            _ => None,
        }
    }
}
