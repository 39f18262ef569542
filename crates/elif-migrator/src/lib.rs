//! # elif-migrator: Schema Migrations for elif.rs
//!
//! Applies versioned migration units to PostgreSQL, MySQL and SQLite
//! databases, records them in a bookkeeping table, and reports how much of a
//! failed run could be rolled back.
//!
//! PostgreSQL undoes everything on failure. MySQL commits implicitly on every
//! schema statement, so only trailing data changes are undone. SQLite commits
//! each statement as it runs; `reset` is the clean-up path there.
//!
//! ```ignore
//! use elif_migrator::{BackendConfig, MigrationCatalog, MigrationUnit, Migrator};
//!
//! let catalog = MigrationCatalog::new("1.0", "1.0", vec![
//!     MigrationUnit::sql("1.0", "1-create-users", "CREATE TABLE users (id INTEGER, name TEXT)"),
//! ])?;
//! let summary = Migrator::new(BackendConfig::sqlite("app.db"), catalog).init().await?;
//! assert_eq!(summary.migrations_applied, 1);
//! ```

pub mod backends;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod migrations;


// Re-export core traits and types
pub use backends::{
    BackendCapabilities, DatabaseBackend, DatabaseBackendRegistry, DatabaseConnection,
    DatabaseDrop, DatabaseTransaction, DatabaseValue, DdlTransactionality, ErrorClass,
    ErrorClassifier, Row, SqlDialect,
};
pub use config::{BackendConfig, Client, ConfigError, ConnectionParams};
pub use connection::{Connection, ConnectionManager, SqlExecutor, TransactionScope};
pub use error::*;
pub use events::{EventSink, MigrationEvent, RecordingSink, SharedEventSink, TracingSink};
pub use migrations::*;
