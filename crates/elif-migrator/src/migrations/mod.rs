//! Migration System
//!
//! Migration units and their catalog, the bookkeeping store, and the runner
//! that applies pending units with backend-aware rollback.

pub mod context;
pub mod definitions;
pub mod runner;
pub mod statements;
pub mod store;

pub use context::{MigrationContext, StatementTally};
pub use definitions::*;
pub use runner::Migrator;
pub use statements::{classify_statement, split_sql_statements, StatementKind};
pub use store::{BookkeepingStore, StoreConfig, DEFAULT_MIGRATIONS_TABLE};
