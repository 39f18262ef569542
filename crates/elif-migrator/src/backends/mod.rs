//! Database Backend Abstractions
//!
//! Driver traits, the per-client capability table and the error classifiers,
//! plus the sqlx implementations for PostgreSQL, MySQL and SQLite.

pub mod capabilities;
pub mod classifier;
pub mod core;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

// Re-export core traits and types
pub use capabilities::{BackendCapabilities, DatabaseDrop, DdlTransactionality};
pub use classifier::{
    ErrorClass, ErrorClassifier, MySqlErrorClassifier, PostgresErrorClassifier,
    SqliteErrorClassifier,
};
pub use core::*;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use crate::config::Client;

/// Registry of database backends keyed by client kind
#[derive(Clone)]
pub struct DatabaseBackendRegistry {
    backends: HashMap<Client, Arc<dyn DatabaseBackend>>,
}

impl DatabaseBackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry with the sqlx backends for every supported client
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PostgresBackend::new()));
        registry.register(Arc::new(MySqlBackend::new()));
        registry.register(Arc::new(SqliteBackend::new()));
        registry
    }

    /// Register a database backend under the client it serves
    pub fn register(&mut self, backend: Arc<dyn DatabaseBackend>) {
        self.backends.insert(backend.client(), backend);
    }

    /// Get a database backend by client kind
    pub fn get(&self, client: &Client) -> Option<Arc<dyn DatabaseBackend>> {
        self.backends.get(client).cloned()
    }

    /// List all registered client kinds
    pub fn registered_clients(&self) -> Vec<Client> {
        self.backends.keys().cloned().collect()
    }
}

impl Default for DatabaseBackendRegistry {
    fn default() -> Self {
        Self::with_default_backends()
    }
}

impl std::fmt::Debug for DatabaseBackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBackendRegistry")
            .field("clients", &self.registered_clients())
            .finish()
    }
}
