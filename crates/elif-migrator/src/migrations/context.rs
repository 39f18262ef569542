//! Execution context handed to migration steps
//!
//! Wraps whatever statements should go through for the run (the transaction
//! scope, or the bare connection on autocommit backends) and keeps the counts
//! the runner needs to tell how much a rollback undid.

use async_trait::async_trait;

use super::statements::{classify_statement, StatementKind};
use crate::backends::{BackendCapabilities, DatabaseValue, Row, SqlDialect};
use crate::config::Client;
use crate::connection::SqlExecutor;
use crate::error::DriverResult;

/// Statement counts since the run's scope began
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementTally {
    /// Statements that completed
    pub statements: usize,
    /// Schema statements issued, including one that failed. MySQL commits
    /// implicitly before running DDL, so even a failed one ends the
    /// transaction's reach.
    pub schema_statements: usize,
}

/// Statement handle for migration steps
pub struct MigrationContext<'c> {
    executor: &'c mut dyn SqlExecutor,
    tally: StatementTally,
    version: String,
    name: String,
}

impl<'c> MigrationContext<'c> {
    pub fn new(executor: &'c mut dyn SqlExecutor) -> Self {
        Self {
            executor,
            tally: StatementTally::default(),
            version: String::new(),
            name: String::new(),
        }
    }

    /// Mark the unit whose step runs next
    pub(crate) fn enter_unit(&mut self, version: &str, name: &str) {
        self.version = version.to_string();
        self.name = name.to_string();
    }

    /// Version of the unit being applied
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Name of the unit being applied
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.executor.capabilities().client
    }

    pub fn dialect(&self) -> SqlDialect {
        self.executor.dialect()
    }

    /// Placeholder for the parameter at `index` (zero-based)
    pub fn placeholder(&self, index: usize) -> String {
        self.dialect().parameter_placeholder(index)
    }

    pub fn tally(&self) -> StatementTally {
        self.tally
    }

    /// Execute a statement and return the affected row count
    pub async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        self.before(sql);
        let affected = self.executor.execute(sql, params).await?;
        self.tally.statements += 1;
        Ok(affected)
    }

    /// Run a query and return its rows
    pub async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>> {
        self.before(sql);
        let rows = self.executor.fetch_all(sql, params).await?;
        self.tally.statements += 1;
        Ok(rows)
    }

    fn before(&mut self, sql: &str) {
        if classify_statement(sql, self.dialect()) == StatementKind::Schema {
            self.tally.schema_statements += 1;
        }
    }
}

#[async_trait]
impl<'c> SqlExecutor for MigrationContext<'c> {
    fn capabilities(&self) -> &'static BackendCapabilities {
        self.executor.capabilities()
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        MigrationContext::execute(self, sql, params).await
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>> {
        MigrationContext::fetch_all(self, sql, params).await
    }
}

impl std::fmt::Debug for MigrationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("tally", &self.tally)
            .finish()
    }
}
