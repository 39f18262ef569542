//! Bookkeeping store
//!
//! Owns the table recording applied migration units. The table is created
//! lazily: the first probe against a fresh database fails with "table
//! missing" and triggers the `CREATE TABLE`.

use crate::backends::{DatabaseValue, ErrorClass, Row};
use crate::connection::SqlExecutor;
use crate::error::{DriverResult, MigrationResult};
use crate::events::{tracing_sink, MigrationEvent, SharedEventSink};

use super::definitions::MigrationRecord;

pub const DEFAULT_MIGRATIONS_TABLE: &str = "migrations";

const CURRENT_VERSION_COLUMN: &str = "currentVersion";

/// Bookkeeping table settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub table_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }
}

/// Reads and writes migration records
#[derive(Clone)]
pub struct BookkeepingStore {
    config: StoreConfig,
    events: SharedEventSink,
}

impl BookkeepingStore {
    pub fn new(config: StoreConfig, events: SharedEventSink) -> Self {
        Self { config, events }
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    /// Create the bookkeeping table unless it exists. Any error other than
    /// "table missing" propagates unchanged.
    pub async fn ensure_migrations_table<E>(&self, executor: &mut E) -> MigrationResult<()>
    where
        E: SqlExecutor + ?Sized,
    {
        let table = self.quoted_table(executor);
        let probe = format!("SELECT id FROM {} LIMIT 1", table);

        match executor.fetch_all(&probe, &[]).await {
            Ok(_) => Ok(()),
            Err(err) if executor.capabilities().classifier().classify(&err) == ErrorClass::TableMissing => {
                self.events.emit(&MigrationEvent::CreatingBookkeepingTable {
                    table: self.config.table_name.clone(),
                });
                let create = self.create_table_sql(executor);
                executor.execute(&create, &[]).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Insert one record; the caller makes sure it is not a duplicate
    pub async fn record_applied<E>(&self, executor: &mut E, record: &MigrationRecord) -> DriverResult<()>
    where
        E: SqlExecutor + ?Sized,
    {
        let dialect = executor.dialect();
        let sql = format!(
            "INSERT INTO {} (name, version, {}) VALUES ({}, {}, {})",
            self.quoted_table(executor),
            dialect.quote_identifier(CURRENT_VERSION_COLUMN),
            dialect.parameter_placeholder(0),
            dialect.parameter_placeholder(1),
            dialect.parameter_placeholder(2),
        );
        let params = [
            DatabaseValue::from(record.name.as_str()),
            DatabaseValue::from(record.version.as_str()),
            DatabaseValue::from(record.current_version.as_str()),
        ];

        executor.execute(&sql, &params).await?;
        Ok(())
    }

    /// Records of one migration version, in insertion order
    pub async fn list_applied<E>(&self, executor: &mut E, version: &str) -> DriverResult<Vec<MigrationRecord>>
    where
        E: SqlExecutor + ?Sized,
    {
        let dialect = executor.dialect();
        let sql = format!(
            "{} WHERE version = {} ORDER BY id",
            self.select_sql(executor),
            dialect.parameter_placeholder(0)
        );

        let rows = executor.fetch_all(&sql, &[DatabaseValue::from(version)]).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Every record, in insertion order
    pub async fn list_all<E>(&self, executor: &mut E) -> DriverResult<Vec<MigrationRecord>>
    where
        E: SqlExecutor + ?Sized,
    {
        let sql = format!("{} ORDER BY id", self.select_sql(executor));
        let rows = executor.fetch_all(&sql, &[]).await?;
        rows.iter().map(record_from_row).collect()
    }

    fn quoted_table<E: SqlExecutor + ?Sized>(&self, executor: &E) -> String {
        executor.dialect().quote_identifier(&self.config.table_name)
    }

    fn select_sql<E: SqlExecutor + ?Sized>(&self, executor: &E) -> String {
        format!(
            "SELECT id, name, version, {} FROM {}",
            executor.dialect().quote_identifier(CURRENT_VERSION_COLUMN),
            self.quoted_table(executor)
        )
    }

    fn create_table_sql<E: SqlExecutor + ?Sized>(&self, executor: &E) -> String {
        let dialect = executor.dialect();
        format!(
            "CREATE TABLE {} (id {}, name VARCHAR(255) NOT NULL, version VARCHAR(255) NOT NULL, {} VARCHAR(255) NOT NULL)",
            self.quoted_table(executor),
            dialect.auto_increment_primary_key(),
            dialect.quote_identifier(CURRENT_VERSION_COLUMN)
        )
    }
}

impl Default for BookkeepingStore {
    fn default() -> Self {
        Self::new(StoreConfig::default(), tracing_sink())
    }
}

impl std::fmt::Debug for BookkeepingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookkeepingStore")
            .field("config", &self.config)
            .finish()
    }
}

fn record_from_row(row: &Row) -> DriverResult<MigrationRecord> {
    Ok(MigrationRecord {
        id: row.get_by_name("id").and_then(DatabaseValue::as_i64),
        name: row.get_string("name")?,
        version: row.get_string("version")?,
        current_version: row.get_string(CURRENT_VERSION_COLUMN)?,
    })
}
