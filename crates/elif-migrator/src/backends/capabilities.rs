//! Backend capability table
//!
//! Static facts about each client kind: whether schema statements take part in
//! transactions, how the database is created and dropped, and which error
//! classifier applies.

use crate::config::{BackendConfig, Client};
use crate::error::{MigrationError, MigrationResult, RollbackOutcome};

use super::classifier::{
    ErrorClassifier, MySqlErrorClassifier, PostgresErrorClassifier, SqliteErrorClassifier,
};
use super::core::SqlDialect;

/// How schema-definition statements interact with an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlTransactionality {
    /// DDL participates in the transaction and is undone by rollback
    Transactional,
    /// DDL implicitly commits everything issued before it
    ImplicitCommit,
    /// Every statement commits on its own; no run-wide transaction is opened
    Autocommit,
}

impl DdlTransactionality {
    /// Classify what a rollback undid.
    ///
    /// `statements` counts everything executed since the scope began and
    /// `schema_statements` the subset that were schema definitions.
    pub fn rollback_outcome(
        &self,
        statements: usize,
        schema_statements: usize,
        rollback_succeeded: bool,
    ) -> RollbackOutcome {
        if statements == 0 {
            return RollbackOutcome::FullyReverted;
        }

        match self {
            // Uncommitted work is discarded by the server even when ROLLBACK itself fails
            DdlTransactionality::Transactional => RollbackOutcome::FullyReverted,
            DdlTransactionality::ImplicitCommit => {
                if !rollback_succeeded {
                    RollbackOutcome::NotReverted
                } else if schema_statements > 0 {
                    RollbackOutcome::PartiallyReverted
                } else {
                    RollbackOutcome::FullyReverted
                }
            }
            DdlTransactionality::Autocommit => RollbackOutcome::NotReverted,
        }
    }
}

/// How a database is torn down on reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDrop {
    /// `DROP DATABASE`, optionally guarded with `IF EXISTS`
    DropDatabase { if_exists: bool },
    /// No database-level drop; every table is dropped individually
    TableByTable,
}

/// Static per-backend facts
#[derive(Debug)]
pub struct BackendCapabilities {
    pub client: Client,
    pub dialect: SqlDialect,
    pub ddl: DdlTransactionality,
    pub database_drop: DatabaseDrop,
    /// Whether the migrator creates the database before connecting to it
    pub creates_database: bool,
    /// Engine-owned tables that a table-by-table drop leaves alone
    pub internal_tables: &'static [&'static str],
    classifier: &'static (dyn ErrorClassifier + 'static),
}

static MYSQL_CAPABILITIES: BackendCapabilities = BackendCapabilities {
    client: Client::MySql,
    dialect: SqlDialect::MySQL,
    ddl: DdlTransactionality::ImplicitCommit,
    database_drop: DatabaseDrop::DropDatabase { if_exists: false },
    creates_database: true,
    internal_tables: &[],
    classifier: &MySqlErrorClassifier,
};

static POSTGRES_CAPABILITIES: BackendCapabilities = BackendCapabilities {
    client: Client::Postgres,
    dialect: SqlDialect::PostgreSQL,
    ddl: DdlTransactionality::Transactional,
    database_drop: DatabaseDrop::DropDatabase { if_exists: true },
    creates_database: true,
    internal_tables: &[],
    classifier: &PostgresErrorClassifier,
};

static SQLITE_CAPABILITIES: BackendCapabilities = BackendCapabilities {
    client: Client::Sqlite,
    dialect: SqlDialect::SQLite,
    ddl: DdlTransactionality::Autocommit,
    database_drop: DatabaseDrop::TableByTable,
    creates_database: false,
    internal_tables: &["sqlite_sequence"],
    classifier: &SqliteErrorClassifier,
};

impl BackendCapabilities {
    /// Look up the capabilities for a client kind
    pub fn for_client(client: &Client) -> MigrationResult<&'static BackendCapabilities> {
        match client {
            Client::MySql => Ok(&MYSQL_CAPABILITIES),
            Client::Postgres => Ok(&POSTGRES_CAPABILITIES),
            Client::Sqlite => Ok(&SQLITE_CAPABILITIES),
            Client::Other(name) => Err(MigrationError::unsupported_client(name.clone())),
        }
    }

    pub fn classifier(&self) -> &'static dyn ErrorClassifier {
        self.classifier
    }

    /// Whether a run executes inside one explicit transaction scope
    pub fn opens_scope(&self) -> bool {
        self.ddl != DdlTransactionality::Autocommit
    }

    /// Query that lists user tables, for backends dropped table by table
    pub fn list_tables_sql(&self) -> Option<&'static str> {
        match self.dialect {
            SqlDialect::SQLite => Some("SELECT name FROM sqlite_master WHERE type = 'table'"),
            _ => None,
        }
    }

    /// Query that reports whether a database exists, bound to its name
    pub fn database_exists_sql(&self) -> Option<&'static str> {
        match self.dialect {
            SqlDialect::PostgreSQL => Some("SELECT 1 AS found FROM pg_database WHERE datname = $1"),
            _ => None,
        }
    }

    /// `CREATE DATABASE` statement with normalized charset and collation
    pub fn create_database_sql(&self, config: &BackendConfig) -> Option<String> {
        let name = self.dialect.quote_identifier(config.database());
        match self.dialect {
            SqlDialect::MySQL => Some(format!(
                "CREATE DATABASE {} CHARACTER SET {} COLLATE {}",
                name,
                config.charset(),
                config.collation()
            )),
            SqlDialect::PostgreSQL => Some(format!(
                "CREATE DATABASE {} WITH TEMPLATE = template0 ENCODING = '{}'",
                name,
                config.charset().replace('\'', "''")
            )),
            SqlDialect::SQLite => None,
        }
    }

    /// `DROP DATABASE` statement, when the backend has one
    pub fn drop_database_sql(&self, database: &str) -> Option<String> {
        match self.database_drop {
            DatabaseDrop::DropDatabase { if_exists } => Some(format!(
                "DROP DATABASE {}{}",
                if if_exists { "IF EXISTS " } else { "" },
                self.dialect.quote_identifier(database)
            )),
            DatabaseDrop::TableByTable => None,
        }
    }

    /// Statement turning foreign key enforcement on or off for the current
    /// connection, on backends where a table-by-table drop needs it
    pub fn foreign_key_checks_sql(&self, enabled: bool) -> Option<&'static str> {
        match (self.database_drop, enabled) {
            (DatabaseDrop::TableByTable, true) => Some("PRAGMA foreign_keys = ON"),
            (DatabaseDrop::TableByTable, false) => Some("PRAGMA foreign_keys = OFF"),
            (DatabaseDrop::DropDatabase { .. }, _) => None,
        }
    }

    pub fn is_internal_table(&self, table: &str) -> bool {
        self.internal_tables.contains(&table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::classifier::ErrorClass;
    use crate::error::DriverError;

    #[test]
    fn test_capability_table() {
        let mysql = BackendCapabilities::for_client(&Client::MySql).unwrap();
        let pg = BackendCapabilities::for_client(&Client::Postgres).unwrap();
        let sqlite = BackendCapabilities::for_client(&Client::Sqlite).unwrap();

        assert_eq!(mysql.ddl, DdlTransactionality::ImplicitCommit);
        assert_eq!(pg.ddl, DdlTransactionality::Transactional);
        assert_eq!(sqlite.ddl, DdlTransactionality::Autocommit);

        assert_eq!(mysql.database_drop, DatabaseDrop::DropDatabase { if_exists: false });
        assert_eq!(pg.database_drop, DatabaseDrop::DropDatabase { if_exists: true });
        assert_eq!(sqlite.database_drop, DatabaseDrop::TableByTable);

        assert!(mysql.opens_scope());
        assert!(pg.opens_scope());
        assert!(!sqlite.opens_scope());
        assert!(sqlite.is_internal_table("sqlite_sequence"));
    }

    #[test]
    fn test_unsupported_client() {
        let err = BackendCapabilities::for_client(&Client::Other("mssql".to_string())).unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedClient { client } if client == "mssql"));
    }

    #[test]
    fn test_classifier_dispatch() {
        let pg = BackendCapabilities::for_client(&Client::Postgres).unwrap();
        let err = DriverError::database(Some("42P01"), None, "relation does not exist");
        assert_eq!(pg.classifier().classify(&err), ErrorClass::TableMissing);
    }

    #[test]
    fn test_database_statements() {
        let mysql = BackendCapabilities::for_client(&Client::MySql).unwrap();
        let pg = BackendCapabilities::for_client(&Client::Postgres).unwrap();
        let sqlite = BackendCapabilities::for_client(&Client::Sqlite).unwrap();

        let config = BackendConfig::new(Client::MySql, "blog");
        assert_eq!(
            mysql.create_database_sql(&config).unwrap(),
            "CREATE DATABASE `blog` CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci"
        );
        let config = BackendConfig::new(Client::Postgres, "blog");
        assert_eq!(
            pg.create_database_sql(&config).unwrap(),
            "CREATE DATABASE \"blog\" WITH TEMPLATE = template0 ENCODING = 'UTF8'"
        );

        assert_eq!(mysql.drop_database_sql("blog").unwrap(), "DROP DATABASE `blog`");
        assert_eq!(pg.drop_database_sql("blog").unwrap(), "DROP DATABASE IF EXISTS \"blog\"");
        assert_eq!(sqlite.drop_database_sql("blog.db"), None);
        assert!(sqlite.list_tables_sql().is_some());
        assert_eq!(sqlite.foreign_key_checks_sql(false), Some("PRAGMA foreign_keys = OFF"));
        assert_eq!(pg.foreign_key_checks_sql(false), None);
        assert!(pg.database_exists_sql().is_some());
    }

    #[test]
    fn test_rollback_outcomes() {
        use DdlTransactionality::*;

        assert_eq!(Transactional.rollback_outcome(4, 2, true), RollbackOutcome::FullyReverted);
        assert_eq!(ImplicitCommit.rollback_outcome(4, 1, true), RollbackOutcome::PartiallyReverted);
        assert_eq!(ImplicitCommit.rollback_outcome(3, 0, true), RollbackOutcome::FullyReverted);
        assert_eq!(ImplicitCommit.rollback_outcome(3, 0, false), RollbackOutcome::NotReverted);
        assert_eq!(Autocommit.rollback_outcome(2, 1, true), RollbackOutcome::NotReverted);
        assert_eq!(Autocommit.rollback_outcome(0, 0, true), RollbackOutcome::FullyReverted);
    }
}
