//! Connection management
//!
//! [`ConnectionManager`] turns a [`BackendConfig`] into a [`Connection`],
//! validates connectivity, and creates or drops the target database.
//! A [`Connection`] must be released with [`Connection::close`]; dropping it
//! unreleased is reported through the event sink.

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::backends::{
    BackendCapabilities, DatabaseBackendRegistry, DatabaseConnection, DatabaseDrop,
    DatabaseTransaction, DatabaseValue, ErrorClass, Row, SqlDialect,
};
use crate::config::{BackendConfig, Client};
use crate::error::{DatabaseError, DriverError, DriverResult, MigrationError, MigrationResult};
use crate::events::{tracing_sink, MigrationEvent, SharedEventSink};

/// Probe issued by [`ConnectionManager::ensure_connection_works`]
pub const CONNECTION_PROBE_SQL: &str = "SELECT 1+1 AS result";

/// Anything statements can be sent through: a bare connection, an open
/// transaction scope, or a migration context wrapping either.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Capabilities of the backend behind this executor
    fn capabilities(&self) -> &'static BackendCapabilities;

    fn dialect(&self) -> SqlDialect {
        self.capabilities().dialect
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64>;

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>>;
}

/// A live backend handle bound to one configuration
pub struct Connection {
    inner: Box<dyn DatabaseConnection>,
    capabilities: &'static BackendCapabilities,
    config: BackendConfig,
    events: SharedEventSink,
    released: bool,
}

impl Connection {
    pub fn new(
        inner: Box<dyn DatabaseConnection>,
        capabilities: &'static BackendCapabilities,
        config: BackendConfig,
        events: SharedEventSink,
    ) -> Self {
        Self {
            inner,
            capabilities,
            config,
            events,
            released: false,
        }
    }

    pub fn client(&self) -> &Client {
        &self.capabilities.client
    }

    /// Normalized configuration this connection was built from
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Open a transaction scope.
    ///
    /// The scope borrows the connection mutably, so no statement can bypass
    /// it and it can never outlive the connection.
    pub async fn begin(&mut self) -> MigrationResult<TransactionScope<'_>> {
        let tx = self
            .inner
            .begin_transaction()
            .await
            .map_err(|e| MigrationError::transaction("Failed to begin transaction", e))?;

        Ok(TransactionScope {
            tx: Some(tx),
            capabilities: self.capabilities,
            _connection: PhantomData,
        })
    }

    /// Release the connection
    pub async fn close(mut self) -> MigrationResult<()> {
        self.released = true;
        let result = self.inner.close().await;
        self.events.emit(&MigrationEvent::ConnectionReleased {
            client: self.capabilities.client.name().to_string(),
        });
        result.map_err(MigrationError::from)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.released {
            self.events.emit(&MigrationEvent::ConnectionDroppedWithoutRelease {
                client: self.capabilities.client.name().to_string(),
            });
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client", &self.capabilities.client)
            .field("database", &self.config.database())
            .field("released", &self.released)
            .finish()
    }
}

#[async_trait]
impl SqlExecutor for Connection {
    fn capabilities(&self) -> &'static BackendCapabilities {
        self.capabilities
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        self.inner.execute(sql, params).await
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>> {
        self.inner.fetch_all(sql, params).await
    }
}

/// An open transaction on a [`Connection`].
///
/// Ends with [`commit`](Self::commit) or [`rollback`](Self::rollback). A scope
/// dropped without either is rolled back by the driver.
pub struct TransactionScope<'c> {
    tx: Option<Box<dyn DatabaseTransaction>>,
    capabilities: &'static BackendCapabilities,
    _connection: PhantomData<&'c mut Connection>,
}

impl<'c> TransactionScope<'c> {
    fn active(&mut self) -> DriverResult<&mut Box<dyn DatabaseTransaction>> {
        self.tx.as_mut().ok_or_else(DriverError::closed)
    }

    pub async fn commit(mut self) -> DriverResult<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().await,
            None => Err(DriverError::closed()),
        }
    }

    pub async fn rollback(mut self) -> DriverResult<()> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await,
            None => Err(DriverError::closed()),
        }
    }
}

#[async_trait]
impl<'c> SqlExecutor for TransactionScope<'c> {
    fn capabilities(&self) -> &'static BackendCapabilities {
        self.capabilities
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        self.active()?.execute(sql, params).await
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>> {
        self.active()?.fetch_all(sql, params).await
    }
}

/// Opens connections and manages the lifecycle of the target database
#[derive(Clone)]
pub struct ConnectionManager {
    events: SharedEventSink,
    registry: DatabaseBackendRegistry,
}

impl ConnectionManager {
    pub fn new(events: SharedEventSink) -> Self {
        Self::with_registry(events, DatabaseBackendRegistry::default())
    }

    pub fn with_registry(events: SharedEventSink, registry: DatabaseBackendRegistry) -> Self {
        Self { events, registry }
    }

    pub fn events(&self) -> &SharedEventSink {
        &self.events
    }

    /// Build a connection with normalized defaults.
    ///
    /// No I/O happens here; an unreachable server surfaces on the first
    /// statement.
    pub fn connect(&self, config: &BackendConfig) -> MigrationResult<Connection> {
        BackendCapabilities::for_client(&config.client)?;
        config.validate()?;
        self.open(config.normalized())
    }

    /// Build a server-level connection that selects no database
    pub fn connect_without_database(&self, config: &BackendConfig) -> MigrationResult<Connection> {
        BackendCapabilities::for_client(&config.client)?;
        self.open(config.normalized().without_database())
    }

    fn open(&self, config: BackendConfig) -> MigrationResult<Connection> {
        let capabilities = BackendCapabilities::for_client(&config.client)?;
        let backend = self
            .registry
            .get(&config.client)
            .ok_or_else(|| MigrationError::unsupported_client(config.client.name()))?;

        let inner = backend.connect_lazy(&config)?;
        Ok(Connection::new(inner, capabilities, config, self.events.clone()))
    }

    /// Issue a trivial probe query
    pub async fn ensure_connection_works(&self, connection: &mut Connection) -> Result<(), DatabaseError> {
        match connection.fetch_all(CONNECTION_PROBE_SQL, &[]).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_host_failure() => Err(DatabaseError::invalid_host(err)),
            Err(err) => Err(DatabaseError::unknown(err)),
        }
    }

    /// Create the target database unless it already exists.
    ///
    /// A no-op for SQLite, where the file appears on first use. The
    /// server-level connection is released on every exit path.
    pub async fn create_database_if_not_exist(&self, config: &BackendConfig) -> MigrationResult<()> {
        let capabilities = BackendCapabilities::for_client(&config.client)?;
        if !capabilities.creates_database {
            return Ok(());
        }
        config.validate()?;

        let target = config.normalized();
        let mut connection = self.connect_without_database(config)?;
        let result = self.create_database(&mut connection, &target).await;
        let released = connection.close().await;

        result?;
        released
    }

    async fn create_database(&self, connection: &mut Connection, target: &BackendConfig) -> MigrationResult<()> {
        self.ensure_connection_works(connection).await?;

        let capabilities = connection.capabilities();
        let name = target.database().to_string();

        if let Some(sql) = capabilities.database_exists_sql() {
            let rows = connection
                .fetch_all(sql, &[DatabaseValue::from(name.as_str())])
                .await
                .map_err(DatabaseError::creation_failed)?;
            if !rows.is_empty() {
                self.events.emit(&MigrationEvent::DatabaseAlreadyExists { name });
                return Ok(());
            }
        }

        let sql = capabilities
            .create_database_sql(target)
            .ok_or_else(|| MigrationError::unsupported_client(target.client.name()))?;

        self.events.emit(&MigrationEvent::CreatingDatabase { name: name.clone() });
        match connection.execute(&sql, &[]).await {
            Ok(_) => Ok(()),
            Err(err) if capabilities.classifier().classify(&err) == ErrorClass::DatabaseExists => {
                self.events.emit(&MigrationEvent::DatabaseAlreadyExists { name });
                Ok(())
            }
            Err(err) => Err(DatabaseError::creation_failed(err).into()),
        }
    }

    /// Drop every schema object of the target.
    ///
    /// Server backends drop the database itself, so `connection` should be a
    /// server-level one (see [`connect_without_database`](Self::connect_without_database)).
    /// SQLite drops its tables one by one, leaving engine tables alone.
    pub async fn drop(&self, connection: &mut Connection, config: &BackendConfig) -> MigrationResult<()> {
        let capabilities = BackendCapabilities::for_client(&config.client)?;
        let classifier = capabilities.classifier();

        match capabilities.database_drop {
            DatabaseDrop::DropDatabase { .. } => {
                let name = config.database().to_string();
                let sql = capabilities
                    .drop_database_sql(&name)
                    .ok_or_else(|| MigrationError::unsupported_client(config.client.name()))?;

                self.events.emit(&MigrationEvent::DroppingDatabase { name: name.clone() });
                match connection.execute(&sql, &[]).await {
                    Ok(_) => Ok(()),
                    Err(err) if classifier.classify(&err) == ErrorClass::DatabaseMissing => {
                        self.events.emit(&MigrationEvent::DatabaseAlreadyAbsent { name });
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            }
            DatabaseDrop::TableByTable => {
                let list_sql = capabilities
                    .list_tables_sql()
                    .ok_or_else(|| MigrationError::unsupported_client(config.client.name()))?;

                let rows = match connection.fetch_all(list_sql, &[]).await {
                    Ok(rows) => rows,
                    Err(err) if classifier.classify(&err) == ErrorClass::DatabaseMissing => {
                        self.events.emit(&MigrationEvent::DatabaseAlreadyAbsent {
                            name: config.database().to_string(),
                        });
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                };

                // Tables come back in creation order, parents before children
                if let Some(sql) = capabilities.foreign_key_checks_sql(false) {
                    connection.execute(sql, &[]).await?;
                }
                let dropped = self.drop_tables(connection, capabilities, rows).await;
                let restored = match capabilities.foreign_key_checks_sql(true) {
                    Some(sql) => connection.execute(sql, &[]).await.map(|_| ()),
                    None => Ok(()),
                };

                dropped?;
                restored?;
                Ok(())
            }
        }
    }

    async fn drop_tables(
        &self,
        connection: &mut Connection,
        capabilities: &'static BackendCapabilities,
        rows: Vec<Row>,
    ) -> MigrationResult<()> {
        let classifier = capabilities.classifier();

        for row in rows {
            let table = row.get_string("name")?;
            if capabilities.is_internal_table(&table) {
                self.events.emit(&MigrationEvent::SkippingTable { name: table });
                continue;
            }

            self.events.emit(&MigrationEvent::DroppingTable { name: table.clone() });
            let sql = format!(
                "DROP TABLE IF EXISTS {}",
                capabilities.dialect.quote_identifier(&table)
            );
            match connection.execute(&sql, &[]).await {
                Ok(_) => {}
                Err(err) if classifier.classify(&err) == ErrorClass::DatabaseMissing => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(tracing_sink())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use std::sync::Arc;

    #[test]
    fn test_connect_rejects_unsupported_client() {
        let manager = ConnectionManager::default();
        let config = BackendConfig::new(Client::Other("oracledb".to_string()), "app");

        let err = manager.connect(&config).unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedClient { client } if client == "oracledb"));
    }

    #[test]
    fn test_connect_requires_database() {
        let manager = ConnectionManager::default();
        let err = manager.connect(&BackendConfig::sqlite("")).unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_does_no_io() {
        let manager = ConnectionManager::default();
        let config = BackendConfig::new(Client::Postgres, "app").with_host("unreachable.invalid");

        let connection = manager.connect(&config).unwrap();
        assert_eq!(connection.config().connection.timezone.as_deref(), Some("UTC"));
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreleased_connection_is_reported() {
        let sink = RecordingSink::new();
        let manager = ConnectionManager::new(Arc::new(sink.clone()));
        let config = BackendConfig::new(Client::MySql, "app").with_host("localhost");

        let connection = manager.connect(&config).unwrap();
        drop(connection);

        assert!(sink.contains(&MigrationEvent::ConnectionDroppedWithoutRelease {
            client: "mysql".to_string()
        }));
    }

    #[tokio::test]
    async fn test_create_database_unsupported_client() {
        let manager = ConnectionManager::default();
        let config = BackendConfig::new(Client::Other("mssql".to_string()), "app");

        let err = manager.create_database_if_not_exist(&config).await.unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedClient { .. }));
    }
}
