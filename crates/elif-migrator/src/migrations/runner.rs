//! Migration Runner - Executes migration units against the database
//!
//! One run opens one connection, makes sure the bookkeeping table exists,
//! computes the pending units and executes them in order. Backends with
//! transactional or implicitly committing DDL run every pending unit inside a
//! single transaction scope; on SQLite each statement commits on its own.

use std::collections::HashSet;
use std::time::Instant;

use super::context::{MigrationContext, StatementTally};
use super::definitions::{
    DatabaseStatus, InitOptions, MigrateOptions, MigrationCatalog, MigrationRecord,
    MigrationUnit, RunSummary,
};
use super::store::{BookkeepingStore, StoreConfig};
use crate::backends::{BackendCapabilities, DatabaseBackendRegistry, ErrorClass};
use crate::config::BackendConfig;
use crate::connection::{Connection, ConnectionManager, SqlExecutor};
use crate::error::{MigrationError, MigrationResult, RollbackOutcome};
use crate::events::{tracing_sink, MigrationEvent, SharedEventSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanAction {
    Execute,
    /// Write the bookkeeping row without running the step
    RecordOnly,
}

#[derive(Debug)]
struct PlannedUnit<'a> {
    unit: &'a MigrationUnit,
    action: PlanAction,
}

#[derive(Debug, Default)]
struct Plan<'a> {
    units: Vec<PlannedUnit<'a>>,
    skipped: usize,
}

impl<'a> Plan<'a> {
    fn add_version(&mut self, catalog: &'a MigrationCatalog, version: &str, applied: &[MigrationRecord], action: PlanAction) {
        let applied: HashSet<&str> = applied.iter().map(|record| record.name.as_str()).collect();
        for unit in catalog.units().iter().filter(|unit| unit.version == version) {
            if applied.contains(unit.name.as_str()) {
                self.skipped += 1;
            } else {
                self.units.push(PlannedUnit { unit, action });
            }
        }
    }
}

/// First failure of a run, before the rollback decision
struct UnitFailure {
    version: String,
    name: String,
    cause: anyhow::Error,
    tally: StatementTally,
}

impl UnitFailure {
    fn into_error(self, rollback: RollbackOutcome) -> MigrationError {
        MigrationError::UnitFailed {
            version: self.version,
            name: self.name,
            cause: self.cause,
            rollback,
        }
    }
}

/// Applies a migration catalog to the configured database
pub struct Migrator {
    config: BackendConfig,
    catalog: MigrationCatalog,
    events: SharedEventSink,
    registry: DatabaseBackendRegistry,
    store_config: StoreConfig,
    manager: ConnectionManager,
    store: BookkeepingStore,
}

impl Migrator {
    pub fn new(config: BackendConfig, catalog: MigrationCatalog) -> Self {
        let events = tracing_sink();
        let registry = DatabaseBackendRegistry::default();
        let store_config = StoreConfig::default();

        Self {
            manager: ConnectionManager::with_registry(events.clone(), registry.clone()),
            store: BookkeepingStore::new(store_config.clone(), events.clone()),
            config,
            catalog,
            events,
            registry,
            store_config,
        }
    }

    /// Send events to `events` instead of `tracing`
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self.rebuild();
        self
    }

    /// Use a custom set of backends
    pub fn with_registry(mut self, registry: DatabaseBackendRegistry) -> Self {
        self.registry = registry;
        self.rebuild();
        self
    }

    pub fn with_store_config(mut self, store_config: StoreConfig) -> Self {
        self.store_config = store_config;
        self.rebuild();
        self
    }

    fn rebuild(&mut self) {
        self.manager = ConnectionManager::with_registry(self.events.clone(), self.registry.clone());
        self.store = BookkeepingStore::new(self.store_config.clone(), self.events.clone());
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn store(&self) -> &BookkeepingStore {
        &self.store
    }

    /// Apply the baseline version and complete initialisation
    pub async fn init(&self) -> MigrationResult<RunSummary> {
        self.init_with(InitOptions::default()).await
    }

    /// Apply the baseline version's pending units.
    ///
    /// On a fresh database, units of newer versions up to the current one are
    /// then recorded without being executed, unless `skip_init_completion`
    /// is set.
    pub async fn init_with(&self, options: InitOptions) -> MigrationResult<RunSummary> {
        let started = Instant::now();
        self.manager.create_database_if_not_exist(&self.config).await?;

        let mut connection = self.manager.connect(&self.config)?;
        let result = self.run_init(&mut connection, &options, started).await;
        let released = connection.close().await;

        let summary = result?;
        released?;
        Ok(summary)
    }

    async fn run_init(&self, connection: &mut Connection, options: &InitOptions, started: Instant) -> MigrationResult<RunSummary> {
        self.prepare(connection).await?;

        let catalog = &self.catalog;
        let baseline = self.store.list_applied(connection, &catalog.init_version).await?;

        let mut plan = Plan::default();
        plan.add_version(catalog, &catalog.init_version, &baseline, PlanAction::Execute);

        if baseline.is_empty() && !options.skip_init_completion {
            let versions = catalog.versions_after_init();
            for version in &versions {
                let applied = self.store.list_applied(connection, version).await?;
                plan.add_version(catalog, version, &applied, PlanAction::RecordOnly);
            }
        }

        self.execute_plan(connection, plan, started).await
    }

    /// Apply pending units of every version after the baseline
    pub async fn migrate(&self, options: MigrateOptions) -> MigrationResult<RunSummary> {
        let started = Instant::now();

        let mut connection = self.manager.connect(&self.config)?;
        let result = self.run_migrate(&mut connection, &options, started).await;
        let released = connection.close().await;

        let summary = result?;
        released?;
        Ok(summary)
    }

    async fn run_migrate(&self, connection: &mut Connection, options: &MigrateOptions, started: Instant) -> MigrationResult<RunSummary> {
        self.prepare(connection).await?;

        let catalog = &self.catalog;
        let baseline = self.store.list_applied(connection, &catalog.init_version).await?;
        if baseline.is_empty() && !options.force {
            return Err(MigrationError::NotInitialized);
        }

        let mut plan = Plan::default();
        let versions = catalog.versions_after_init();
        for version in &versions {
            let applied = self.store.list_applied(connection, version).await?;
            plan.add_version(catalog, version, &applied, PlanAction::Execute);
        }

        self.execute_plan(connection, plan, started).await
    }

    /// Tear every schema object down and leave an empty target behind
    pub async fn reset(&self) -> MigrationResult<()> {
        let capabilities = BackendCapabilities::for_client(&self.config.client)?;

        let mut connection = if capabilities.creates_database {
            self.manager.connect_without_database(&self.config)?
        } else {
            self.manager.connect(&self.config)?
        };
        let result = self.drop_target(&mut connection).await;
        let released = connection.close().await;

        result?;
        released?;

        if capabilities.creates_database {
            self.manager.create_database_if_not_exist(&self.config).await?;
        }
        Ok(())
    }

    async fn drop_target(&self, connection: &mut Connection) -> MigrationResult<()> {
        self.manager.ensure_connection_works(connection).await?;
        self.manager.drop(connection, &self.config).await
    }

    /// Compare the recorded units with the catalog
    pub async fn is_database_ok(&self) -> MigrationResult<DatabaseStatus> {
        let mut connection = self.manager.connect(&self.config)?;
        let result = self.status(&mut connection).await;
        let released = connection.close().await;

        let status = result?;
        released?;
        Ok(status)
    }

    async fn status(&self, connection: &mut Connection) -> MigrationResult<DatabaseStatus> {
        self.manager.ensure_connection_works(connection).await?;

        let records = match self.store.list_all(connection).await {
            Ok(records) => records,
            Err(err) if connection.capabilities().classifier().classify(&err) == ErrorClass::TableMissing => {
                return Ok(DatabaseStatus::NotInitialized);
            }
            Err(err) => return Err(err.into()),
        };

        let catalog = &self.catalog;
        if !records.iter().any(|record| record.version == catalog.init_version) {
            return Ok(DatabaseStatus::NotInitialized);
        }

        let recorded: HashSet<(&str, &str)> = records
            .iter()
            .map(|record| (record.version.as_str(), record.name.as_str()))
            .collect();
        let mut expected = vec![catalog.init_version.clone()];
        expected.extend(catalog.versions_after_init());

        let pending: Vec<String> = catalog
            .units()
            .iter()
            .filter(|unit| expected.contains(&unit.version))
            .filter(|unit| !recorded.contains(&(unit.version.as_str(), unit.name.as_str())))
            .map(|unit| format!("{}/{}", unit.version, unit.name))
            .collect();

        if pending.is_empty() {
            Ok(DatabaseStatus::UpToDate)
        } else {
            Ok(DatabaseStatus::NeedsMigration { pending })
        }
    }

    /// Validate connectivity and make sure the bookkeeping table exists.
    /// Runs outside any transaction scope.
    async fn prepare(&self, connection: &mut Connection) -> MigrationResult<()> {
        self.manager.ensure_connection_works(connection).await?;
        self.store.ensure_migrations_table(connection).await
    }

    async fn execute_plan(&self, connection: &mut Connection, plan: Plan<'_>, started: Instant) -> MigrationResult<RunSummary> {
        let skipped = plan.skipped;
        if plan.units.is_empty() {
            return Ok(RunSummary {
                skipped,
                execution_time_ms: started.elapsed().as_millis(),
                ..Default::default()
            });
        }

        let capabilities = connection.capabilities();

        let applied = if capabilities.opens_scope() {
            let mut scope = connection.begin().await?;
            let outcome = {
                let mut ctx = MigrationContext::new(&mut scope);
                self.run_units(&mut ctx, &plan.units).await
            };

            match outcome {
                Ok(applied) => {
                    scope
                        .commit()
                        .await
                        .map_err(|e| MigrationError::transaction("Failed to commit migrations", e))?;
                    self.events.emit(&MigrationEvent::ScopeCommitted { units: plan.units.len() });
                    applied
                }
                Err(failure) => {
                    let rollback_succeeded = match scope.rollback().await {
                        Ok(()) => true,
                        Err(err) => {
                            self.events.emit(&MigrationEvent::RollbackFailed { message: err.to_string() });
                            false
                        }
                    };
                    let outcome = capabilities.ddl.rollback_outcome(
                        failure.tally.statements,
                        failure.tally.schema_statements,
                        rollback_succeeded,
                    );
                    self.events.emit(&MigrationEvent::ScopeRolledBack { outcome });
                    return Err(failure.into_error(outcome));
                }
            }
        } else {
            let mut ctx = MigrationContext::new(connection);
            match self.run_units(&mut ctx, &plan.units).await {
                Ok(applied) => applied,
                Err(failure) => {
                    let outcome = capabilities.ddl.rollback_outcome(
                        failure.tally.statements,
                        failure.tally.schema_statements,
                        true,
                    );
                    return Err(failure.into_error(outcome));
                }
            }
        };

        Ok(RunSummary {
            migrations_applied: applied.len(),
            applied,
            skipped,
            execution_time_ms: started.elapsed().as_millis(),
        })
    }

    /// Run the plan in order, stopping at the first failure
    async fn run_units(&self, ctx: &mut MigrationContext<'_>, units: &[PlannedUnit<'_>]) -> Result<Vec<String>, UnitFailure> {
        let mut applied = Vec::new();

        for planned in units {
            let unit = planned.unit;
            ctx.enter_unit(&unit.version, &unit.name);

            if planned.action == PlanAction::Execute {
                self.events.emit(&MigrationEvent::ApplyingUnit {
                    version: unit.version.clone(),
                    name: unit.name.clone(),
                });

                if let Err(cause) = unit.step.up(ctx).await {
                    return Err(self.fail(unit, cause, ctx.tally()));
                }
            }

            let record = MigrationRecord::new(unit, self.catalog.current_version.as_str());
            if let Err(err) = self.store.record_applied(ctx, &record).await {
                return Err(self.fail(unit, err.into(), ctx.tally()));
            }

            match planned.action {
                PlanAction::Execute => {
                    self.events.emit(&MigrationEvent::UnitApplied {
                        version: unit.version.clone(),
                        name: unit.name.clone(),
                    });
                    applied.push(format!("{}/{}", unit.version, unit.name));
                }
                PlanAction::RecordOnly => {
                    self.events.emit(&MigrationEvent::UnitRecorded {
                        version: unit.version.clone(),
                        name: unit.name.clone(),
                    });
                }
            }
        }

        Ok(applied)
    }

    fn fail(&self, unit: &MigrationUnit, cause: anyhow::Error, tally: StatementTally) -> UnitFailure {
        self.events.emit(&MigrationEvent::UnitFailed {
            version: unit.version.clone(),
            name: unit.name.clone(),
            message: cause.to_string(),
        });

        UnitFailure {
            version: unit.version.clone(),
            name: unit.name.clone(),
            cause,
            tally,
        }
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("client", &self.config.client)
            .field("database", &self.config.database())
            .field("init_version", &self.catalog.init_version)
            .field("current_version", &self.catalog.current_version)
            .finish()
    }
}
