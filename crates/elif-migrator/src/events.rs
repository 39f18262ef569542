//! Migration events
//!
//! The migrator reports what it does through an injected [`EventSink`]
//! instead of logging from deep inside the data-access code. [`TracingSink`]
//! forwards to `tracing`; [`RecordingSink`] keeps events in memory.

use std::sync::{Arc, Mutex};

use crate::error::RollbackOutcome;

/// Something the migrator did or observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    CreatingDatabase { name: String },
    DatabaseAlreadyExists { name: String },
    DroppingDatabase { name: String },
    DatabaseAlreadyAbsent { name: String },
    DroppingTable { name: String },
    SkippingTable { name: String },
    CreatingBookkeepingTable { table: String },
    ApplyingUnit { version: String, name: String },
    UnitApplied { version: String, name: String },
    UnitRecorded { version: String, name: String },
    UnitFailed { version: String, name: String, message: String },
    ScopeCommitted { units: usize },
    ScopeRolledBack { outcome: RollbackOutcome },
    RollbackFailed { message: String },
    ConnectionReleased { client: String },
    ConnectionDroppedWithoutRelease { client: String },
}

/// Receiver for migration events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &MigrationEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::CreatingDatabase { name } => {
                tracing::info!(database = %name, "Creating database");
            }
            MigrationEvent::DatabaseAlreadyExists { name } => {
                tracing::debug!(database = %name, "Database already exists");
            }
            MigrationEvent::DroppingDatabase { name } => {
                tracing::info!(database = %name, "Dropping database");
            }
            MigrationEvent::DatabaseAlreadyAbsent { name } => {
                tracing::debug!(database = %name, "Database does not exist, nothing to drop");
            }
            MigrationEvent::DroppingTable { name } => {
                tracing::debug!(table = %name, "Dropping table");
            }
            MigrationEvent::SkippingTable { name } => {
                tracing::debug!(table = %name, "Skip drop table");
            }
            MigrationEvent::CreatingBookkeepingTable { table } => {
                tracing::debug!(table = %table, "Creating table");
            }
            MigrationEvent::ApplyingUnit { version, name } => {
                tracing::info!(version = %version, migration = %name, "Applying migration");
            }
            MigrationEvent::UnitApplied { version, name } => {
                tracing::debug!(version = %version, migration = %name, "Migration applied");
            }
            MigrationEvent::UnitRecorded { version, name } => {
                tracing::debug!(version = %version, migration = %name, "Migration recorded without execution");
            }
            MigrationEvent::UnitFailed { version, name, message } => {
                tracing::warn!(version = %version, migration = %name, error = %message, "Migration failed");
            }
            MigrationEvent::ScopeCommitted { units } => {
                tracing::debug!(units, "Transaction committed");
            }
            MigrationEvent::ScopeRolledBack { outcome } => {
                tracing::warn!(outcome = %outcome, "Transaction rolled back");
            }
            MigrationEvent::RollbackFailed { message } => {
                tracing::error!(error = %message, "Rollback failed");
            }
            MigrationEvent::ConnectionReleased { client } => {
                tracing::debug!(client = %client, "Destroy connection");
            }
            MigrationEvent::ConnectionDroppedWithoutRelease { client } => {
                tracing::warn!(client = %client, "Connection dropped without explicit release");
            }
        }
    }
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<MigrationEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far
    pub fn events(&self) -> Vec<MigrationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, event: &MigrationEvent) -> bool {
        self.events().iter().any(|recorded| recorded == event)
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &MigrationEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}

/// Shared handle to a sink
pub type SharedEventSink = Arc<dyn EventSink>;

pub fn tracing_sink() -> SharedEventSink {
    Arc::new(TracingSink)
}
