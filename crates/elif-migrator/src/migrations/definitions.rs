//! Migration Definitions - Core types for versioned migration units
//!
//! Defines the migration unit and its step, the persisted record, the unit
//! catalog with its ordering rules, and the options and results of a run.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::MigrationContext;
use super::statements::split_sql_statements;
use crate::backends::SqlDialect;
use crate::error::{MigrationError, MigrationResult};

/// The executable body of a migration unit.
///
/// Everything a step does goes through the context, which routes it into the
/// run's transaction scope when the backend has one.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    async fn up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()>;
}

/// Step that runs a static SQL script, one statement at a time.
///
/// The script is split when the step runs, with the dialect of the backend
/// it runs against.
#[derive(Debug, Clone)]
pub struct SqlStep {
    sql: String,
}

impl SqlStep {
    pub fn new(sql: &str) -> Self {
        Self { sql: sql.to_string() }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn statements(&self, dialect: SqlDialect) -> Vec<String> {
        split_sql_statements(&self.sql, dialect)
    }
}

#[async_trait]
impl MigrationStep for SqlStep {
    async fn up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        for statement in self.statements(ctx.dialect()) {
            ctx.execute(&statement, &[]).await?;
        }
        Ok(())
    }
}

/// Boxed future returned by [`FnStep`] closures
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

type StepFn = dyn for<'a, 'c> Fn(&'a mut MigrationContext<'c>) -> StepFuture<'a> + Send + Sync;

/// Step backed by an async closure.
///
/// ```ignore
/// let step = FnStep::new(|ctx| Box::pin(async move {
///     ctx.execute("CREATE TABLE users (id INTEGER)", &[]).await?;
///     Ok(())
/// }));
/// ```
pub struct FnStep {
    f: Box<StepFn>,
}

impl FnStep {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a, 'c> Fn(&'a mut MigrationContext<'c>) -> StepFuture<'a> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnStep")
    }
}

#[async_trait]
impl MigrationStep for FnStep {
    async fn up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        (self.f)(ctx).await
    }
}

/// One versioned migration step
#[derive(Clone)]
pub struct MigrationUnit {
    pub version: String,
    pub name: String,
    pub step: Arc<dyn MigrationStep>,
}

impl MigrationUnit {
    pub fn new(version: impl Into<String>, name: impl Into<String>, step: impl MigrationStep + 'static) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            step: Arc::new(step),
        }
    }

    /// Unit running a SQL script
    pub fn sql(version: impl Into<String>, name: impl Into<String>, sql: &str) -> Self {
        Self::new(version, name, SqlStep::new(sql))
    }

    /// Total order: version (numeric-aware), then name
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        compare_versions(&self.version, &other.version).then_with(|| self.name.cmp(&other.name))
    }

    fn key(&self) -> (&str, &str) {
        (self.version.as_str(), self.name.as_str())
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

/// Compare dot-separated versions segment by segment.
///
/// Numeric segments compare as numbers, so `1.10` sorts after `1.9`; other
/// segments compare as text.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// A row of the bookkeeping table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// Assigned by the database; `None` before insertion
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    /// Application version at the time the unit was applied
    pub current_version: String,
}

impl MigrationRecord {
    pub fn new(unit: &MigrationUnit, current_version: impl Into<String>) -> Self {
        Self {
            id: None,
            name: unit.name.clone(),
            version: unit.version.clone(),
            current_version: current_version.into(),
        }
    }
}

/// Every known migration unit plus the baseline and target versions
#[derive(Debug, Clone)]
pub struct MigrationCatalog {
    /// Version whose units `init` applies
    pub init_version: String,
    /// Newest version; `migrate` applies units up to and including it
    pub current_version: String,
    units: Vec<MigrationUnit>,
}

impl MigrationCatalog {
    /// Build a catalog, rejecting duplicate (version, name) pairs
    pub fn new(
        init_version: impl Into<String>,
        current_version: impl Into<String>,
        mut units: Vec<MigrationUnit>,
    ) -> MigrationResult<Self> {
        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.key()) {
                return Err(MigrationError::DuplicateUnit {
                    version: unit.version.clone(),
                    name: unit.name.clone(),
                });
            }
        }

        units.sort_by(|a, b| a.cmp_order(b));

        Ok(Self {
            init_version: init_version.into(),
            current_version: current_version.into(),
            units,
        })
    }

    /// Load `<dir>/<version>/<name>.sql` files as SQL units
    pub fn load_sql_dir(
        dir: impl AsRef<Path>,
        init_version: impl Into<String>,
        current_version: impl Into<String>,
    ) -> MigrationResult<Self> {
        let dir = dir.as_ref();
        let load_err = |path: &Path, e: std::io::Error| {
            MigrationError::Load(format!("{}: {}", path.display(), e))
        };

        let mut units = Vec::new();
        let versions = std::fs::read_dir(dir).map_err(|e| load_err(dir, e))?;

        for version_entry in versions {
            let version_path = version_entry.map_err(|e| load_err(dir, e))?.path();
            if !version_path.is_dir() {
                continue;
            }
            let version = file_name(&version_path)?;

            let files = std::fs::read_dir(&version_path).map_err(|e| load_err(&version_path, e))?;
            for file_entry in files {
                let path = file_entry.map_err(|e| load_err(&version_path, e))?.path();
                if path.extension().map(|ext| ext == "sql").unwrap_or(false) {
                    let name = path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .ok_or_else(|| MigrationError::Load(format!("Invalid migration file name: {}", path.display())))?
                        .to_string();
                    let sql = std::fs::read_to_string(&path).map_err(|e| load_err(&path, e))?;
                    units.push(MigrationUnit::sql(version.clone(), name, &sql));
                }
            }
        }

        tracing::debug!(count = units.len(), dir = %dir.display(), "Loaded migration units");
        Self::new(init_version, current_version, units)
    }

    /// All units in execution order
    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    /// Units of one version, in order
    pub fn units_for_version<'a>(&'a self, version: &'a str) -> impl Iterator<Item = &'a MigrationUnit> + 'a {
        self.units.iter().filter(move |unit| unit.version == version)
    }

    /// Versions after the baseline up to and including `current_version`
    pub fn versions_after_init(&self) -> Vec<String> {
        let mut versions: Vec<String> = Vec::new();
        for unit in &self.units {
            let newer = compare_versions(&unit.version, &self.init_version) == Ordering::Greater;
            let reached = compare_versions(&unit.version, &self.current_version) != Ordering::Greater;
            if newer && reached && !versions.contains(&unit.version) {
                versions.push(unit.version.clone());
            }
        }
        versions
    }
}

fn file_name(path: &Path) -> MigrationResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| MigrationError::Load(format!("Invalid version directory: {}", path.display())))
}

/// Options for `init`
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Apply only the baseline; leave newer versions for `migrate`
    pub skip_init_completion: bool,
}

/// Options for `migrate`
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Run even when the baseline was never recorded
    pub force: bool,
}

/// Result of an `init` or `migrate` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Number of units executed
    pub migrations_applied: usize,
    /// `version/name` of each executed unit
    pub applied: Vec<String>,
    /// Units found already recorded
    pub skipped: usize,
    pub execution_time_ms: u128,
}

/// Recorded state versus the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseStatus {
    /// Baseline and every newer unit up to the current version are recorded
    UpToDate,
    /// No baseline rows; `init` has not run
    NotInitialized,
    /// Initialised, with units still to apply
    NeedsMigration { pending: Vec<String> },
}

impl DatabaseStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DatabaseStatus::UpToDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_version_ordering() {
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.9", "1.10"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "1.25"), Ordering::Greater);
        assert_eq!(compare_versions("1", "1.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0-beta", "1.0-alpha"), Ordering::Greater);
    }

    #[test]
    fn test_catalog_sorts_by_version_then_name() {
        let catalog = MigrationCatalog::new(
            "1.0",
            "1.10",
            vec![
                MigrationUnit::sql("1.10", "1-add-tags", "SELECT 1"),
                MigrationUnit::sql("1.0", "2-create-pets", "SELECT 1"),
                MigrationUnit::sql("1.2", "1-add-index", "SELECT 1"),
                MigrationUnit::sql("1.0", "1-create-users", "SELECT 1"),
            ],
        )
        .unwrap();

        let order: Vec<String> = catalog
            .units()
            .iter()
            .map(|unit| format!("{}/{}", unit.version, unit.name))
            .collect();
        assert_eq!(
            order,
            vec!["1.0/1-create-users", "1.0/2-create-pets", "1.2/1-add-index", "1.10/1-add-tags"]
        );
        assert_eq!(catalog.units_for_version("1.0").count(), 2);
        assert_eq!(catalog.versions_after_init(), vec!["1.2", "1.10"]);
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let err = MigrationCatalog::new(
            "1.0",
            "1.0",
            vec![
                MigrationUnit::sql("1.0", "1-create-users", "SELECT 1"),
                MigrationUnit::sql("1.0", "1-create-users", "SELECT 2"),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, MigrationError::DuplicateUnit { name, .. } if name == "1-create-users"));
    }

    #[test]
    fn test_versions_after_init_stops_at_current() {
        let catalog = MigrationCatalog::new(
            "1.0",
            "1.1",
            vec![
                MigrationUnit::sql("1.0", "a", "SELECT 1"),
                MigrationUnit::sql("1.1", "b", "SELECT 1"),
                MigrationUnit::sql("1.2", "c", "SELECT 1"),
            ],
        )
        .unwrap();
        assert_eq!(catalog.versions_after_init(), vec!["1.1"]);
    }

    #[test]
    fn test_load_sql_dir() {
        let dir = TempDir::new().unwrap();
        let init = dir.path().join("1.0");
        let next = dir.path().join("1.1");
        std::fs::create_dir_all(&init).unwrap();
        std::fs::create_dir_all(&next).unwrap();
        std::fs::write(init.join("1-create-users.sql"), "CREATE TABLE users (id INTEGER);").unwrap();
        std::fs::write(init.join("README.md"), "not a migration").unwrap();
        std::fs::write(next.join("1-add-name.sql"), "ALTER TABLE users ADD COLUMN name TEXT;").unwrap();

        let catalog = MigrationCatalog::load_sql_dir(dir.path(), "1.0", "1.1").unwrap();
        let names: Vec<&str> = catalog.units().iter().map(|unit| unit.name.as_str()).collect();
        assert_eq!(names, vec!["1-create-users", "1-add-name"]);
        assert_eq!(catalog.units()[0].version, "1.0");
    }

    #[test]
    fn test_load_sql_dir_missing() {
        let err = MigrationCatalog::load_sql_dir("/nonexistent/migrations", "1.0", "1.0").unwrap_err();
        assert!(matches!(err, MigrationError::Load(_)));
    }

    #[test]
    fn test_sql_step_splits_script() {
        let step = SqlStep::new("CREATE TABLE users (id INTEGER);\nINSERT INTO users (id) VALUES ('a\\';b');");
        assert_eq!(step.statements(SqlDialect::MySQL).len(), 2);
        assert_eq!(step.statements(SqlDialect::SQLite).len(), 3);
    }
}
