//! Backend configuration records
//!
//! The configuration provider hands the migrator a [`BackendConfig`]; the
//! migrator never reads configuration files itself. Defaults are applied by
//! [`BackendConfig::normalized`] before a connection is built.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MYSQL_DEFAULT_CHARSET: &str = "utf8mb4";
pub const MYSQL_DEFAULT_COLLATION: &str = "utf8mb4_general_ci";
pub const POSTGRES_DEFAULT_CHARSET: &str = "UTF8";
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Database PostgreSQL connects to when no target database is selected
pub const POSTGRES_MAINTENANCE_DATABASE: &str = "postgres";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Invalid database URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ConfigError {
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Database client kind.
///
/// Unknown client names are preserved in [`Client::Other`] so the error can
/// name them; every operation rejects them with `UnsupportedClient`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Client {
    MySql,
    Postgres,
    Sqlite,
    Other(String),
}

impl Client {
    pub fn name(&self) -> &str {
        match self {
            Client::MySql => "mysql",
            Client::Postgres => "pg",
            Client::Sqlite => "sqlite3",
            Client::Other(name) => name,
        }
    }

    /// Whether the database lives on a server rather than in a local file
    pub fn is_server(&self) -> bool {
        matches!(self, Client::MySql | Client::Postgres)
    }
}

impl From<String> for Client {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "mysql" | "mysql2" => Client::MySql,
            "pg" | "postgres" | "postgresql" => Client::Postgres,
            "sqlite3" | "sqlite" => Client::Sqlite,
            _ => Client::Other(value),
        }
    }
}

impl From<Client> for String {
    fn from(client: Client) -> Self {
        client.name().to_string()
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection parameters. `database` is a catalog name on server backends and
/// a file path for SQLite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Backend configuration record supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub client: Client,
    pub connection: ConnectionParams,
    /// Knex-compatible `useNullAsDefault` flag. Carried through so configs
    /// round-trip and normalized to `false` for SQLite; the sqlx drivers do
    /// not read it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_null_as_default: Option<bool>,
}

impl BackendConfig {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            connection: ConnectionParams {
                database: database.into(),
                ..Default::default()
            },
            use_null_as_default: None,
        }
    }

    /// SQLite configuration for a database file
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new(Client::Sqlite, path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.connection.host = Some(host.into());
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.connection.user = Some(user.into());
        self.connection.password = Some(password.into());
        self
    }

    /// Parse a `postgres://`, `mysql://` or `sqlite://` URL
    pub fn from_url(database_url: &str) -> Result<Self, ConfigError> {
        let parsed = url::Url::parse(database_url)?;

        let client = Client::from(parsed.scheme().to_string());
        if let Client::Other(scheme) = &client {
            return Err(ConfigError::invalid_value(
                "url",
                scheme.clone(),
                "postgres://, mysql:// or sqlite://",
            ));
        }

        if client == Client::Sqlite {
            // sqlite://relative/path keeps the host as the first path segment
            let path = match parsed.host_str() {
                Some(host) => format!("{}{}", host, parsed.path()),
                None => parsed.path().to_string(),
            };
            let config = Self::sqlite(path);
            config.validate()?;
            return Ok(config);
        }

        let database = parsed.path().trim_start_matches('/').to_string();
        let user = if parsed.username().is_empty() {
            None
        } else {
            Some(parsed.username().to_string())
        };

        let mut config = Self::new(client, database);
        config.connection.host = parsed.host_str().map(str::to_string);
        config.connection.port = parsed.port();
        config.connection.user = user;
        config.connection.password = parsed.password().map(str::to_string);

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "charset" => config.connection.charset = Some(value.into_owned()),
                "collation" => config.connection.collation = Some(value.into_owned()),
                "timezone" => config.connection.timezone = Some(value.into_owned()),
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the migrator relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.database.trim().is_empty() {
            return Err(ConfigError::missing_required(
                "connection.database",
                "Set the database name (or the file path for sqlite3).",
            ));
        }
        // Both end up unquoted in CREATE DATABASE
        for (field, value) in [
            ("connection.charset", &self.connection.charset),
            ("connection.collation", &self.connection.collation),
        ] {
            if let Some(value) = value {
                if !is_plain_name(value) {
                    return Err(ConfigError::invalid_value(field, value.as_str(), "[A-Za-z0-9_]+"));
                }
            }
        }
        Ok(())
    }

    /// Apply per-client defaults
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        let connection = &mut config.connection;

        match config.client {
            Client::MySql => {
                connection.timezone.get_or_insert_with(|| DEFAULT_TIMEZONE.to_string());
                connection.charset.get_or_insert_with(|| MYSQL_DEFAULT_CHARSET.to_string());
                connection.collation.get_or_insert_with(|| MYSQL_DEFAULT_COLLATION.to_string());
            }
            Client::Postgres => {
                connection.timezone.get_or_insert_with(|| DEFAULT_TIMEZONE.to_string());
                connection.charset.get_or_insert_with(|| POSTGRES_DEFAULT_CHARSET.to_string());
            }
            Client::Sqlite => {
                config.use_null_as_default.get_or_insert(false);
            }
            Client::Other(_) => {}
        }

        config
    }

    /// Server-level configuration with no database selected.
    ///
    /// Used to create or drop the target database, which not every server
    /// allows from inside that database.
    pub fn without_database(&self) -> Self {
        let mut config = self.clone();
        config.connection.database = match self.client {
            Client::Postgres => POSTGRES_MAINTENANCE_DATABASE.to_string(),
            _ => String::new(),
        };
        config
    }

    pub fn database(&self) -> &str {
        &self.connection.database
    }

    /// Character set used for `CREATE DATABASE`
    pub fn charset(&self) -> &str {
        match (&self.connection.charset, &self.client) {
            (Some(charset), _) => charset.as_str(),
            (None, Client::MySql) => MYSQL_DEFAULT_CHARSET,
            (None, _) => POSTGRES_DEFAULT_CHARSET,
        }
    }

    /// Collation used for `CREATE DATABASE`
    pub fn collation(&self) -> &str {
        self.connection
            .collation
            .as_deref()
            .unwrap_or(MYSQL_DEFAULT_COLLATION)
    }
}

fn is_plain_name(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
