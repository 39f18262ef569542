//! MySQL Backend Implementation
//!
//! MySQL-family implementation of the backend traits using sqlx. Schema
//! statements commit implicitly on this backend, see
//! [`DdlTransactionality::ImplicitCommit`](super::capabilities::DdlTransactionality).

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Pool, Row as SqlxRow, TypeInfo, ValueRef};

use super::core::*;
use crate::config::{BackendConfig, Client, DEFAULT_TIMEZONE};
use crate::error::{DriverError, DriverErrorKind, DriverResult};

/// MySQL database backend implementation
#[derive(Debug, Default)]
pub struct MySqlBackend;

impl MySqlBackend {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(config: &BackendConfig) -> MySqlConnectOptions {
        let params = &config.connection;
        let mut options = MySqlConnectOptions::new();

        if !params.database.is_empty() {
            options = options.database(&params.database);
        }
        if let Some(host) = &params.host {
            options = options.host(host);
        }
        if let Some(port) = params.port {
            options = options.port(port);
        }
        if let Some(user) = &params.user {
            options = options.username(user);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }
        if let Some(charset) = &params.charset {
            options = options.charset(charset);
        }
        if let Some(collation) = &params.collation {
            options = options.collation(collation);
        }
        if let Some(timezone) = &params.timezone {
            options = options.timezone(Some(session_timezone(timezone)));
        }

        options
    }
}

/// Named zones need the server's tz tables; UTC is sent as an offset.
fn session_timezone(timezone: &str) -> String {
    if timezone.eq_ignore_ascii_case(DEFAULT_TIMEZONE) || timezone == "Z" {
        "+00:00".to_string()
    } else {
        timezone.to_string()
    }
}

impl DatabaseBackend for MySqlBackend {
    fn client(&self) -> Client {
        Client::MySql
    }

    fn connect_lazy(&self, config: &BackendConfig) -> DriverResult<Box<dyn DatabaseConnection>> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .connect_lazy_with(Self::connect_options(config));

        Ok(Box::new(MySqlConnection { pool }))
    }
}

/// MySQL connection implementation over a one-connection pool
pub struct MySqlConnection {
    pool: Pool<MySql>,
}

#[async_trait]
impl DatabaseConnection for MySqlConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn begin_transaction(&mut self) -> DriverResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlTransaction { tx: Some(tx) }))
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// MySQL transaction implementation
pub struct MySqlTransaction {
    tx: Option<sqlx::Transaction<'static, MySql>>,
}

impl MySqlTransaction {
    fn active(&mut self) -> DriverResult<&mut sqlx::Transaction<'static, MySql>> {
        self.tx.as_mut().ok_or_else(DriverError::closed)
    }
}

#[async_trait]
impl DatabaseTransaction for MySqlTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        let tx = self.active()?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<Vec<Row>> {
        let tx = self.active()?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(&mut **tx).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(mut self: Box<Self>) -> DriverResult<()> {
        let tx = self.tx.take().ok_or_else(DriverError::closed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DriverResult<()> {
        let tx = self.tx.take().ok_or_else(DriverError::closed)?;
        tx.rollback().await?;
        Ok(())
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn decode_row(row: &MySqlRow) -> DriverResult<Row> {
    let mut columns = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        let is_null = row.try_get_raw(index)?.is_null();
        let value = if is_null {
            DatabaseValue::Null
        } else {
            decode_column(row, index, column.type_info().name())?
        };
        columns.push((column.name().to_string(), value));
    }

    Ok(Row::new(columns))
}

/// Convert a MySQL column value to DatabaseValue
fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> DriverResult<DatabaseValue> {
    let value = match type_name {
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            DatabaseValue::Int64(row.try_get(index)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            let unsigned: u64 = row.try_get(index)?;
            let signed = i64::try_from(unsigned).map_err(|_| {
                DriverError::new(
                    DriverErrorKind::Other,
                    format!("Column {} value {} does not fit in i64", index, unsigned),
                )
            })?;
            DatabaseValue::Int64(signed)
        }
        "FLOAT" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => DatabaseValue::Float64(row.try_get(index)?),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            DatabaseValue::Bytes(row.try_get(index)?)
        }
        _ => DatabaseValue::String(row.try_get(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_timezone() {
        assert_eq!(session_timezone("UTC"), "+00:00");
        assert_eq!(session_timezone("utc"), "+00:00");
        assert_eq!(session_timezone("+02:00"), "+02:00");
    }
}
