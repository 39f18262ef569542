//! SQLite Backend Implementation
//!
//! File-based backend using sqlx. Statements outside an explicit transaction
//! commit one by one; the database file is created on first use.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row as SqlxRow, TypeInfo, ValueRef};

use super::core::*;
use crate::config::{BackendConfig, Client};
use crate::error::{DriverError, DriverResult};

/// SQLite database backend implementation
#[derive(Debug, Default)]
pub struct SqliteBackend;

impl SqliteBackend {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(config: &BackendConfig) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(Path::new(&config.connection.database))
            .create_if_missing(true)
    }
}

impl DatabaseBackend for SqliteBackend {
    fn client(&self) -> Client {
        Client::Sqlite
    }

    fn connect_lazy(&self, config: &BackendConfig) -> DriverResult<Box<dyn DatabaseConnection>> {
        // The only connection must stay open, or an in-memory database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(Self::connect_options(config));

        Ok(Box::new(SqliteConnection { pool }))
    }
}

/// SQLite connection implementation over a one-connection pool
pub struct SqliteConnection {
    pool: Pool<Sqlite>,
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
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
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn active(&mut self) -> DriverResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx.as_mut().ok_or_else(DriverError::closed)
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
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
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn decode_row(row: &SqliteRow) -> DriverResult<Row> {
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

/// Convert a SQLite column value to DatabaseValue
fn decode_column(row: &SqliteRow, index: usize, type_name: &str) -> DriverResult<DatabaseValue> {
    let value = match type_name {
        "INTEGER" => DatabaseValue::Int64(row.try_get(index)?),
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index)?),
        "REAL" => DatabaseValue::Float64(row.try_get(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get(index)?),
        _ => DatabaseValue::String(row.try_get_unchecked(index)?),
    };
    Ok(value)
}
