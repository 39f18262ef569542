//! PostgreSQL Backend Implementation
//!
//! PostgreSQL-specific implementation of the backend traits using sqlx as the
//! underlying driver.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo, ValueRef};

use super::core::*;
use crate::config::{BackendConfig, Client};
use crate::error::{DriverError, DriverResult};

/// PostgreSQL database backend implementation
#[derive(Debug, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(config: &BackendConfig) -> PgConnectOptions {
        let params = &config.connection;
        let mut options = PgConnectOptions::new().database(&params.database);

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
        if let Some(timezone) = &params.timezone {
            options = options.options([("timezone", timezone.as_str())]);
        }

        options
    }
}

impl DatabaseBackend for PostgresBackend {
    fn client(&self) -> Client {
        Client::Postgres
    }

    fn connect_lazy(&self, config: &BackendConfig) -> DriverResult<Box<dyn DatabaseConnection>> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .connect_lazy_with(Self::connect_options(config));

        Ok(Box::new(PostgresConnection { pool }))
    }
}

/// PostgreSQL connection implementation over a one-connection pool
pub struct PostgresConnection {
    pool: Pool<Postgres>,
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
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
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn active(&mut self) -> DriverResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or_else(DriverError::closed)
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
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
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn decode_row(row: &PgRow) -> DriverResult<Row> {
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

/// Convert a PostgreSQL column value to DatabaseValue
fn decode_column(row: &PgRow, index: usize, type_name: &str) -> DriverResult<DatabaseValue> {
    let value = match type_name {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int64(i64::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int64(i64::from(row.try_get::<i32, _>(index)?)),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        _ => DatabaseValue::String(row.try_get(index)?),
    };
    Ok(value)
}
