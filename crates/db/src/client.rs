//! Thin transactional wrapper over a local SQLite database.
//!
//! Tables here are declared by configuration rather than compile-time
//! structs, so query results are decoded dynamically into JSON records.

use crate::error::DbResult;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Pool, Row, Sqlite, Transaction, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// A single table row decoded as a JSON object.
pub type Record = Map<String, Value>;

/// A connection to a local record store database.
///
/// Each store owns its own handle; mutations run inside explicit
/// transactions so that readers never observe half-applied updates.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| sqlx::Error::Io(e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        Self::connect(opts).await
    }

    /// Open an in-memory database. Used by tests.
    pub async fn in_memory() -> DbResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(opts).await
    }

    async fn connect(opts: SqliteConnectOptions) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            // A single connection serialises writers, which is the intended
            // concurrency model for this store.
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Begin an explicit transaction.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        execute_on(&self.pool, sql, params).await
    }

    /// Run a query and decode every row.
    pub async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Record>> {
        query_on(&self.pool, sql, params).await
    }

    /// Run a query expected to match at most one row.
    pub async fn query_one(&self, sql: &str, params: &[Value]) -> DbResult<Option<Record>> {
        query_one_on(&self.pool, sql, params).await
    }
}

/// Execute a statement against any executor (pool or open transaction).
pub async fn execute_on<'c, E>(executor: E, sql: &str, params: &[Value]) -> DbResult<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }
    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}

/// Run a query against any executor and decode every row.
pub async fn query_on<'c, E>(executor: E, sql: &str, params: &[Value]) -> DbResult<Vec<Record>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }
    let rows = query.fetch_all(executor).await?;
    rows.iter().map(row_to_record).collect()
}

/// Run a query against any executor, decoding at most one row.
pub async fn query_one_on<'c, E>(
    executor: E,
    sql: &str,
    params: &[Value],
) -> DbResult<Option<Record>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }
    let row = query.fetch_optional(executor).await?;
    row.as_ref().map(row_to_record).transpose()
}

/// Bind a JSON value as a statement parameter.
///
/// Arrays and objects are bound as their JSON text; everything else maps to
/// the natural SQLite type.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// Decode a row into a JSON record using the declared column types.
fn row_to_record(row: &SqliteRow) -> DbResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" => Value::from(row.try_get::<f64, _>(idx)?),
                "BLOB" => Value::from(row.try_get::<Vec<u8>, _>(idx)?),
                _ => Value::from(row.try_get::<String, _>(idx)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}
