// PostgreSQL engine
// Convenience wrapper holding one bb8 pool per database, created on first use.
// Every operation checks a connection out of the pool and returns it on all
// exit paths; batched selects hold an owned checkout for the stream's lifetime.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row, RowStream};
use tracing::debug;

use crate::batch::{next_chunk, BatchSource, CellValue, RecordBatch, FIND_MANY_MAX_COUNT};
use crate::error::StoreError;
use crate::postgres::sql::{slice_iter, where_clause, JoinSpec, SqlPredicate};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;
type PooledConn = bb8::PooledConnection<'static, PostgresConnectionManager<NoTls>>;

/// Connection configuration for the relational store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgConfig {
    pub host: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub port: Option<u16>,
    /// Database used for server-level operations; `postgres` when unset.
    pub maintenance_db: Option<String>,
}

impl PgConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            port: None,
            maintenance_db: None,
        }
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or(5432)
    }

    pub fn maintenance_db_name(&self) -> &str {
        self.maintenance_db.as_deref().unwrap_or("postgres")
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.host.is_empty() {
            return Err(StoreError::InvalidConfig("Host is required".to_string()));
        }
        if self.user.is_empty() {
            return Err(StoreError::InvalidConfig("User is required".to_string()));
        }
        Ok(())
    }

    fn connection_string(&self, database: &str) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host,
            self.get_port(),
            self.user,
            self.password,
            database
        )
    }
}

/// Column metadata as returned by [`PgEngine::describe_table`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    /// `"PRI"` for primary-key columns, empty otherwise
    pub key: String,
    pub default: Option<String>,
    /// Identity/generated designation, empty otherwise
    pub extra: String,
}

/// Convenience wrapper for interactions with a PostgreSQL server
pub struct PgEngine {
    config: PgConfig,
    /// Map of database name -> connection pool
    pools: RwLock<HashMap<String, Arc<PgPool>>>,
}

impl PgEngine {
    pub fn new(config: PgConfig) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            config,
            pools: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Pool for a database, created on first use. `None` targets the
    /// maintenance database.
    async fn pool(&self, database: Option<&str>) -> Result<Arc<PgPool>, StoreError> {
        let key = database
            .unwrap_or(self.config.maintenance_db_name())
            .to_string();
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(&key) {
                return Ok(Arc::clone(pool));
            }
        }
        let manager = PostgresConnectionManager::new_from_stringlike(
            self.config.connection_string(&key),
            NoTls,
        )
        .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| StoreError::PoolError(e.to_string()))?;
        let mut pools = self.pools.write().await;
        let pool = pools.entry(key).or_insert_with(|| Arc::new(pool));
        Ok(Arc::clone(pool))
    }

    /// Scoped connection checkout, released on drop.
    async fn conn(&self, database: Option<&str>) -> Result<PooledConn, StoreError> {
        let pool = self.pool(database).await?;
        pool.get_owned()
            .await
            .map_err(|e| StoreError::PoolError(e.to_string()))
    }

    // --- Server-level operations ---

    pub async fn db_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn(None).await?;
        let rows = conn
            .query(
                "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
                &[],
            )
            .await
            .map_err(StoreError::query)?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    pub async fn create_database(&self, name: &str) -> Result<(), StoreError> {
        let conn = self.conn(None).await?;
        conn.batch_execute(&format!("CREATE DATABASE {}", name))
            .await
            .map_err(StoreError::query)?;
        Ok(())
    }

    /// Drop a database if it exists. Any pool held for it is released first so
    /// its connections do not block the drop.
    pub async fn drop_database(&self, name: &str) -> Result<(), StoreError> {
        {
            let mut pools = self.pools.write().await;
            pools.remove(name);
        }
        let conn = self.conn(None).await?;
        conn.batch_execute(&format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", name))
            .await
            .map_err(StoreError::query)?;
        Ok(())
    }

    /// Create a fresh database and apply a DDL script to it wholesale.
    pub async fn create_db_from_sql_file(
        &self,
        database: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        let ddl = tokio::fs::read_to_string(path).await?;
        self.create_database(database).await?;
        let conn = self.conn(Some(database)).await?;
        conn.batch_execute(&ddl).await.map_err(StoreError::query)?;
        debug!(
            "applied schema file {} to database {}",
            path.display(),
            database
        );
        Ok(())
    }

    // --- Schema inspection ---

    /// Column metadata for a table: name, type, nullability, key designation,
    /// default, and identity info, in ordinal order.
    pub async fn describe_table(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescription>, StoreError> {
        let conn = self.conn(Some(database)).await?;
        let primary = primary_key_columns(&conn, table).await?;
        let rows = conn
            .query(
                "SELECT column_name, data_type, character_maximum_length, is_nullable, \
                        column_default, is_identity \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await
            .map_err(StoreError::query)?;
        let columns = rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let mut data_type: String = row.get(1);
                if let Some(len) = row.get::<_, Option<i32>>(2) {
                    data_type = format!("{}({})", data_type, len);
                }
                let is_nullable: String = row.get(3);
                let key = if primary.iter().any(|c| c == &name) {
                    "PRI".to_string()
                } else {
                    String::new()
                };
                let is_identity: String = row.get(5);
                ColumnDescription {
                    name,
                    data_type,
                    is_nullable: is_nullable == "YES",
                    key,
                    default: row.get(4),
                    extra: if is_identity == "YES" {
                        "identity".to_string()
                    } else {
                        String::new()
                    },
                }
            })
            .collect();
        Ok(columns)
    }

    /// Primary-key column names for a table, in key order.
    pub async fn primary_keys(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn(Some(database)).await?;
        primary_key_columns(&conn, table).await
    }

    // --- Selects ---

    /// Run a query and return the raw rows as cell tuples.
    pub async fn select_rows(
        &self,
        database: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Vec<CellValue>>, StoreError> {
        let conn = self.conn(Some(database)).await?;
        let rows = conn.query(sql, params).await.map_err(StoreError::query)?;
        Ok(rows.iter().map(row_to_cells).collect())
    }

    /// Run a query and return one in-memory table.
    pub async fn select_table(
        &self,
        database: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<RecordBatch, StoreError> {
        let conn = self.conn(Some(database)).await?;
        let rows = conn.query(sql, params).await.map_err(StoreError::query)?;
        Ok(batch_from_rows(&rows))
    }

    /// Run a query and return a lazy sequence of bounded tabular batches, same
    /// discipline as the document-store scan: at most
    /// [`FIND_MANY_MAX_COUNT`] rows per batch, single-pass, cursor order.
    pub async fn select_batches(
        &self,
        database: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<RowBatches, StoreError> {
        let conn = self.conn(Some(database)).await?;
        let stream = conn
            .query_raw(sql, slice_iter(params))
            .await
            .map_err(StoreError::query)?;
        Ok(RowBatches {
            _conn: conn,
            rows: Box::pin(stream),
            done: false,
        })
    }

    /// Simplified-filter SELECT over one table.
    pub async fn select_filtered(
        &self,
        database: &str,
        table: &str,
        filter: &[(String, SqlPredicate)],
        columns: Option<&[&str]>,
    ) -> Result<RecordBatch, StoreError> {
        let cols = columns.map_or_else(|| "*".to_string(), |c| c.join(", "));
        let (clause, params) = where_clause(filter, 1);
        let sql = if clause.is_empty() {
            format!("SELECT {} FROM {}", cols, table)
        } else {
            format!("SELECT {} FROM {} WHERE {}", cols, table, clause)
        };
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.select_table(database, &sql, &param_refs).await
    }

    // --- Joined selects ---

    pub async fn select_join_rows(
        &self,
        database: &str,
        spec: &JoinSpec,
    ) -> Result<Vec<Vec<CellValue>>, StoreError> {
        self.select_rows(database, &spec.to_sql(), &[]).await
    }

    pub async fn select_join_table(
        &self,
        database: &str,
        spec: &JoinSpec,
    ) -> Result<RecordBatch, StoreError> {
        self.select_table(database, &spec.to_sql(), &[]).await
    }

    pub async fn select_join_batches(
        &self,
        database: &str,
        spec: &JoinSpec,
    ) -> Result<RowBatches, StoreError> {
        self.select_batches(database, &spec.to_sql(), &[]).await
    }

    // --- Writes ---

    /// Execute one parameterised statement per value row, reusing a single
    /// prepared statement. Returns the total affected-row count.
    pub async fn execute_many(
        &self,
        database: &str,
        sql: &str,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, StoreError> {
        let conn = self.conn(Some(database)).await?;
        let stmt = conn.prepare(sql).await.map_err(StoreError::query)?;
        let mut affected = 0;
        for row in rows {
            let params: Vec<&(dyn ToSql + Sync)> =
                row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            affected += conn
                .execute(&stmt, &params)
                .await
                .map_err(StoreError::query)?;
        }
        Ok(affected)
    }

    /// Insert pre-shaped value rows with a caller-built INSERT statement.
    pub async fn insert_rows(
        &self,
        database: &str,
        sql: &str,
        rows: &[Vec<CellValue>],
    ) -> Result<u64, StoreError> {
        let inserted = self.execute_many(database, sql, rows).await?;
        debug!("inserted {} rows into {}", inserted, database);
        Ok(inserted)
    }

    /// Execute a single statement and return the affected-row count.
    pub async fn execute(
        &self,
        database: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        let conn = self.conn(Some(database)).await?;
        conn.execute(sql, params).await.map_err(StoreError::query)
    }
}

async fn primary_key_columns(
    conn: &PooledConn,
    table: &str,
) -> Result<Vec<String>, StoreError> {
    let rows = conn
        .query(
            "SELECT kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = 'public' \
               AND tc.table_name = $1 \
             ORDER BY kcu.ordinal_position",
            &[&table],
        )
        .await
        .map_err(StoreError::query)?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// Lazy, single-pass sequence of tabular batches over a row stream. Holds its
/// pooled connection until dropped.
pub struct RowBatches {
    _conn: PooledConn,
    rows: Pin<Box<RowStream>>,
    done: bool,
}

#[async_trait::async_trait]
impl BatchSource for RowBatches {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, StoreError> {
        if self.done {
            return Ok(None);
        }
        let rows = next_chunk(&mut self.rows, FIND_MANY_MAX_COUNT)
            .await
            .map_err(StoreError::query)?;
        if rows.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(batch_from_rows(&rows)))
    }
}

/// Tabulate driver rows; column names come from the first row's metadata.
pub(crate) fn batch_from_rows(rows: &[Row]) -> RecordBatch {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let cells = rows.iter().map(row_to_cells).collect();
    RecordBatch::from_parts(columns, cells)
}

pub(crate) fn row_to_cells(row: &Row) -> Vec<CellValue> {
    (0..row.columns().len())
        .map(|idx| cell_from_row(row, idx))
        .collect()
}

/// Convert one column of a driver row to a cell
fn cell_from_row(row: &Row, idx: usize) -> CellValue {
    let ty = row.columns()[idx].type_().clone();
    match ty.name() {
        "bool" => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(i64::from(v)))
            .unwrap_or(CellValue::Null),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(i64::from(v)))
            .unwrap_or(CellValue::Null),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float(f64::from(v)))
            .unwrap_or(CellValue::Null),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        "text" | "varchar" | "bpchar" | "name" => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::DateTime(v.naive_utc()))
            .unwrap_or(CellValue::Null),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Binary)
            .unwrap_or(CellValue::Null),
        // fall back to text retrieval for anything else
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_building() {
        let mut config = PgConfig::new("localhost", "testuser", "testpass");
        config.port = Some(5433);
        let conn_string = config.connection_string("testdb");
        assert!(conn_string.contains("host=localhost"));
        assert!(conn_string.contains("port=5433"));
        assert!(conn_string.contains("user=testuser"));
        assert!(conn_string.contains("password=testpass"));
        assert!(conn_string.contains("dbname=testdb"));
    }

    #[test]
    fn port_defaults_when_unset() {
        let config = PgConfig::new("localhost", "u", "p");
        assert_eq!(config.get_port(), 5432);
        assert!(config.connection_string("db").contains("port=5432"));
    }

    #[test]
    fn maintenance_db_defaults_to_postgres() {
        let mut config = PgConfig::new("localhost", "u", "p");
        assert_eq!(config.maintenance_db_name(), "postgres");
        config.maintenance_db = Some("template1".to_string());
        assert_eq!(config.maintenance_db_name(), "template1");
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let config = PgConfig::new("", "u", "p");
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
        let config = PgConfig::new("localhost", "", "p");
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
        let config = PgConfig::new("localhost", "u", "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn password_is_not_serialized() {
        let config = PgConfig::new("localhost", "u", "secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
