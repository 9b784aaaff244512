//! Postgres record store over a JSONB `image` column.

use super::RecordStore;
use crate::config::{is_valid_table_name, DatabaseConfig};
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::pipeline::digest::Digest;
use crate::types::WorkItem;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Open the shared connection pool.
pub async fn connect_pool(config: &DatabaseConfig, url: &str) -> PipelineResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect(url)
        .await
        .map_err(|e| PipelineError::Connection {
            service: "postgres".to_string(),
            message: e.to_string(),
        })
}

/// One table whose rows carry `image = { url, id?, ext? }`.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    table: String,
    pending_sql: String,
    commit_sql: String,
}

impl PgRecordStore {
    /// Bind a table to the pool, reading the declared type of its `id`
    /// column so commits compare on the native type and can use its index.
    pub async fn connect(pool: PgPool, table: impl Into<String>) -> PipelineResult<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(PipelineError::Query {
                message: format!("invalid table name: {table:?}"),
                table,
            });
        }

        let id_type: Option<String> = sqlx::query_scalar(ID_TYPE_SQL)
            .bind(&table)
            .fetch_optional(&pool)
            .await
            .map_err(|e| query_error(&table, e))?;
        let id_type = id_type.ok_or_else(|| PipelineError::Query {
            table: table.clone(),
            message: "table has no id column".to_string(),
        })?;

        tracing::debug!(table = %table, id_type = %id_type, "Resolved record id type");
        Self::new(pool, table.clone(), &id_type).map_err(|e| PipelineError::Query {
            table,
            message: e.to_string(),
        })
    }

    /// Bind a table whose `id` column has the SQL type `id_type`. Both names
    /// are interpolated into SQL, so they are checked first.
    pub fn new(
        pool: PgPool,
        table: impl Into<String>,
        id_type: &str,
    ) -> Result<Self, ConfigError> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(ConfigError::ValidationError(format!(
                "invalid table name: {table:?}"
            )));
        }
        if !is_valid_type_name(id_type) {
            return Err(ConfigError::ValidationError(format!(
                "unsupported id column type: {id_type:?}"
            )));
        }
        let pending_sql = format!(
            "SELECT id::text, image->>'url' FROM \"{table}\" \
             WHERE image->'ext' IS NULL AND image->'url' IS NOT NULL"
        );
        let commit_sql = format!(
            "UPDATE \"{table}\" \
             SET image = image || jsonb_build_object('id', $1::text, 'ext', $2::text) \
             WHERE id = $3::text::{id_type}"
        );
        Ok(Self {
            pool,
            table,
            pending_sql,
            commit_sql,
        })
    }
}

const ID_TYPE_SQL: &str = "SELECT format_type(atttypid, atttypmod) FROM pg_attribute \
     WHERE attrelid = $1::regclass AND attname = 'id' AND NOT attisdropped";

/// Type names as rendered by `format_type`, e.g. `bigint` or
/// `character varying(64)`.
fn is_valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','))
}

fn query_error(table: &str, err: sqlx::Error) -> PipelineError {
    if is_connection_error(&err) {
        connection_error(err)
    } else {
        PipelineError::Query {
            table: table.to_string(),
            message: err.to_string(),
        }
    }
}

/// Pool and transport failures mean the database is gone, not that one
/// statement was bad.
fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
    )
}

fn connection_error(err: sqlx::Error) -> PipelineError {
    PipelineError::Connection {
        service: "postgres".to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    fn name(&self) -> &str {
        &self.table
    }

    async fn pending(&self) -> PipelineResult<Vec<WorkItem>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(&self.pending_sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error(&self.table, e))?;

        // A JSON `null` url passes `IS NOT NULL` but extracts as SQL NULL
        let items: Vec<WorkItem> = rows
            .into_iter()
            .filter_map(|(id, url)| match url {
                Some(url) if !url.trim().is_empty() => Some(WorkItem::new(id, url)),
                _ => None,
            })
            .collect();

        tracing::debug!(table = %self.table, count = items.len(), "Loaded pending records");
        Ok(items)
    }

    async fn commit(&self, id: &str, digest: &Digest, extension: &str) -> PipelineResult<()> {
        let result = sqlx::query(&self.commit_sql)
            .bind(digest.as_str())
            .bind(extension)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_connection_error(&e) {
                    connection_error(e)
                } else {
                    PipelineError::Commit {
                        id: id.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Commit {
                id: id.to_string(),
                message: format!("no row with this id in {}", self.table),
            });
        }
        Ok(())
    }
}
