//! SQLite-backed durable record store
//!
//! One append-only table shared by every owner. Writes for different owners
//! or dataset types never touch the same rows; SQLite's write lock serializes
//! concurrent appends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rtds_common::DatasetKey;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{RecordPage, RecordStore, StoreStats};
use crate::error::StoreError;
use crate::types::StoredRecord;

/// Rows per INSERT statement (9 bound parameters each)
const INSERT_BATCH_ROWS: usize = 100;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable record store
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database at `url` and run migrations
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = if in_memory {
            // Every connection to :memory: is a separate database
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        info!(url, "Connected to durable store");
        Self::from_pool(pool).await
    }

    /// Private in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Fatal(format!("Migration failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredRecord, StoreError> {
    let job_id: String = row.try_get("job_id")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;
    let record_index: i64 = row.try_get("record_index")?;
    let value: String = row.try_get("value")?;
    let metadata: String = row.try_get("metadata")?;
    let created_at_ms: i64 = row.try_get("created_at_ms")?;

    Ok(StoredRecord {
        job_id: Uuid::parse_str(&job_id)
            .map_err(|e| StoreError::Fatal(format!("corrupt job id '{}': {}", job_id, e)))?,
        chunk_index: chunk_index as u64,
        record_index: record_index as u32,
        fingerprint: row.try_get("fingerprint")?,
        value: serde_json::from_str(&value)?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: millis_to_datetime(created_at_ms)?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Fatal(format!("timestamp out of range: {}", ms)))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, key: &DatasetKey, records: &[StoredRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for batch in records.chunks(INSERT_BATCH_ROWS) {
            let encoded = batch
                .iter()
                .map(|r| {
                    Ok((
                        serde_json::to_string(&r.value)?,
                        serde_json::to_string(&r.metadata)?,
                    ))
                })
                .collect::<Result<Vec<_>, serde_json::Error>>()?;

            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO dataset_records \
                 (owner_id, dataset_type, job_id, chunk_index, record_index, fingerprint, value, metadata, created_at_ms) ",
            );
            builder.push_values(batch.iter().zip(encoded), |mut row, (record, (value, metadata))| {
                row.push_bind(key.owner.as_str())
                    .push_bind(key.dataset_type.as_str())
                    .push_bind(record.job_id.to_string())
                    .push_bind(record.chunk_index as i64)
                    .push_bind(record.record_index as i64)
                    .push_bind(record.fingerprint.as_str())
                    .push_bind(value)
                    .push_bind(metadata)
                    .push_bind(record.created_at.timestamp_millis());
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(key = %key, rows = records.len(), "Appended records to durable store");
        Ok(records.len())
    }

    async fn page(
        &self,
        key: &DatasetKey,
        offset: u64,
        limit: u64,
    ) -> Result<RecordPage, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, chunk_index, record_index, fingerprint, value, metadata, created_at_ms
            FROM dataset_records
            WHERE id IN (
                SELECT MIN(id) FROM dataset_records
                WHERE owner_id = ?1 AND dataset_type = ?2
                GROUP BY job_id, chunk_index, record_index, fingerprint
            )
            ORDER BY id
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(key.owner.as_str())
        .bind(key.dataset_type.as_str())
        .bind(limit.min(i64::MAX as u64) as i64)
        .bind(offset.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await?;

        let records = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        let total = self.stats(key).await?.total_records;

        Ok(RecordPage {
            records,
            offset,
            total,
        })
    }

    async fn stats(&self, key: &DatasetKey) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, MAX(last_ms) AS last_updated_ms
            FROM (
                SELECT MAX(created_at_ms) AS last_ms FROM dataset_records
                WHERE owner_id = ?1 AND dataset_type = ?2
                GROUP BY job_id, chunk_index, record_index, fingerprint
            )
            "#,
        )
        .bind(key.owner.as_str())
        .bind(key.dataset_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let last_updated_ms: Option<i64> = row.try_get("last_updated_ms")?;

        Ok(StoreStats {
            available: total > 0,
            total_records: total as u64,
            last_updated: last_updated_ms.map(millis_to_datetime).transpose()?,
        })
    }

    async fn delete_job(&self, key: &DatasetKey, job_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM dataset_records
            WHERE owner_id = ?1 AND dataset_type = ?2 AND job_id = ?3
            "#,
        )
        .bind(key.owner.as_str())
        .bind(key.dataset_type.as_str())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
