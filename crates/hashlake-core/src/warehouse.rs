//! Warehouse loading: batched row appends into the analytical destination
//! table, behind a capability trait so the concrete backend can be swapped.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::info;

use crate::model::{CanonicalRow, EnrichedRow, CANONICAL_COLUMNS, ENRICHED_COLUMNS};

/// Upper bound on rows per committed batch.
pub const MAX_BATCH_ROWS: usize = 500_000;

// Postgres caps bind parameters per statement at 65535, so batches are
// flushed through smaller multi-row INSERT statements.
const INSERT_CHUNK_ROWS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteMode {
    /// Accumulate onto the existing table contents.
    Append,
    /// Truncate, then write; applied atomically with the inserts.
    Replace,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Replace => "replace",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination table, addressed as `dataset.table`. Identifier safety is
/// enforced at configuration resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("warehouse connection failed: {0}")]
    Connection(String),
    #[error("failed to truncate {destination}: {message}")]
    Truncate {
        destination: String,
        message: String,
    },
    #[error(
        "write to {destination} failed at batch {batch_index} after {rows_flushed} rows flushed: {message}"
    )]
    Batch {
        destination: String,
        batch_index: usize,
        rows_flushed: usize,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub rows_written: usize,
    pub batches: usize,
    pub mode: WriteMode,
}

/// Capability interface over the analytical destination.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn write_enriched(
        &self,
        destination: &TableRef,
        rows: &[EnrichedRow],
        mode: WriteMode,
        batch_size: usize,
    ) -> Result<LoadReport, LoadError>;

    async fn write_canonical(
        &self,
        destination: &TableRef,
        rows: &[CanonicalRow],
        mode: WriteMode,
        batch_size: usize,
    ) -> Result<LoadReport, LoadError>;
}

/// Clamps the requested batch size to `1..=MAX_BATCH_ROWS`.
pub fn effective_batch_size(requested: usize) -> usize {
    requested.clamp(1, MAX_BATCH_ROWS)
}

/// Postgres-backed warehouse. Append mode commits batch-by-batch, so a
/// failure reports how many rows were already flushed and a rerun can
/// resume with the unflushed remainder. Replace mode runs truncate plus all
/// inserts in one transaction and is retried wholesale.
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(dsn: &str) -> Result<Self, LoadError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(dsn)
            .await
            .map_err(|err| LoadError::Connection(err.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn write_batches<R>(
        &self,
        destination: &TableRef,
        rows: &[R],
        mode: WriteMode,
        batch_size: usize,
        insert_columns: &str,
        push_row: impl Fn(&mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>, &R),
    ) -> Result<LoadReport, LoadError> {
        let batch_size = effective_batch_size(batch_size);
        let insert_prefix = format!(
            "INSERT INTO {} ({insert_columns}) ",
            destination.qualified()
        );

        match mode {
            WriteMode::Replace => {
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|err| LoadError::Connection(err.to_string()))?;

                sqlx::query(&format!("TRUNCATE TABLE {}", destination.qualified()))
                    .execute(tx.as_mut())
                    .await
                    .map_err(|err| LoadError::Truncate {
                        destination: destination.to_string(),
                        message: err.to_string(),
                    })?;

                for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
                    let mut builder = QueryBuilder::<Postgres>::new(insert_prefix.as_str());
                    builder.push_values(chunk, |mut separated, row| push_row(&mut separated, row));
                    builder
                        .build()
                        .execute(tx.as_mut())
                        .await
                        .map_err(|err| LoadError::Batch {
                            destination: destination.to_string(),
                            batch_index: 0,
                            rows_flushed: 0,
                            message: err.to_string(),
                        })?;
                }

                tx.commit()
                    .await
                    .map_err(|err| LoadError::Connection(err.to_string()))?;

                info!(destination = %destination, rows = rows.len(), mode = %mode, "warehouse load complete");
                Ok(LoadReport {
                    rows_written: rows.len(),
                    batches: 1,
                    mode,
                })
            }
            WriteMode::Append => {
                let mut rows_flushed = 0usize;
                let mut batches = 0usize;

                for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
                    let mut tx = self
                        .pool
                        .begin()
                        .await
                        .map_err(|err| LoadError::Connection(err.to_string()))?;

                    for chunk in batch.chunks(INSERT_CHUNK_ROWS) {
                        let mut builder = QueryBuilder::<Postgres>::new(insert_prefix.as_str());
                        builder
                            .push_values(chunk, |mut separated, row| push_row(&mut separated, row));
                        builder
                            .build()
                            .execute(tx.as_mut())
                            .await
                            .map_err(|err| LoadError::Batch {
                                destination: destination.to_string(),
                                batch_index,
                                rows_flushed,
                                message: err.to_string(),
                            })?;
                    }

                    tx.commit().await.map_err(|err| LoadError::Batch {
                        destination: destination.to_string(),
                        batch_index,
                        rows_flushed,
                        message: err.to_string(),
                    })?;

                    rows_flushed += batch.len();
                    batches += 1;
                    info!(
                        destination = %destination,
                        batch = batch_index,
                        rows_flushed,
                        "warehouse batch committed"
                    );
                }

                Ok(LoadReport {
                    rows_written: rows_flushed,
                    batches,
                    mode,
                })
            }
        }
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn write_enriched(
        &self,
        destination: &TableRef,
        rows: &[EnrichedRow],
        mode: WriteMode,
        batch_size: usize,
    ) -> Result<LoadReport, LoadError> {
        self.write_batches(
            destination,
            rows,
            mode,
            batch_size,
            &ENRICHED_COLUMNS.join(", "),
            |separated, row| {
                separated
                    .push_bind(row.row.username.clone())
                    .push_bind(row.row.created_utc)
                    .push_bind(row.row.likes)
                    .push_bind(row.row.retweets)
                    .push_bind(row.row.replies)
                    .push_bind(row.row.source.clone())
                    .push_bind(row.row.content.clone())
                    .push_bind(row.row.url.clone())
                    .push_bind(row.tweet.clone())
                    .push_bind(row.topic.clone())
                    .push_bind(row.topic_confidence)
                    .push_bind(row.product.clone())
                    .push_bind(row.corporation.clone());
            },
        )
        .await
    }

    async fn write_canonical(
        &self,
        destination: &TableRef,
        rows: &[CanonicalRow],
        mode: WriteMode,
        batch_size: usize,
    ) -> Result<LoadReport, LoadError> {
        self.write_batches(
            destination,
            rows,
            mode,
            batch_size,
            &CANONICAL_COLUMNS.join(", "),
            |separated, row| {
                separated
                    .push_bind(row.username.clone())
                    .push_bind(row.created_utc)
                    .push_bind(row.likes)
                    .push_bind(row.retweets)
                    .push_bind(row.replies)
                    .push_bind(row.source.clone())
                    .push_bind(row.content.clone())
                    .push_bind(row.url.clone());
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ref_renders_dataset_dot_table() {
        let table = TableRef::new("social", "hashtag_posts");
        assert_eq!(table.to_string(), "social.hashtag_posts");
        assert_eq!(table.qualified(), "\"social\".\"hashtag_posts\"");
    }

    #[test]
    fn write_modes_render_lowercase() {
        assert_eq!(WriteMode::Append.as_str(), "append");
        assert_eq!(WriteMode::Replace.as_str(), "replace");
    }

    #[test]
    fn batch_size_is_clamped_to_bounds() {
        assert_eq!(effective_batch_size(0), 1);
        assert_eq!(effective_batch_size(200), 200);
        assert_eq!(effective_batch_size(MAX_BATCH_ROWS + 1), MAX_BATCH_ROWS);
    }
}
