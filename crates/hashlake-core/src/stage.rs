//! Durable intermediate storage for the canonical dataset: a compressed
//! Parquet file at a deterministic path, mirrored to the object store under
//! the same relative key.

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use hashlake_bucket::{BucketError, BucketStore};
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::model::{self, CanonicalRow, ModelError};

const PARQUET_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum StageError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("row conversion failed: {0}")]
    Model(#[from] ModelError),
    #[error("object store operation failed: {0}")]
    Bucket(#[from] BucketError),
}

/// Local staging area rooted at a directory. Artifact paths derive purely
/// from the configured filename, never from content, and writes overwrite
/// in place, so re-running a failed flow cannot duplicate artifacts.
#[derive(Debug, Clone)]
pub struct LocalStage {
    root: PathBuf,
}

impl LocalStage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Deterministic artifact path: `<root>/data/<filename>.parquet`.
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(Self::object_key(filename))
    }

    /// Remote object key mirroring the local relative path.
    pub fn object_key(filename: &str) -> String {
        format!("data/{filename}.parquet")
    }

    /// Persists the rows as a gzip-compressed Parquet artifact, creating
    /// parent directories as needed.
    pub fn write(&self, rows: &[CanonicalRow], filename: &str) -> Result<PathBuf, StageError> {
        let path = self.path_for(filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut df = model::canonical_to_dataframe(rows)?;
        let file = File::create(&path)?;
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Gzip(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut df)?;

        info!(path = %path.display(), rows = rows.len(), "staged artifact written");
        Ok(path)
    }

    /// Reads an artifact back into canonical rows. The Parquet round-trip
    /// preserves column names, order and types exactly.
    pub fn read(&self, path: &Path) -> Result<Vec<CanonicalRow>, StageError> {
        let file = File::open(path)?;
        let df = ParquetReader::new(file).finish()?;
        Ok(model::dataframe_to_canonical(&df)?)
    }
}

/// Copies a local artifact to the object store under `key`.
pub async fn upload(
    bucket: &dyn BucketStore,
    local_path: &Path,
    key: &str,
) -> Result<(), StageError> {
    let contents = tokio::fs::read(local_path).await?;
    bucket
        .put_object(key, Bytes::from(contents), PARQUET_CONTENT_TYPE)
        .await?;
    info!(key, "artifact uploaded to object store");
    Ok(())
}

/// Retrieves a remote artifact to `<local_root>/<key>`, creating parent
/// directories, and returns the local path.
pub async fn download(
    bucket: &dyn BucketStore,
    key: &str,
    local_root: &Path,
) -> Result<PathBuf, StageError> {
    let bytes = bucket.get_object(key).await?;
    let path = local_root.join(key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &bytes).await?;
    info!(key, path = %path.display(), "artifact fetched from object store");
    Ok(path)
}

/// Content hash of a staged artifact, recorded in flow summaries so a
/// published dataset can be tied back to the exact bytes that were staged.
pub fn artifact_hash(path: &Path) -> Result<String, StageError> {
    let contents = std::fs::read(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&contents);
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CANONICAL_COLUMNS;
    use crate::schema;
    use chrono::{TimeZone as _, Utc};

    fn sample_rows(count: usize) -> Vec<CanonicalRow> {
        (0..count)
            .map(|idx| CanonicalRow {
                username: format!("user_{idx}"),
                created_utc: Utc.with_ymd_and_hms(2023, 7, 1, 8, 0, idx as u32).unwrap(),
                likes: idx as i32,
                retweets: 1,
                replies: 0,
                source: "Web App".to_string(),
                content: format!("post number {idx}"),
                url: format!("https://example.com/u/{idx}"),
            })
            .collect()
    }

    #[test]
    fn write_uses_deterministic_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stage = LocalStage::new(dir.path());
        let path = stage.write(&sample_rows(3), "test").expect("write");
        assert_eq!(path, dir.path().join("data/test.parquet"));
        assert!(path.is_file());
    }

    #[test]
    fn round_trip_preserves_rows_and_contract() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stage = LocalStage::new(dir.path());
        let rows = sample_rows(5);
        let path = stage.write(&rows, "roundtrip").expect("write");

        schema::validate_artifact(&path, &CANONICAL_COLUMNS).expect("contract holds");
        let recovered = stage.read(&path).expect("read");
        assert_eq!(recovered, rows);
    }

    #[test]
    fn rewrite_overwrites_rather_than_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stage = LocalStage::new(dir.path());
        stage.write(&sample_rows(10), "again").expect("first write");
        let path = stage.write(&sample_rows(4), "again").expect("second write");

        let recovered = stage.read(&path).expect("read");
        assert_eq!(recovered.len(), 4);
    }

    #[test]
    fn object_key_mirrors_local_relative_path() {
        assert_eq!(LocalStage::object_key("tweets"), "data/tweets.parquet");
    }

    #[test]
    fn artifact_hash_is_stable_per_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stage = LocalStage::new(dir.path());
        let rows = sample_rows(2);
        let path = stage.write(&rows, "hash").expect("write");
        let first = artifact_hash(&path).expect("hash");
        let second = artifact_hash(&path).expect("hash");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }
}
