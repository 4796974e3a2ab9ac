//! The two pipeline flows. Stages run strictly in order, one at a time;
//! every stage fully materializes its output before the next starts, and a
//! failure is reported with the stage it occurred in. Concurrent runs must
//! target disjoint `bucket_filename`s, since staged artifacts are addressed
//! purely by filename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hashlake_bucket::BucketStore;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::clean;
use crate::config::PipelineConfig;
use crate::enrich::Enricher;
use crate::error::{FlowError, FlowStage};
use crate::extract::{self, FeedQuery, FeedSource, DEFAULT_WINDOW_DAYS};
use crate::model::CANONICAL_COLUMNS;
use crate::schema;
use crate::stage::{self, LocalStage};
use crate::warehouse::{Warehouse, WriteMode, MAX_BATCH_ROWS};

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub query: String,
    pub rows_extracted: usize,
    pub rows_staged: usize,
    pub artifact_path: PathBuf,
    pub artifact_hash: String,
    pub remote_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub run_id: Uuid,
    pub remote_key: String,
    pub rows_fetched: usize,
    pub rows_enriched: usize,
    pub rows_failed: usize,
    pub rows_loaded: usize,
    pub batches: usize,
}

/// Ingest flow: Extract → Clean → StageLocal → ValidateSchema → StageRemote.
///
/// The schema gate runs against the persisted artifact before anything is
/// published; on mismatch the flow halts with the local artifact left on
/// disk for inspection.
pub async fn ingest(
    config: &PipelineConfig,
    source: &dyn FeedSource,
    bucket: &dyn BucketStore,
    stage_root: &Path,
    now: DateTime<Utc>,
) -> Result<IngestSummary, FlowError> {
    let run_id = Uuid::new_v4();
    let query = FeedQuery::trailing_days(&config.hashtag, DEFAULT_WINDOW_DAYS, now);
    info!(%run_id, query = %query, limit = config.limit, "ingest flow starting");

    let records = extract::extract(source, &query, config.limit)
        .await
        .map_err(|err| FlowError::new(FlowStage::Extract, err))?;
    let rows_extracted = records.len();

    let rows = clean::canonicalize(&records);
    if let Some((earliest, latest)) = clean::time_span(&rows) {
        info!(%earliest, %latest, rows = rows.len(), "dataset cleaned");
    }

    let local = LocalStage::new(stage_root);
    let artifact_path = local
        .write(&rows, &config.bucket_filename)
        .map_err(|err| FlowError::new(FlowStage::StageLocal, err))?;

    schema::validate_artifact(&artifact_path, &CANONICAL_COLUMNS)
        .map_err(|err| FlowError::new(FlowStage::ValidateSchema, err))?;

    let remote_key = LocalStage::object_key(&config.bucket_filename);
    stage::upload(bucket, &artifact_path, &remote_key)
        .await
        .map_err(|err| FlowError::new(FlowStage::StageRemote, err))?;

    let artifact_hash = stage::artifact_hash(&artifact_path)
        .map_err(|err| FlowError::new(FlowStage::StageLocal, err))?;

    let summary = IngestSummary {
        run_id,
        query: query.to_string(),
        rows_extracted,
        rows_staged: rows.len(),
        artifact_path,
        artifact_hash,
        remote_key,
    };
    info!(%run_id, rows = summary.rows_staged, key = %summary.remote_key, "ingest flow complete");
    Ok(summary)
}

/// Enrich-and-load flow: FetchStaged → Clean/Enrich → Load.
///
/// Loads in append mode: the destination table accumulates across runs.
pub async fn enrich_and_load(
    config: &PipelineConfig,
    bucket: &dyn BucketStore,
    enricher: &Enricher,
    warehouse: &dyn Warehouse,
    stage_root: &Path,
) -> Result<LoadSummary, FlowError> {
    let run_id = Uuid::new_v4();
    let remote_key = LocalStage::object_key(&config.bucket_filename);
    info!(%run_id, key = %remote_key, "enrich-and-load flow starting");

    let local_path = stage::download(bucket, &remote_key, stage_root)
        .await
        .map_err(|err| FlowError::new(FlowStage::FetchStaged, err))?;

    let local = LocalStage::new(stage_root);
    let rows = local
        .read(&local_path)
        .map_err(|err| FlowError::new(FlowStage::FetchStaged, err))?;
    let rows_fetched = rows.len();

    let output = enricher
        .enrich(&rows)
        .map_err(|err| FlowError::new(FlowStage::Enrich, err))?;
    info!(
        %run_id,
        rows = output.rows.len(),
        rows_failed = output.rows_failed,
        "enrichment complete"
    );

    let destination = config.destination();
    let report = warehouse
        .write_enriched(&destination, &output.rows, WriteMode::Append, MAX_BATCH_ROWS)
        .await
        .map_err(|err| FlowError::new(FlowStage::Load, err))?;

    let summary = LoadSummary {
        run_id,
        remote_key,
        rows_fetched,
        rows_enriched: output.rows.len(),
        rows_failed: output.rows_failed,
        rows_loaded: report.rows_written,
        batches: report.batches,
    };
    info!(
        %run_id,
        destination = %destination,
        rows = summary.rows_loaded,
        batches = summary.batches,
        "enrich-and-load flow complete"
    );
    Ok(summary)
}
