use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hashlake_bucket::{ObjectStoreConfig, S3BucketStore};
use hashlake_core::config::PipelineConfig;
use hashlake_core::enrich::Enricher;
use hashlake_core::error::FlowError;
use hashlake_core::extract::HttpFeedSource;
use hashlake_core::flows;
use hashlake_core::warehouse::PostgresWarehouse;

/// Environment variable naming the feed search endpoint.
const FEED_URL_VAR: &str = "HASHLAKE_FEED_URL";

#[derive(Parser, Debug)]
#[command(author, version, about = "Hashtag ETL: feed to data lake to warehouse", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, default_value = "hashlake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest flow: scrape the feed, stage locally, validate the schema,
    /// publish the artifact to the data-lake bucket
    #[command(name = "web-to-gcs")]
    WebToGcs,
    /// Enrich-and-load flow: fetch the staged artifact, annotate the rows,
    /// append them to the warehouse table
    #[command(name = "gcs-to-bq")]
    GcsToBq,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = PipelineConfig::load(&cli.config).map_err(FlowError::config)?;
    let stage_root = Path::new(".");

    match cli.command {
        Command::WebToGcs => {
            let source = feed_source()?;
            let bucket = bucket_store(&config).await?;
            let summary = flows::ingest(&config, &source, &bucket, stage_root, Utc::now()).await?;
            info!(
                run_id = %summary.run_id,
                rows = summary.rows_staged,
                key = %summary.remote_key,
                hash = %summary.artifact_hash,
                "ingest finished"
            );
        }
        Command::GcsToBq => {
            let bucket = bucket_store(&config).await?;
            let warehouse = warehouse(&config).await?;
            let enricher = Enricher::with_defaults();
            let summary =
                flows::enrich_and_load(&config, &bucket, &enricher, &warehouse, stage_root).await?;
            info!(
                run_id = %summary.run_id,
                rows = summary.rows_loaded,
                rows_failed = summary.rows_failed,
                batches = summary.batches,
                "load finished"
            );
        }
    }

    Ok(())
}

fn feed_source() -> Result<HttpFeedSource> {
    let base_url = std::env::var(FEED_URL_VAR)
        .with_context(|| format!("{FEED_URL_VAR} must point at the feed search endpoint"))?;
    Ok(HttpFeedSource::new(base_url))
}

async fn bucket_store(config: &PipelineConfig) -> Result<S3BucketStore> {
    let store_config =
        ObjectStoreConfig::from_handle(config.data_lake_bucket.clone(), &config.gcs_bucket_block_name)
            .context("failed to resolve object-store credentials")?;
    S3BucketStore::new(store_config)
        .await
        .context("failed to construct object-store client")
}

async fn warehouse(config: &PipelineConfig) -> Result<PostgresWarehouse> {
    let dsn = std::env::var(&config.gcp_credentials).with_context(|| {
        format!(
            "credential handle {} is not set in the environment",
            config.gcp_credentials
        )
    })?;
    PostgresWarehouse::connect(&dsn)
        .await
        .context("failed to connect to the warehouse")
}
