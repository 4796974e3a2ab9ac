use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::warehouse::TableRef;

/// Fallback result-count limit substituted when the configured value is
/// absent or not numeric. The substitution is logged, never silent.
pub const DEFAULT_LIMIT: usize = 15_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required configuration key: {0}")]
    MissingKey(&'static str),
    #[error("configuration key {key} is malformed: {message}")]
    Malformed { key: &'static str, message: String },
}

/// Immutable pipeline parameters, resolved once at flow start and passed
/// explicitly to every stage. No module-level singleton.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_id: String,
    pub data_lake_bucket: String,
    pub bucket_filename: String,
    pub bq_dataset: String,
    pub bq_table: String,
    /// Name of the environment variable holding the warehouse DSN.
    pub gcp_credentials: String,
    /// Environment-variable prefix under which object-store credentials resolve.
    pub gcs_bucket_block_name: String,
    pub hashtag: String,
    pub limit: usize,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    gcp: RawGcpSection,
    #[serde(default)]
    credentials: RawCredentialsSection,
    #[serde(default)]
    feed: RawFeedSection,
}

#[derive(Debug, Default, Deserialize)]
struct RawGcpSection {
    project_id: Option<String>,
    data_lake_bucket: Option<String>,
    bucket_filename: Option<String>,
    bq_dataset: Option<String>,
    bq_table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCredentialsSection {
    gcp_credentials: Option<String>,
    gcs_bucket_block_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFeedSection {
    hashtag: Option<String>,
    limit: Option<toml::Value>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents)?;
        Self::from_raw(raw)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let config = Self {
            project_id: require(raw.gcp.project_id, "project_id")?,
            data_lake_bucket: require(raw.gcp.data_lake_bucket, "data_lake_bucket")?,
            bucket_filename: require(raw.gcp.bucket_filename, "bucket_filename")?,
            bq_dataset: require_identifier(raw.gcp.bq_dataset, "bq_dataset")?,
            bq_table: require_identifier(raw.gcp.bq_table, "bq_table")?,
            gcp_credentials: require(raw.credentials.gcp_credentials, "gcp_credentials")?,
            gcs_bucket_block_name: require(
                raw.credentials.gcs_bucket_block_name,
                "gcs_bucket_block_name",
            )?,
            hashtag: require(raw.feed.hashtag, "hashtag")?,
            limit: resolve_limit(raw.feed.limit)?,
        };
        Ok(config)
    }

    /// Fully-qualified warehouse destination for this pipeline.
    pub fn destination(&self) -> TableRef {
        TableRef::new(&self.bq_dataset, &self.bq_table)
    }
}

fn require(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingKey(key)),
    }
}

/// Dataset and table names are interpolated into SQL identifiers, so they are
/// restricted to a safe charset at resolution time.
fn require_identifier(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    let value = require(value, key)?;
    let valid = value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !value.starts_with(|ch: char| ch.is_ascii_digit());
    if valid {
        Ok(value)
    } else {
        Err(ConfigError::Malformed {
            key,
            message: format!("'{value}' is not a valid identifier"),
        })
    }
}

fn resolve_limit(value: Option<toml::Value>) -> Result<usize, ConfigError> {
    let fallback = |found: &dyn std::fmt::Debug| {
        warn!(
            ?found,
            default = DEFAULT_LIMIT,
            "limit is absent or not a positive integer; substituting default"
        );
        DEFAULT_LIMIT
    };

    let limit = match value {
        Some(toml::Value::Integer(value)) if value > 0 => value as usize,
        Some(toml::Value::String(ref text)) => match text.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => fallback(&text),
        },
        Some(ref other) => fallback(other),
        None => fallback(&"<absent>"),
    };
    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r##"
        [gcp]
        project_id = "analytics-sandbox"
        data_lake_bucket = "hashlake-staging"
        bucket_filename = "tweets"
        bq_dataset = "social"
        bq_table = "hashtag_posts"

        [credentials]
        gcp_credentials = "WAREHOUSE_DSN"
        gcs_bucket_block_name = "lake-block"

        [feed]
        hashtag = "#DataEngineering"
        limit = "15000"
    "##;

    #[test]
    fn valid_config_resolves() {
        let config = PipelineConfig::from_toml_str(VALID).expect("config should resolve");
        assert_eq!(config.project_id, "analytics-sandbox");
        assert_eq!(config.hashtag, "#DataEngineering");
        assert_eq!(config.limit, 15_000);
        assert_eq!(config.destination().to_string(), "social.hashtag_posts");
    }

    #[test]
    fn each_missing_key_is_fatal_and_named() {
        let keys = [
            "project_id",
            "data_lake_bucket",
            "bucket_filename",
            "bq_dataset",
            "bq_table",
            "gcp_credentials",
            "gcs_bucket_block_name",
            "hashtag",
        ];
        for key in keys {
            let without: String = VALID
                .lines()
                .filter(|line| !line.trim_start().starts_with(&format!("{key} =")))
                .collect::<Vec<_>>()
                .join("\n");
            let err = PipelineConfig::from_toml_str(&without)
                .expect_err("missing key should be fatal");
            match err {
                ConfigError::MissingKey(name) => assert_eq!(name, key),
                other => panic!("expected MissingKey({key}), got {other:?}"),
            }
        }
    }

    #[test]
    fn non_numeric_limit_substitutes_default() {
        let contents = VALID.replace("limit = \"15000\"", "limit = \"plenty\"");
        let config = PipelineConfig::from_toml_str(&contents).expect("config should resolve");
        assert_eq!(config.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn absent_limit_substitutes_default() {
        let contents = VALID.replace("limit = \"15000\"", "");
        let config = PipelineConfig::from_toml_str(&contents).expect("config should resolve");
        assert_eq!(config.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn integer_limit_is_accepted() {
        let contents = VALID.replace("limit = \"15000\"", "limit = 250");
        let config = PipelineConfig::from_toml_str(&contents).expect("config should resolve");
        assert_eq!(config.limit, 250);
    }

    #[test]
    fn sql_unsafe_table_name_is_rejected() {
        let contents = VALID.replace(
            "bq_table = \"hashtag_posts\"",
            "bq_table = \"posts\\\"; drop table users\"",
        );
        let err = PipelineConfig::from_toml_str(&contents).expect_err("should reject");
        assert!(matches!(err, ConfigError::Malformed { key: "bq_table", .. }));
    }
}
