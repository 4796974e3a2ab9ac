//! Flow-level error surface. Module-level failures are wrapped into this
//! taxonomy at each stage boundary, so the orchestrator never sees raw
//! transport errors.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::enrich::EnrichError;
use crate::extract::ExtractionError;
use crate::schema::SchemaError;
use crate::stage::StageError;
use crate::warehouse::LoadError;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("staging: {0}")]
    Stage(#[from] StageError),
    #[error("enrichment: {0}")]
    Enrichment(#[from] EnrichError),
    #[error("load: {0}")]
    Load(#[from] LoadError),
}

/// The stages a flow run moves through, in order. A failed run reports
/// exactly which one it died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Config,
    Extract,
    Clean,
    StageLocal,
    ValidateSchema,
    StageRemote,
    FetchStaged,
    Enrich,
    Load,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::Config => "config",
            FlowStage::Extract => "extract",
            FlowStage::Clean => "clean",
            FlowStage::StageLocal => "stage-local",
            FlowStage::ValidateSchema => "validate-schema",
            FlowStage::StageRemote => "stage-remote",
            FlowStage::FetchStaged => "fetch-staged",
            FlowStage::Enrich => "enrich",
            FlowStage::Load => "load",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a flow run: the stage that failed plus the wrapped
/// error kind. Partial artifacts from the run are left in place for
/// inspection but are never published.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct FlowError {
    pub stage: FlowStage,
    #[source]
    pub source: EtlError,
}

impl FlowError {
    pub fn new(stage: FlowStage, source: impl Into<EtlError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn config(source: ConfigError) -> Self {
        Self::new(FlowStage::Config, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_error_names_the_failing_stage() {
        let err = FlowError::config(ConfigError::MissingKey("hashtag"));
        assert_eq!(err.stage, FlowStage::Config);
        let message = err.to_string();
        assert!(message.contains("config stage failed"));
        assert!(message.contains("hashtag"));
    }
}
