//! Content annotation: topic classification and entity extraction applied
//! row-by-row over the canonical dataset.
//!
//! The models themselves sit behind capability traits; this module owns the
//! merge policy. Rows are processed independently with no cross-row state.
//! A row whose model call fails is emitted with sentinel annotations and
//! counted, never silently dropped, so output cardinality always equals
//! input cardinality.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::warn;

use crate::clean::{clean_tweet, CaseHandling};
use crate::model::{CanonicalRow, EnrichedRow, ABSENT_SENTINEL};

#[derive(Debug, Error)]
pub enum EnrichError {
    /// The model cannot serve any request; fails the whole batch.
    #[error("annotation model unavailable: {0}")]
    ModelUnavailable(String),
    /// A single row could not be annotated; handled per the row policy.
    #[error("row annotation failed: {0}")]
    Row(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicScore {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Product,
    Corporation,
    Person,
    Location,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Corporation => "corporation",
            EntityKind::Person => "person",
            EntityKind::Location => "location",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityCandidate {
    pub text: String,
    pub kind: EntityKind,
    pub confidence: f64,
}

/// Single-label topic model. `None` means the model's label set yields no
/// category for this text; the enricher records the sentinel with
/// confidence 0, never an absent value.
pub trait TopicClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<Option<TopicScore>, EnrichError>;
}

/// Named-entity model producing type-tagged candidates in its native order.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Result<Vec<EntityCandidate>, EnrichError>;
}

#[derive(Debug)]
pub struct EnrichmentOutput {
    pub rows: Vec<EnrichedRow>,
    /// Rows emitted with sentinel annotations because a model call failed.
    pub rows_failed: usize,
}

pub struct Enricher {
    classifier: Box<dyn TopicClassifier>,
    extractor: Box<dyn EntityExtractor>,
}

impl Enricher {
    pub fn new(classifier: Box<dyn TopicClassifier>, extractor: Box<dyn EntityExtractor>) -> Self {
        Self {
            classifier,
            extractor,
        }
    }

    /// Built-in deterministic lexicon models; real models swap in behind
    /// the same traits.
    pub fn with_defaults() -> Self {
        Self::new(
            Box::new(KeywordTopicClassifier),
            Box::new(LexiconEntityExtractor),
        )
    }

    /// Annotates each row: the classifier sees case-folded text, the entity
    /// extractor the case-preserved `tweet` text. Order and cardinality of
    /// the input are preserved exactly.
    pub fn enrich(&self, rows: &[CanonicalRow]) -> Result<EnrichmentOutput, EnrichError> {
        let mut enriched = Vec::with_capacity(rows.len());
        let mut rows_failed = 0usize;

        for row in rows {
            let tweet = clean_tweet(&row.content, CaseHandling::Preserve);
            let folded = clean_tweet(&row.content, CaseHandling::Fold);

            match self.annotate(&tweet, &folded) {
                Ok(annotations) => enriched.push(annotations.into_row(row.clone(), tweet)),
                Err(EnrichError::Row(message)) => {
                    warn!(url = %row.url, error = %message, "row annotation failed, emitting sentinels");
                    rows_failed += 1;
                    enriched.push(Annotations::absent().into_row(row.clone(), tweet));
                }
                Err(fatal @ EnrichError::ModelUnavailable(_)) => return Err(fatal),
            }
        }

        Ok(EnrichmentOutput {
            rows: enriched,
            rows_failed,
        })
    }

    fn annotate(&self, tweet: &str, folded: &str) -> Result<Annotations, EnrichError> {
        let topic = self.classifier.classify(folded)?;
        let candidates = self.extractor.extract(tweet)?;

        let (topic, topic_confidence) = match topic {
            Some(score) => (score.label, score.confidence),
            None => (ABSENT_SENTINEL.to_string(), 0.0),
        };

        Ok(Annotations {
            topic,
            topic_confidence,
            product: best_of_kind(&candidates, EntityKind::Product),
            corporation: best_of_kind(&candidates, EntityKind::Corporation),
        })
    }
}

struct Annotations {
    topic: String,
    topic_confidence: f64,
    product: String,
    corporation: String,
}

impl Annotations {
    fn absent() -> Self {
        Self {
            topic: ABSENT_SENTINEL.to_string(),
            topic_confidence: 0.0,
            product: ABSENT_SENTINEL.to_string(),
            corporation: ABSENT_SENTINEL.to_string(),
        }
    }

    fn into_row(self, row: CanonicalRow, tweet: String) -> EnrichedRow {
        EnrichedRow {
            row,
            tweet,
            topic: self.topic,
            topic_confidence: self.topic_confidence,
            product: self.product,
            corporation: self.corporation,
        }
    }
}

/// Highest-confidence candidate of the target type wins; ties keep the
/// extractor's native ordering (first seen). No candidate yields the
/// sentinel, never a null.
fn best_of_kind(candidates: &[EntityCandidate], kind: EntityKind) -> String {
    let mut best: Option<&EntityCandidate> = None;
    for candidate in candidates.iter().filter(|c| c.kind == kind) {
        match best {
            Some(current) if candidate.confidence <= current.confidence => {}
            _ => best = Some(candidate),
        }
    }
    best.map(|candidate| candidate.text.clone())
        .unwrap_or_else(|| ABSENT_SENTINEL.to_string())
}

// --- Built-in deterministic models -------------------------------------

static TOPIC_LEXICON: Lazy<Vec<(&'static str, &'static [&'static str])>> = Lazy::new(|| {
    vec![
        (
            "data_engineering",
            &[
                "data", "pipeline", "pipelines", "etl", "warehouse", "sql", "spark", "airflow",
                "dbt", "analytics", "lakehouse", "parquet",
            ][..],
        ),
        (
            "machine_learning",
            &[
                "model", "models", "training", "neural", "ml", "inference", "dataset", "llm",
            ][..],
        ),
        (
            "devops",
            &[
                "kubernetes", "docker", "deploy", "terraform", "cloud", "ci", "observability",
            ][..],
        ),
    ]
});

/// Keyword-count classifier over a static lexicon. Confidence is the share
/// of tokens that matched the winning topic.
pub struct KeywordTopicClassifier;

impl TopicClassifier for KeywordTopicClassifier {
    fn classify(&self, text: &str) -> Result<Option<TopicScore>, EnrichError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut best: Option<(&str, usize)> = None;
        for (label, keywords) in TOPIC_LEXICON.iter() {
            let hits = tokens
                .iter()
                .filter(|token| keywords.contains(*token))
                .count();
            if hits == 0 {
                continue;
            }
            match best {
                Some((_, best_hits)) if hits <= best_hits => {}
                _ => best = Some((label, hits)),
            }
        }

        Ok(best.map(|(label, hits)| TopicScore {
            label: label.to_string(),
            confidence: hits as f64 / tokens.len() as f64,
        }))
    }
}

static PRODUCT_LEXICON: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("bigquery", "BigQuery"),
        ("snowflake", "Snowflake"),
        ("kafka", "Kafka"),
        ("spark", "Spark"),
        ("airflow", "Airflow"),
        ("dbt", "dbt"),
        ("postgres", "PostgreSQL"),
        ("postgresql", "PostgreSQL"),
        ("redshift", "Redshift"),
        ("databricks", "Databricks"),
    ])
});

static CORPORATION_LEXICON: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("google", "Google"),
        ("microsoft", "Microsoft"),
        ("amazon", "Amazon"),
        ("aws", "AWS"),
        ("meta", "Meta"),
        ("netflix", "Netflix"),
        ("uber", "Uber"),
        ("airbnb", "Airbnb"),
    ])
});

/// Dictionary lookup extractor. Candidates are emitted in text order with a
/// fixed confidence per exact token match; the merge policy's tie-breaking
/// therefore keeps the earliest mention.
pub struct LexiconEntityExtractor;

const LEXICON_MATCH_CONFIDENCE: f64 = 0.9;

impl EntityExtractor for LexiconEntityExtractor {
    fn extract(&self, text: &str) -> Result<Vec<EntityCandidate>, EnrichError> {
        let mut candidates = Vec::new();
        for token in text.split_whitespace() {
            let bare: String = token
                .chars()
                .filter(|ch| ch.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if bare.is_empty() {
                continue;
            }
            if let Some(name) = PRODUCT_LEXICON.get(bare.as_str()) {
                candidates.push(EntityCandidate {
                    text: (*name).to_string(),
                    kind: EntityKind::Product,
                    confidence: LEXICON_MATCH_CONFIDENCE,
                });
            }
            if let Some(name) = CORPORATION_LEXICON.get(bare.as_str()) {
                candidates.push(EntityCandidate {
                    text: (*name).to_string(),
                    kind: EntityKind::Corporation,
                    confidence: LEXICON_MATCH_CONFIDENCE,
                });
            }
        }
        Ok(candidates)
    }
}
