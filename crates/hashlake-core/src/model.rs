use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column contract every staged artifact must satisfy, in exactly this order.
pub const CANONICAL_COLUMNS: [&str; 8] = [
    "username",
    "created_utc",
    "likes",
    "retweets",
    "replies",
    "source",
    "content",
    "url",
];

/// Canonical columns plus the derived annotation columns, in load order.
pub const ENRICHED_COLUMNS: [&str; 13] = [
    "username",
    "created_utc",
    "likes",
    "retweets",
    "replies",
    "source",
    "content",
    "url",
    "tweet",
    "topic",
    "topic_confidence",
    "product",
    "corporation",
];

/// Placeholder written when an annotation pass finds no qualifying result.
/// Distinct from null; downstream consumers can filter on it directly.
pub const ABSENT_SENTINEL: &str = "None";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("column {column} contains a null at row {row}")]
    NullValue { column: &'static str, row: usize },
    #[error("column {column} holds a timestamp outside the representable range at row {row}")]
    TimestampRange { column: &'static str, row: usize },
}

/// One item as it came off the external feed. Counters arrive as 64-bit
/// values from the wire; canonicalization narrows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub username: String,
    pub created_utc: DateTime<Utc>,
    pub likes: i64,
    pub retweets: i64,
    pub replies: i64,
    pub source: String,
    pub content: String,
    pub url: String,
}

/// The fixed-schema row every downstream stage depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub username: String,
    pub created_utc: DateTime<Utc>,
    pub likes: i32,
    pub retweets: i32,
    pub replies: i32,
    pub source: String,
    pub content: String,
    pub url: String,
}

/// A canonical row plus the derived annotation columns produced by the
/// enricher. Consumed exactly once by the warehouse loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub row: CanonicalRow,
    pub tweet: String,
    pub topic: String,
    pub topic_confidence: f64,
    pub product: String,
    pub corporation: String,
}

/// Builds the staged-artifact frame: column set and order exactly
/// [`CANONICAL_COLUMNS`], counters as Int32, `created_utc` as a UTC
/// microsecond datetime.
pub fn canonical_to_dataframe(rows: &[CanonicalRow]) -> Result<DataFrame, ModelError> {
    let usernames: Vec<&str> = rows.iter().map(|row| row.username.as_str()).collect();
    let timestamps: Vec<i64> = rows
        .iter()
        .map(|row| row.created_utc.timestamp_micros())
        .collect();
    let likes: Vec<i32> = rows.iter().map(|row| row.likes).collect();
    let retweets: Vec<i32> = rows.iter().map(|row| row.retweets).collect();
    let replies: Vec<i32> = rows.iter().map(|row| row.replies).collect();
    let sources: Vec<&str> = rows.iter().map(|row| row.source.as_str()).collect();
    let contents: Vec<&str> = rows.iter().map(|row| row.content.as_str()).collect();
    let urls: Vec<&str> = rows.iter().map(|row| row.url.as_str()).collect();

    let created_utc = Series::new("created_utc".into(), timestamps).cast(&DataType::Datetime(
        TimeUnit::Microseconds,
        Some(TimeZone::UTC),
    ))?;

    let columns: Vec<Column> = vec![
        Series::new("username".into(), usernames).into(),
        created_utc.into(),
        Series::new("likes".into(), likes).into(),
        Series::new("retweets".into(), retweets).into(),
        Series::new("replies".into(), replies).into(),
        Series::new("source".into(), sources).into(),
        Series::new("content".into(), contents).into(),
        Series::new("url".into(), urls).into(),
    ];

    Ok(DataFrame::new(columns)?)
}

/// Inverse of [`canonical_to_dataframe`]; the round-trip preserves every
/// value column-for-column.
pub fn dataframe_to_canonical(df: &DataFrame) -> Result<Vec<CanonicalRow>, ModelError> {
    let usernames = df.column("username")?.str()?;
    let timestamps = df.column("created_utc")?.datetime()?;
    let likes = df.column("likes")?.i32()?;
    let retweets = df.column("retweets")?.i32()?;
    let replies = df.column("replies")?.i32()?;
    let sources = df.column("source")?.str()?;
    let contents = df.column("content")?.str()?;
    let urls = df.column("url")?.str()?;

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let micros = timestamps.get(idx).ok_or(ModelError::NullValue {
            column: "created_utc",
            row: idx,
        })?;
        let created_utc =
            DateTime::from_timestamp_micros(micros).ok_or(ModelError::TimestampRange {
                column: "created_utc",
                row: idx,
            })?;

        rows.push(CanonicalRow {
            username: get_str(usernames, "username", idx)?.to_string(),
            created_utc,
            likes: get_i32(likes, "likes", idx)?,
            retweets: get_i32(retweets, "retweets", idx)?,
            replies: get_i32(replies, "replies", idx)?,
            source: get_str(sources, "source", idx)?.to_string(),
            content: get_str(contents, "content", idx)?.to_string(),
            url: get_str(urls, "url", idx)?.to_string(),
        });
    }

    Ok(rows)
}

fn get_str<'a>(
    values: &'a StringChunked,
    column: &'static str,
    row: usize,
) -> Result<&'a str, ModelError> {
    values.get(row).ok_or(ModelError::NullValue { column, row })
}

fn get_i32(values: &Int32Chunked, column: &'static str, row: usize) -> Result<i32, ModelError> {
    values.get(row).ok_or(ModelError::NullValue { column, row })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn sample_rows() -> Vec<CanonicalRow> {
        vec![
            CanonicalRow {
                username: "alice".to_string(),
                created_utc: Utc.with_ymd_and_hms(2023, 3, 14, 9, 26, 53).unwrap(),
                likes: 12,
                retweets: 3,
                replies: 1,
                source: "Web App".to_string(),
                content: "Shipping a new pipeline today".to_string(),
                url: "https://example.com/alice/1".to_string(),
            },
            CanonicalRow {
                username: "bob".to_string(),
                created_utc: Utc.with_ymd_and_hms(2023, 3, 15, 18, 2, 0).unwrap(),
                likes: 0,
                retweets: 0,
                replies: 4,
                source: "Mobile".to_string(),
                content: "Warehouse loads are slow again".to_string(),
                url: "https://example.com/bob/2".to_string(),
            },
        ]
    }

    #[test]
    fn dataframe_columns_match_contract() {
        let df = canonical_to_dataframe(&sample_rows()).expect("build frame");
        assert_eq!(df.get_column_names(), CANONICAL_COLUMNS);
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn dataframe_round_trip_preserves_values() {
        let rows = sample_rows();
        let df = canonical_to_dataframe(&rows).expect("build frame");
        let recovered = dataframe_to_canonical(&df).expect("recover rows");
        assert_eq!(recovered, rows);
    }

    #[test]
    fn counters_are_int32_in_frame() {
        let df = canonical_to_dataframe(&sample_rows()).expect("build frame");
        for column in ["likes", "retweets", "replies"] {
            assert_eq!(df.column(column).unwrap().dtype(), &DataType::Int32);
        }
        assert!(matches!(
            df.column("created_utc").unwrap().dtype(),
            DataType::Datetime(TimeUnit::Microseconds, Some(_))
        ));
    }

    #[test]
    fn empty_row_set_round_trips() {
        let df = canonical_to_dataframe(&[]).expect("build empty frame");
        assert_eq!(df.height(), 0);
        assert_eq!(df.get_column_names(), CANONICAL_COLUMNS);
        assert!(dataframe_to_canonical(&df).expect("recover").is_empty());
    }
}
