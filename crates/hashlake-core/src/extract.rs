//! Source extraction: a bounded, retried pull of raw records from the
//! external feed.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::RawRecord;

/// Bounded retry count for the extract stage. Attempts reuse the same
/// query and limit; a fresh buffer is collected each time, so records from
/// a failed attempt never leak into the result.
pub const MAX_EXTRACT_ATTEMPTS: u32 = 3;

/// Default trailing window, in days, ending "now".
pub const DEFAULT_WINDOW_DAYS: u64 = 365;

const RETRY_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unreachable: {0}")]
    Unreachable(String),
    #[error("malformed feed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("feed search failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: FeedError,
    },
}

/// A hashtag search bounded to a date window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub hashtag: String,
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl FeedQuery {
    /// Query over the trailing `days` ending at `now`.
    pub fn trailing_days(hashtag: impl Into<String>, days: u64, now: DateTime<Utc>) -> Self {
        let until = now.date_naive();
        let since = until
            .checked_sub_days(Days::new(days))
            .unwrap_or(NaiveDate::MIN);
        Self {
            hashtag: hashtag.into(),
            since,
            until,
        }
    }
}

impl fmt::Display for FeedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} since:{} until:{}",
            self.hashtag,
            self.since.format("%Y-%m-%d"),
            self.until.format("%Y-%m-%d")
        )
    }
}

/// Capability interface over the external feed. Implementations perform the
/// network search and surface transport or shape problems as [`FeedError`];
/// they hold no state between invocations.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn search(
        &self,
        query: &FeedQuery,
        max_results: usize,
    ) -> Result<Vec<RawRecord>, FeedError>;
}

/// Pulls records for `query`, keeping items while their index does not
/// exceed `limit` (so up to `limit + 1` records, the boundary behavior the
/// rest of the pipeline is written against). Transient feed failures are
/// retried up to [`MAX_EXTRACT_ATTEMPTS`] times before surfacing a typed
/// [`ExtractionError`].
pub async fn extract(
    source: &dyn FeedSource,
    query: &FeedQuery,
    limit: usize,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let max_results = limit.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match source.search(query, max_results).await {
            Ok(fetched) => {
                let mut records = Vec::new();
                for (index, record) in fetched.into_iter().enumerate() {
                    if index > limit {
                        break;
                    }
                    records.push(record);
                }
                info!(
                    query = %query,
                    attempt,
                    records = records.len(),
                    "feed search succeeded"
                );
                return Ok(records);
            }
            Err(err) if attempt < MAX_EXTRACT_ATTEMPTS => {
                warn!(
                    query = %query,
                    attempt,
                    max_attempts = MAX_EXTRACT_ATTEMPTS,
                    error = %err,
                    "feed search failed, will retry"
                );
                tokio::time::sleep(Duration::from_millis(
                    RETRY_BASE_DELAY_MS * u64::from(attempt),
                ))
                .await;
            }
            Err(err) => {
                return Err(ExtractionError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

/// JSON feed client over a search endpoint: `GET {base_url}/search?q=..&max_results=..`
/// returning an array of feed items. Transport failures map to
/// [`FeedError::Unreachable`], body/shape failures to [`FeedError::Malformed`].
pub struct HttpFeedSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeedSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    username: String,
    created_utc: DateTime<Utc>,
    likes: i64,
    retweets: i64,
    replies: i64,
    source: String,
    content: String,
    url: String,
}

impl From<FeedItem> for RawRecord {
    fn from(item: FeedItem) -> Self {
        RawRecord {
            username: item.username,
            created_utc: item.created_utc,
            likes: item.likes,
            retweets: item.retweets,
            replies: item.replies,
            source: item.source,
            content: item.content,
            url: item.url,
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn search(
        &self,
        query: &FeedQuery,
        max_results: usize,
    ) -> Result<Vec<RawRecord>, FeedError> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query.to_string()),
                ("max_results", max_results.to_string()),
            ])
            .send()
            .await
            .map_err(|err| FeedError::Unreachable(err.to_string()))?
            .error_for_status()
            .map_err(|err| FeedError::Unreachable(err.to_string()))?;

        let items: Vec<FeedItem> = response
            .json()
            .await
            .map_err(|err| FeedError::Malformed(err.to_string()))?;

        Ok(items.into_iter().map(RawRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(tag: &str, index: usize) -> RawRecord {
        RawRecord {
            username: format!("{tag}_{index}"),
            created_utc: Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap(),
            likes: index as i64,
            retweets: 0,
            replies: 0,
            source: "Web App".to_string(),
            content: format!("post {index} from {tag}"),
            url: format!("https://example.com/{tag}/{index}"),
        }
    }

    struct StaticFeed {
        records: Vec<RawRecord>,
    }

    #[async_trait]
    impl FeedSource for StaticFeed {
        async fn search(
            &self,
            _query: &FeedQuery,
            _max_results: usize,
        ) -> Result<Vec<RawRecord>, FeedError> {
            Ok(self.records.clone())
        }
    }

    /// Fails with a transient error until `failures` attempts have been
    /// consumed, then serves records tagged with the attempt number.
    struct FlakyFeed {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FeedSource for FlakyFeed {
        async fn search(
            &self,
            _query: &FeedQuery,
            _max_results: usize,
        ) -> Result<Vec<RawRecord>, FeedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(FeedError::Unreachable(format!("attempt {call} timed out")))
            } else {
                Ok(vec![record(&format!("attempt{call}"), 0)])
            }
        }
    }

    fn query() -> FeedQuery {
        FeedQuery {
            hashtag: "#DataEngineering".to_string(),
            since: NaiveDate::from_ymd_opt(2022, 5, 1).unwrap(),
            until: NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
        }
    }

    #[test]
    fn query_renders_hashtag_and_window() {
        assert_eq!(
            query().to_string(),
            "#DataEngineering since:2022-05-01 until:2023-05-01"
        );
    }

    #[test]
    fn trailing_window_defaults_to_a_year() {
        let now = Utc.with_ymd_and_hms(2023, 5, 1, 10, 30, 0).unwrap();
        let query = FeedQuery::trailing_days("#rust", DEFAULT_WINDOW_DAYS, now);
        assert_eq!(query.until, NaiveDate::from_ymd_opt(2023, 5, 1).unwrap());
        assert_eq!(query.since, NaiveDate::from_ymd_opt(2022, 5, 1).unwrap());
    }

    #[tokio::test]
    async fn limit_boundary_keeps_one_past_the_limit() {
        let feed = StaticFeed {
            records: (0..10).map(|i| record("feed", i)).collect(),
        };
        let records = extract(&feed, &query(), 5).await.expect("extract");
        assert_eq!(records.len(), 6);
        assert_eq!(records[5].username, "feed_5");
    }

    #[tokio::test]
    async fn short_feed_returns_everything() {
        let feed = StaticFeed {
            records: (0..3).map(|i| record("feed", i)).collect(),
        };
        let records = extract(&feed, &query(), 5).await.expect("extract");
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_only_final_attempt_counts() {
        let feed = FlakyFeed {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let records = extract(&feed, &query(), 10).await.expect("extract");
        assert_eq!(feed.calls.load(Ordering::SeqCst), 3);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].username, "attempt3_0");
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_typed_error() {
        let feed = FlakyFeed {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let err = extract(&feed, &query(), 10).await.expect_err("should fail");
        match err {
            ExtractionError::Exhausted { attempts, .. } => {
                assert_eq!(attempts, MAX_EXTRACT_ATTEMPTS)
            }
        }
        assert_eq!(feed.calls.load(Ordering::SeqCst), MAX_EXTRACT_ATTEMPTS);
    }
}
