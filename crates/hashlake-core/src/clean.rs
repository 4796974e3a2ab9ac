//! Pure normalization of feed records into the canonical row shape.
//!
//! Everything in this module is deterministic and free of I/O; applying any
//! of these functions twice yields the same result as applying them once.

use chrono::{DateTime, Utc};

use crate::model::{CanonicalRow, RawRecord};

/// Whether free-text cleaning keeps the original casing.
///
/// Case-sensitive annotators (entity extraction) need `Preserve`;
/// case-insensitive ones (topic classification) take `Fold`, which also
/// strips punctuation before lower-casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseHandling {
    Preserve,
    Fold,
}

/// Projects raw feed items onto the canonical column contract. Engagement
/// counters saturate at the i32 bounds rather than wrapping.
pub fn canonicalize(records: &[RawRecord]) -> Vec<CanonicalRow> {
    records
        .iter()
        .map(|record| CanonicalRow {
            username: record.username.clone(),
            created_utc: record.created_utc,
            likes: saturate_i32(record.likes),
            retweets: saturate_i32(record.retweets),
            replies: saturate_i32(record.replies),
            source: record.source.clone(),
            content: record.content.clone(),
            url: record.url.clone(),
        })
        .collect()
}

/// Earliest and latest `created_utc` over a batch, for span logging.
pub fn time_span(rows: &[CanonicalRow]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut iter = rows.iter().map(|row| row.created_utc);
    let first = iter.next()?;
    let (min, max) = iter.fold((first, first), |(min, max), ts| {
        (min.min(ts), max.max(ts))
    });
    Some((min, max))
}

fn saturate_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Produces the `tweet` field from a raw text body: HTML entity sequences,
/// `@`-mentions and URLs are removed, then (in `Fold` mode) punctuation is
/// stripped and the text lower-cased, and finally leading digit-only tokens
/// are dropped. Whitespace collapses to single spaces.
pub fn clean_tweet(text: &str, case: CaseHandling) -> String {
    let without_entities = strip_entities(text);

    let tokens = without_entities
        .split_whitespace()
        .filter(|token| !is_mention(token) && !is_url(token));

    let tokens: Vec<String> = match case {
        CaseHandling::Preserve => tokens.map(str::to_string).collect(),
        CaseHandling::Fold => tokens
            .map(|token| {
                token
                    .chars()
                    .filter(|ch| !ch.is_ascii_punctuation())
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|token| !token.is_empty())
            .collect(),
    };

    let skip = tokens
        .iter()
        .take_while(|token| is_digit_token(token))
        .count();

    tokens[skip..].join(" ")
}

fn is_mention(token: &str) -> bool {
    token.starts_with('@') && token.len() > 1
}

fn is_url(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
}

fn is_digit_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit())
}

/// Removes `&name;` / `&#123;` entity sequences wherever they occur. A bare
/// `&` with no terminating `;` is kept as-is.
fn strip_entities(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());
    let mut idx = 0;

    while idx < chars.len() {
        if chars[idx] == '&' {
            if let Some(len) = entity_length(&chars[idx..]) {
                idx += len;
                continue;
            }
        }
        output.push(chars[idx]);
        idx += 1;
    }

    output
}

// Longest entity of interest is on the order of "&thinsp;"; anything longer
// is treated as a literal ampersand.
const MAX_ENTITY_BODY: usize = 10;

fn entity_length(chars: &[char]) -> Option<usize> {
    let mut len = 1;
    for ch in chars.iter().skip(1).take(MAX_ENTITY_BODY + 1) {
        if *ch == ';' {
            // Require at least one body character between '&' and ';'.
            return if len > 1 { Some(len + 1) } else { None };
        }
        if ch.is_ascii_alphanumeric() || *ch == '#' {
            len += 1;
        } else {
            return None;
        }
    }
    None
}
