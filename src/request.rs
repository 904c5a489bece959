//! Inbound request parameters and their normalization.
//!
//! Invalid values are never rejected. Unknown categories and bias names are
//! cleared, counts and scores are clamped, and unparseable dates are dropped.

use crate::error::NewsError;
use crate::models::{BiasBucket, Category, ClusterMode, ContentMode};
use crate::utils::parse_timestamp;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_REQUESTED: usize = 100;
pub const DEFAULT_REQUESTED: usize = 10;
const DEFAULT_LANGUAGE: &str = "en";

/// Parameters as supplied by the caller, before validation.
///
/// This is the shape of one entry in a YAML batch file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRequest {
    pub q: Option<String>,
    pub lang: Option<String>,
    pub country: Option<String>,
    pub max: Option<i64>,
    pub category: Option<String>,
    pub expand: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub bias: Option<String>,
    #[serde(alias = "minReliability")]
    pub min_reliability: Option<i64>,
    pub balanced: Option<bool>,
    pub cluster: Option<String>,
}

/// Parse a YAML batch file: a list of requests.
pub fn parse_batch(text: &str) -> Result<Vec<RawRequest>, NewsError> {
    serde_yaml::from_str(text).map_err(|e| NewsError::Batch(e.to_string()))
}

/// Validated, normalized parameters for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    pub query: String,
    pub language: String,
    pub country: Option<String>,
    pub max: usize,
    pub category: Option<Category>,
    pub expand: ContentMode,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub bias: Option<BiasBucket>,
    pub min_reliability: Option<u8>,
    pub balanced: bool,
    pub cluster: ClusterMode,
}

impl RequestParameters {
    /// Key used by the response cache. Two requests that normalize to the
    /// same parameters share a cache entry.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    /// Whether a publish timestamp falls in the inclusive date window.
    /// Unknown timestamps always pass.
    pub fn in_window(&self, published: Option<DateTime<Utc>>) -> bool {
        let Some(ts) = published else {
            return true;
        };
        self.from.is_none_or(|from| ts >= from) && self.to.is_none_or(|to| ts <= to)
    }
}

impl RawRequest {
    pub fn normalize(&self) -> RequestParameters {
        let query = self
            .q
            .as_deref()
            .map(|q| q.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();

        let language = self
            .lang
            .as_deref()
            .and_then(two_letter_code)
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let country = self.country.as_deref().and_then(two_letter_code);

        let max = self
            .max
            .map(|m| m.clamp(1, MAX_REQUESTED as i64) as usize)
            .unwrap_or(DEFAULT_REQUESTED);

        let category = self.category.as_deref().and_then(Category::parse);

        let expand = match self.expand.as_deref().map(|s| s.trim().to_lowercase()) {
            Some(s) if s == "full" || s == "content" => ContentMode::Full,
            _ => ContentMode::Summary,
        };

        let mut from = self.from.as_deref().and_then(|s| parse_bound(s, false));
        let mut to = self.to.as_deref().and_then(|s| parse_bound(s, true));
        if let (Some(f), Some(t)) = (from, to) {
            if f > t {
                std::mem::swap(&mut from, &mut to);
            }
        }

        let balanced = self.balanced.unwrap_or(false);
        // Balanced sampling supersedes a single-bucket filter.
        let bias = if balanced {
            None
        } else {
            self.bias.as_deref().and_then(BiasBucket::parse)
        };

        let min_reliability = self.min_reliability.map(|r| r.clamp(0, 100) as u8);
        let cluster = self
            .cluster
            .as_deref()
            .map(ClusterMode::parse)
            .unwrap_or_default();

        RequestParameters {
            query,
            language,
            country,
            max,
            category,
            expand,
            from,
            to,
            bias,
            min_reliability,
            balanced,
            cluster,
        }
    }
}

fn two_letter_code(s: &str) -> Option<String> {
    let s = s.trim().to_lowercase();
    (s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic())).then_some(s)
}

/// A bare date as an upper bound covers the whole day.
fn parse_bound(s: &str, upper: bool) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if upper {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return date.and_hms_milli_opt(23, 59, 59, 999).map(|n| n.and_utc());
        }
    }
    parse_timestamp(s)
}
