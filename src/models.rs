//! Data models shared by every pipeline stage.
//!
//! - [`Article`]: a normalized upstream article record
//! - [`ClassifiedArticle`]: an article annotated with bias and reliability
//! - [`BiasBucket`]: the five ordered political-leaning buckets
//! - [`NewsResponse`]: the payload produced for one request
//!
//! Upstream records use camelCase field names (`publishedAt`), and so does the
//! outbound payload, hence the `rename_all` attributes.

use crate::request::RequestParameters;
use crate::utils::{html_to_text, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A political-leaning bucket, in canonical left-to-right order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BiasBucket {
    Left,
    LeanLeft,
    Center,
    LeanRight,
    Right,
}

impl BiasBucket {
    /// All buckets in canonical order.
    pub const ALL: [BiasBucket; 5] = [
        BiasBucket::Left,
        BiasBucket::LeanLeft,
        BiasBucket::Center,
        BiasBucket::LeanRight,
        BiasBucket::Right,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BiasBucket::Left => "left",
            BiasBucket::LeanLeft => "lean-left",
            BiasBucket::Center => "center",
            BiasBucket::LeanRight => "lean-right",
            BiasBucket::Right => "right",
        }
    }

    /// Position in the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Parse a user supplied bucket name. Accepts `lean_left`, `Lean Left` and
    /// similar spellings; anything else (including `default`) is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let norm = s.trim().to_lowercase().replace(['_', ' '], "-");
        match norm.as_str() {
            "left" => Some(BiasBucket::Left),
            "lean-left" | "leanleft" => Some(BiasBucket::LeanLeft),
            "center" | "centre" => Some(BiasBucket::Center),
            "lean-right" | "leanright" => Some(BiasBucket::LeanRight),
            "right" => Some(BiasBucket::Right),
            _ => None,
        }
    }

    /// Every other bucket ordered by political distance, nearest first.
    /// Equal distances list the left-hand bucket first.
    pub fn adjacency(self) -> Vec<BiasBucket> {
        let me = self.index();
        let mut others: Vec<BiasBucket> = BiasBucket::ALL
            .into_iter()
            .filter(|b| *b != self)
            .collect();
        others.sort_by_key(|b| (b.index().abs_diff(me), b.index()));
        others
    }
}

impl fmt::Display for BiasBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic categories accepted by the headlines endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    General,
    World,
    Nation,
    Business,
    Technology,
    Entertainment,
    Sports,
    Science,
    Health,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::General => "general",
            Category::World => "world",
            Category::Nation => "nation",
            Category::Business => "business",
            Category::Technology => "technology",
            Category::Entertainment => "entertainment",
            Category::Sports => "sports",
            Category::Science => "science",
            Category::Health => "health",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "general" => Some(Category::General),
            "world" => Some(Category::World),
            "nation" => Some(Category::Nation),
            "business" => Some(Category::Business),
            "technology" => Some(Category::Technology),
            "entertainment" => Some(Category::Entertainment),
            "sports" => Some(Category::Sports),
            "science" => Some(Category::Science),
            "health" => Some(Category::Health),
            _ => None,
        }
    }
}

/// Whether the provider should return the full article body or a snippet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    #[default]
    Summary,
    Full,
}

/// Near-duplicate clustering strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    #[default]
    Off,
    /// Lexical title key.
    Title,
    /// Composite semantic similarity.
    Smart,
}

impl ClusterMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "title" => ClusterMode::Title,
            "smart" => ClusterMode::Smart,
            _ => ClusterMode::Off,
        }
    }
}

/// Which upstream operation served the primary fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    Search,
    Headlines,
}

impl EndpointKind {
    /// Path segment under the provider base URL.
    pub fn path(self) -> &'static str {
        match self {
            EndpointKind::Search => "search",
            EndpointKind::Headlines => "top-headlines",
        }
    }
}

/// The outlet that published an article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Publisher {
    pub name: String,
    pub url: String,
}

/// A normalized article record as returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub image: String,
    pub published_at: String,
    pub source: Publisher,
}

impl Article {
    /// Deduplication identity: canonical URL, else publisher URL, else title.
    /// Returns `None` when all three are empty.
    pub fn identity(&self) -> Option<&str> {
        [
            self.url.trim(),
            self.source.url.trim(),
            self.title.trim(),
        ]
        .into_iter()
        .find(|s| !s.is_empty())
    }

    /// Parsed publish timestamp, if it can be understood.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.published_at)
    }

    /// Reduce markup in text fields to plain text and fall back to the
    /// description when no body was supplied.
    pub fn normalized(mut self) -> Self {
        self.title = html_to_text(&self.title);
        self.description = html_to_text(&self.description);
        self.content = html_to_text(&self.content);
        if self.content.is_empty() {
            self.content = self.description.clone();
        }
        self.url = self.url.trim().to_string();
        self.source.url = self.source.url.trim().to_string();
        self
    }
}

/// An article annotated by the publisher classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedArticle {
    #[serde(flatten)]
    pub article: Article,
    #[serde(serialize_with = "serialize_bias")]
    pub bias: Option<BiasBucket>,
    pub reliability_score: u8,
}

impl ClassifiedArticle {
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.article.published()
    }
}

/// Unclassified publishers serialize as an empty string.
fn serialize_bias<S: Serializer>(bias: &Option<BiasBucket>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(bias.map(BiasBucket::as_str).unwrap_or(""))
}

/// Counters describing how a request's candidate pool evolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub upstream_calls: usize,
    pub fetched: usize,
    pub after_filters: usize,
    pub after_clustering: usize,
    /// Bucket name (or `unclassified`) to count, for the returned articles.
    pub bucket_counts: BTreeMap<String, usize>,
}

/// Attached to a payload served from an expired cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleMarker {
    pub reason: String,
    pub cached_at: DateTime<Utc>,
}

/// Payload produced for one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsResponse {
    pub total_articles: usize,
    pub articles: Vec<ClassifiedArticle>,
    pub generated_at: DateTime<Utc>,
    pub endpoint: EndpointKind,
    pub parameters: RequestParameters,
    pub stats: PipelineStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<StaleMarker>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacency_is_ordered_by_distance() {
        assert_eq!(
            BiasBucket::Left.adjacency(),
            vec![
                BiasBucket::LeanLeft,
                BiasBucket::Center,
                BiasBucket::LeanRight,
                BiasBucket::Right
            ]
        );
        assert_eq!(
            BiasBucket::Center.adjacency(),
            vec![
                BiasBucket::LeanLeft,
                BiasBucket::LeanRight,
                BiasBucket::Left,
                BiasBucket::Right
            ]
        );
        assert_eq!(BiasBucket::Right.adjacency()[0], BiasBucket::LeanRight);
    }

    #[test]
    fn bias_parse_accepts_variants() {
        assert_eq!(BiasBucket::parse("lean_left"), Some(BiasBucket::LeanLeft));
        assert_eq!(BiasBucket::parse(" Lean Right "), Some(BiasBucket::LeanRight));
        assert_eq!(BiasBucket::parse("default"), None);
        assert_eq!(BiasBucket::parse(""), None);
    }

    #[test]
    fn identity_priority() {
        let mut a = Article {
            title: "Title".into(),
            url: "https://x.com/a".into(),
            source: Publisher {
                name: "X".into(),
                url: "https://x.com".into(),
            },
            ..Default::default()
        };
        assert_eq!(a.identity(), Some("https://x.com/a"));
        a.url.clear();
        assert_eq!(a.identity(), Some("https://x.com"));
        a.source.url = "  ".into();
        assert_eq!(a.identity(), Some("Title"));
        a.title.clear();
        assert_eq!(a.identity(), None);
    }

    #[test]
    fn article_deserializes_from_provider_shape() {
        let json = r#"{
            "title": "Rates <b>hold</b>",
            "description": "The bank held rates.",
            "url": "https://apnews.com/article/rates",
            "image": "https://apnews.com/i.jpg",
            "publishedAt": "2024-01-10T12:00:00Z",
            "source": { "name": "AP", "url": "https://apnews.com" }
        }"#;
        let a: Article = serde_json::from_str(json).unwrap();
        let a = a.normalized();
        assert_eq!(a.title, "Rates hold");
        assert_eq!(a.content, "The bank held rates.");
        assert!(a.published().is_some());
        assert_eq!(a.source.name, "AP");
    }

    #[test]
    fn unclassified_bias_serializes_empty() {
        let c = ClassifiedArticle {
            article: Article::default(),
            bias: None,
            reliability_score: 50,
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["bias"], "");
        assert_eq!(v["reliabilityScore"], 50);

        let c = ClassifiedArticle {
            bias: Some(BiasBucket::LeanRight),
            ..c
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["bias"], "lean-right");
    }
}
