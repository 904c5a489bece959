//! Publisher classification by political leaning and reliability.
//!
//! Classification is a pure lookup on the publisher's hostname: an exact
//! hostname match wins, then the registrable domain (`news.bbc.co.uk` →
//! `bbc.co.uk`). Article content is never inspected.
//!
//! The tables are data, not code. The built-in set is embedded from
//! `data/publishers.yaml`; a replacement file with the same layout can be
//! loaded at startup.

use crate::error::NewsError;
use crate::models::{Article, BiasBucket, ClassifiedArticle};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

/// Score given to publishers missing from the reliability table.
pub const DEFAULT_RELIABILITY: u8 = 50;

const BUILTIN_TABLE: &str = include_str!("../data/publishers.yaml");

/// Public suffixes made of two labels, where the registrable domain keeps
/// three labels.
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.nz", "co.jp",
    "co.in", "com.br", "co.za", "com.mx", "com.sg", "com.hk", "com.tr", "co.il", "com.ar",
];

/// Result of classifying one publisher URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub bias: Option<BiasBucket>,
    pub reliability: u8,
}

#[derive(Debug, serde::Deserialize)]
struct TableFile {
    #[serde(default)]
    bias: BTreeMap<BiasBucket, Vec<String>>,
    #[serde(default)]
    reliability: BTreeMap<String, i64>,
}

/// Immutable bias and reliability lookup tables.
#[derive(Debug, Default)]
pub struct PublisherTable {
    bias: HashMap<String, BiasBucket>,
    reliability: HashMap<String, u8>,
    by_bucket: [Vec<String>; 5],
}

impl PublisherTable {
    /// The table compiled into the binary.
    pub fn builtin() -> Result<Self, NewsError> {
        Self::from_yaml(BUILTIN_TABLE)
    }

    /// Load a table from a YAML file on disk.
    pub fn load(path: &Path) -> Result<Self, NewsError> {
        let text = std::fs::read_to_string(path)?;
        let table = Self::from_yaml(&text)?;
        info!(path = %path.display(), domains = table.bias.len(), "Loaded publisher table");
        Ok(table)
    }

    /// Parse a table from YAML text.
    ///
    /// Buckets are registered in canonical left-to-right order; a domain that
    /// appears in more than one bucket keeps its first registration.
    pub fn from_yaml(text: &str) -> Result<Self, NewsError> {
        let file: TableFile = serde_yaml::from_str(text)?;
        let mut table = PublisherTable::default();

        for (bucket, domains) in &file.bias {
            for raw in domains {
                let domain = normalize_domain(raw);
                if domain.is_empty() {
                    continue;
                }
                if let Some(existing) = table.bias.get(&domain) {
                    warn!(%domain, kept = %existing, ignored = %bucket, "Publisher listed in two bias buckets");
                    continue;
                }
                table.bias.insert(domain.clone(), *bucket);
                table.by_bucket[bucket.index()].push(domain);
            }
        }

        for (raw, score) in &file.reliability {
            let domain = normalize_domain(raw);
            if domain.is_empty() {
                continue;
            }
            table.reliability.insert(domain, (*score).clamp(0, 100) as u8);
        }

        debug!(
            bias_entries = table.bias.len(),
            reliability_entries = table.reliability.len(),
            "Parsed publisher table"
        );
        Ok(table)
    }

    /// Classify a publisher URL. Never fails: unparseable or unknown URLs get
    /// no bias and the default reliability.
    pub fn classify(&self, url: &str) -> Classification {
        let Some(host) = hostname(url) else {
            return Classification {
                bias: None,
                reliability: DEFAULT_RELIABILITY,
            };
        };
        let domain = registrable_domain(&host);

        let bias = self
            .bias
            .get(&host)
            .or_else(|| self.bias.get(&domain))
            .copied();
        let reliability = self
            .reliability
            .get(&host)
            .or_else(|| self.reliability.get(&domain))
            .copied()
            .unwrap_or(DEFAULT_RELIABILITY);

        Classification { bias, reliability }
    }

    /// Annotate an article using its publisher URL, or the article URL when
    /// the publisher URL is missing.
    pub fn classify_article(&self, article: Article) -> ClassifiedArticle {
        let url = if article.source.url.is_empty() {
            article.url.as_str()
        } else {
            article.source.url.as_str()
        };
        let Classification { bias, reliability } = self.classify(url);
        ClassifiedArticle {
            article,
            bias,
            reliability_score: reliability,
        }
    }

    /// Domains registered for a bucket, in table order.
    pub fn domains_for(&self, bucket: BiasBucket) -> &[String] {
        &self.by_bucket[bucket.index()]
    }
}

fn normalize_domain(raw: &str) -> String {
    let d = raw.trim().trim_end_matches('.').to_lowercase();
    d.strip_prefix("www.").map(str::to_string).unwrap_or(d)
}

/// Lower-cased hostname of `url` without a leading `www.`.
///
/// A bare host such as `bbc.co.uk/news` is read as an `https` URL.
pub fn hostname(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let parsed = if url.contains("://") {
        Url::parse(url).ok()?
    } else {
        Url::parse(&format!("https://{url}")).ok()?
    };
    let host = normalize_domain(parsed.host_str()?);
    (!host.is_empty()).then_some(host)
}

/// The registrable domain of a hostname: its last two labels, or three when
/// the last two form a known public suffix.
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    let last_two = labels[labels.len() - 2..].join(".");
    if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}
