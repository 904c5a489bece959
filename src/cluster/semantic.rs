//! Semantic clustering on a composite similarity score.
//!
//! Each pair of articles in the working set is scored on four signals:
//!
//! - **title**: blend of unigram and bigram/trigram cosine similarity
//! - **entities**: Jaccard overlap of capitalized words in title and description
//! - **time**: full credit within 6 hours, decaying to zero at 72 hours
//! - **url**: Jaccard overlap of path tokens and date/id patterns
//!
//! Pairs at or above the threshold are merged with a disjoint-set forest, so
//! clusters are transitive. The number of comparisons is capped; once the cap
//! is hit the remaining pairs are simply not compared.

use super::{content_tokens, is_stop_word};
use crate::models::ClassifiedArticle;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use url::Url;

/// Signal weights for the composite score.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub title: f64,
    pub entity: f64,
    pub temporal: f64,
    pub url: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            title: 0.45,
            entity: 0.30,
            temporal: 0.20,
            url: 0.05,
        }
    }
}

/// Tunables for semantic clustering.
#[derive(Debug, Clone)]
pub struct SemanticConfig {
    pub weights: Weights,
    pub threshold: f64,
    /// Size of the newest-first working set that is compared pairwise.
    pub max_items: usize,
    /// Upper bound on pairwise comparisons.
    pub max_pairs: usize,
    /// Upper bound on articles passed through from outside the working set.
    pub passthrough_cap: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            threshold: 0.68,
            max_items: 150,
            max_pairs: 10_000,
            passthrough_cap: 100,
        }
    }
}

const UNIGRAM_WEIGHT: f64 = 0.6;
const NGRAM_WEIGHT: f64 = 0.4;
const FULL_CREDIT_HOURS: f64 = 6.0;
const ZERO_CREDIT_HOURS: f64 = 72.0;
const UNKNOWN_TIME_SCORE: f64 = 0.5;

static DATE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/(20\d{2}|19\d{2})/(\d{1,2})/(\d{1,2})(?:/|$)").expect("valid date regex")
});
static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5,}").expect("valid id regex"));

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merge the sets containing `a` and `b`. Returns `false` if they were
    /// already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// Precomputed per-article signals.
struct Features {
    unigrams: HashMap<String, f64>,
    ngrams: HashMap<String, f64>,
    entities: HashSet<String>,
    published: Option<DateTime<Utc>>,
    url_tokens: HashSet<String>,
}

impl Features {
    fn of(article: &ClassifiedArticle) -> Self {
        let tokens = content_tokens(&article.article.title);
        let mut unigrams = HashMap::new();
        for t in &tokens {
            *unigrams.entry(t.clone()).or_insert(0.0) += 1.0;
        }
        let mut ngrams = HashMap::new();
        for n in [2, 3] {
            for w in tokens.windows(n) {
                *ngrams.entry(w.join(" ")).or_insert(0.0) += 1.0;
            }
        }
        let entity_text = format!("{} {}", article.article.title, article.article.description);
        Self {
            unigrams,
            ngrams,
            entities: capitalized_words(&entity_text),
            published: article.published(),
            url_tokens: url_tokens(&article.article.url),
        }
    }
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let na = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let nb = b.values().map(|v| v * v).sum::<f64>().sqrt();
    dot / (na * nb)
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}

/// Proper-noun heuristic: words starting with an upper-case letter,
/// lower-cased, minus stop-words (which catches sentence-initial "The").
pub fn capitalized_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| w.chars().count() > 1)
        .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
        .map(|w| w.trim_end_matches("'s").to_lowercase())
        .filter(|w| !is_stop_word(w))
        .collect()
}

/// Path-segment words plus any date or numeric-id patterns in the URL path.
pub fn url_tokens(url: &str) -> HashSet<String> {
    let Ok(parsed) = Url::parse(url) else {
        return HashSet::new();
    };
    let path = parsed.path();
    let mut tokens: HashSet<String> = path
        .split(|c: char| matches!(c, '/' | '-' | '_' | '.'))
        .map(str::to_lowercase)
        .filter(|t| t.len() > 1 && !is_stop_word(t) && !matches!(t.as_str(), "html" | "htm" | "amp"))
        .collect();
    if let Some(caps) = DATE_PATH.captures(path) {
        tokens.insert(format!("date:{}-{}-{}", &caps[1], &caps[2], &caps[3]));
    }
    for m in NUMERIC_ID.find_iter(path) {
        tokens.insert(format!("id:{}", m.as_str()));
    }
    tokens
}

fn title_similarity(a: &Features, b: &Features) -> f64 {
    UNIGRAM_WEIGHT * cosine(&a.unigrams, &b.unigrams) + NGRAM_WEIGHT * cosine(&a.ngrams, &b.ngrams)
}

/// Time proximity score in `[0, 1]`.
pub fn temporal_similarity(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return UNKNOWN_TIME_SCORE;
    };
    let hours = (a - b).num_seconds().unsigned_abs() as f64 / 3600.0;
    if hours <= FULL_CREDIT_HOURS {
        1.0
    } else if hours >= ZERO_CREDIT_HOURS {
        0.0
    } else {
        1.0 - (hours - FULL_CREDIT_HOURS) / (ZERO_CREDIT_HOURS - FULL_CREDIT_HOURS)
    }
}

fn composite(a: &Features, b: &Features, w: &Weights) -> f64 {
    w.title * title_similarity(a, b)
        + w.entity * jaccard(&a.entities, &b.entities)
        + w.temporal * temporal_similarity(a.published, b.published)
        + w.url * jaccard(&a.url_tokens, &b.url_tokens)
}

/// Composite similarity of two articles under `weights`.
pub fn similarity(a: &ClassifiedArticle, b: &ClassifiedArticle, weights: &Weights) -> f64 {
    composite(&Features::of(a), &Features::of(b), weights)
}

/// Cluster a newest-first pool and return one representative per cluster,
/// followed by the pass-through tail.
pub fn cluster(articles: Vec<ClassifiedArticle>, config: &SemanticConfig) -> Vec<ClassifiedArticle> {
    let mut working = articles;
    let overflow = if working.len() > config.max_items {
        working.split_off(config.max_items)
    } else {
        Vec::new()
    };

    let features: Vec<Features> = working.iter().map(Features::of).collect();
    let n = working.len();
    let mut sets = UnionFind::new(n);
    let mut compared = 0usize;
    let mut merges = 0usize;

    'outer: for i in 0..n {
        for j in (i + 1)..n {
            if compared >= config.max_pairs {
                warn!(
                    compared,
                    max_pairs = config.max_pairs,
                    "Pairwise comparison budget exhausted; leaving remaining pairs unclustered"
                );
                break 'outer;
            }
            if sets.find(i) == sets.find(j) {
                continue;
            }
            compared += 1;
            let score = composite(&features[i], &features[j], &config.weights);
            if score >= config.threshold && sets.union(i, j) {
                merges += 1;
            }
        }
    }

    // Members grouped by root, keyed by the first member's position so the
    // output keeps pool order.
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut first_of_root: HashMap<usize, usize> = HashMap::new();
    for i in 0..n {
        let root = sets.find(i);
        let first = *first_of_root.entry(root).or_insert(i);
        groups.entry(first).or_default().push(i);
    }

    let representatives: HashSet<usize> = groups
        .values()
        .filter_map(|members| {
            members.iter().copied().min_by_key(|&i| {
                (
                    Reverse(features[i].published),
                    Reverse(working[i].reliability_score),
                    i,
                )
            })
        })
        .collect();

    let overflow_total = overflow.len();
    let mut out: Vec<ClassifiedArticle> = working
        .into_iter()
        .enumerate()
        .filter(|(i, _)| representatives.contains(i))
        .map(|(_, a)| a)
        .collect();
    out.extend(overflow.into_iter().take(config.passthrough_cap));

    debug!(
        working = n,
        compared,
        merges,
        clusters = representatives.len(),
        passthrough = overflow_total.min(config.passthrough_cap),
        "Semantic clustering finished"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::test_support::article;
    use chrono::TimeZone;

    fn with_description(mut a: ClassifiedArticle, d: &str) -> ClassifiedArticle {
        a.article.description = d.into();
        a
    }

    #[test]
    fn union_find_is_transitive() {
        let mut uf = UnionFind::new(5);
        assert!(uf.union(0, 1));
        assert!(uf.union(1, 2));
        assert!(!uf.union(0, 2));
        assert_eq!(uf.find(2), uf.find(0));
        assert_ne!(uf.find(3), uf.find(0));
    }

    #[test]
    fn temporal_decay() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let h = |n: i64| Some(t0 + chrono::Duration::hours(n));
        assert_eq!(temporal_similarity(h(0), h(5)), 1.0);
        assert_eq!(temporal_similarity(h(0), h(72)), 0.0);
        assert!((temporal_similarity(h(0), h(39)) - 0.5).abs() < 1e-9);
        assert_eq!(temporal_similarity(None, h(0)), UNKNOWN_TIME_SCORE);
    }

    #[test]
    fn capitalized_words_skip_sentence_stop_words() {
        let words = capitalized_words("The Senate and President Biden's budget");
        assert!(words.contains("senate"));
        assert!(words.contains("president"));
        assert!(words.contains("biden"));
        assert!(!words.contains("the"));
        assert!(!words.contains("budget"));
    }

    #[test]
    fn url_tokens_include_patterns() {
        let t = url_tokens("https://x.com/2024/01/15/senate-budget-vote-1234567.html");
        assert!(t.contains("senate"));
        assert!(t.contains("budget"));
        assert!(t.contains("date:2024-01-15"));
        assert!(t.contains("id:1234567"));
        assert!(!t.contains("html"));
        assert!(url_tokens("not a url").is_empty());
    }

    #[test]
    fn same_story_scores_above_threshold() {
        let a = with_description(
            article(
                "Senate passes budget bill after marathon session",
                "https://a.com/2024/01/15/senate-passes-budget-bill",
                "2024-01-15T10:00:00Z",
            ),
            "Senate Democrats and Republicans approved the Budget Act in Washington.",
        );
        let b = with_description(
            article(
                "Senate passes budget bill after marathon debate",
                "https://b.com/politics/senate-passes-budget-bill",
                "2024-01-15T12:00:00Z",
            ),
            "Washington lawmakers in the Senate backed the Budget Act, Democrats said.",
        );
        let c = with_description(
            article(
                "Wildfire spreads across southern California hills",
                "https://c.com/2024/01/15/wildfire",
                "2024-01-15T11:00:00Z",
            ),
            "Firefighters in California battled flames.",
        );
        let w = Weights::default();
        let cfg = SemanticConfig::default();
        assert!(similarity(&a, &b, &w) >= cfg.threshold);
        assert!(similarity(&a, &c, &w) < cfg.threshold);
    }

    #[test]
    fn representative_is_newest_then_most_reliable() {
        let title = "Senate passes budget bill after vote";
        let mut older = article(title, "https://a.com/1", "2024-01-15T08:00:00Z");
        older.reliability_score = 95;
        let mut newer_low = article(title, "https://b.com/1", "2024-01-15T10:00:00Z");
        newer_low.reliability_score = 40;
        let mut newer_high = article(title, "https://c.com/1", "2024-01-15T10:00:00Z");
        newer_high.reliability_score = 80;

        let out = cluster(vec![newer_low, newer_high, older], &SemanticConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].article.url, "https://c.com/1");
    }

    #[test]
    fn pair_budget_limits_merging() {
        let pool: Vec<_> = (0..4)
            .map(|i| article("Identical story title", &format!("https://x.com/{i}"), "2024-01-15T10:00:00Z"))
            .collect();
        let unbounded = cluster(
            pool.clone(),
            &SemanticConfig {
                threshold: 0.5,
                ..Default::default()
            },
        );
        assert_eq!(unbounded.len(), 1);

        let bounded = cluster(
            pool,
            &SemanticConfig {
                threshold: 0.5,
                max_pairs: 1,
                ..Default::default()
            },
        );
        assert_eq!(bounded.len(), 3);
    }

    #[test]
    fn overflow_passes_through_with_cap() {
        let pool: Vec<_> = (0..10)
            .map(|i| article(&format!("topic{i} alpha{i} beta{i}"), &format!("https://x.com/{i}"), ""))
            .collect();
        let config = SemanticConfig {
            max_items: 4,
            passthrough_cap: 3,
            ..Default::default()
        };
        let out = cluster(pool, &config);
        assert_eq!(out.len(), 7);
        assert_eq!(out[4].article.url, "https://x.com/4");
        assert_eq!(out[6].article.url, "https://x.com/6");
    }
}
