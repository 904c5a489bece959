//! Near-duplicate clustering: collapse articles that cover the same story.
//!
//! Two interchangeable strategies, selected by [`ClusterMode`]:
//!
//! | Mode | Module | Method |
//! |------|--------|--------|
//! | `title` | [`lexical`] | Sorted key of the first six content words of the title |
//! | `smart` | [`semantic`] | Weighted title/entity/time/URL similarity, union-find merge |
//!
//! Both strategies see the pool newest-first, so when a cluster keeps its
//! first-seen member that member is the most recent one.

pub mod lexical;
pub mod semantic;

use crate::models::{ClassifiedArticle, ClusterMode};
use once_cell::sync::Lazy;
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::info;

/// Words that carry no information about which story a headline covers.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
        "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "down",
        "during", "each", "few", "for", "from", "further", "had", "has", "have", "having",
        "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into", "is", "it",
        "its", "just", "latest", "live", "may", "me", "more", "most", "new", "news", "no",
        "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "out",
        "over", "own", "report", "reports", "said", "same", "says", "she", "should", "so",
        "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
        "they", "this", "those", "through", "to", "too", "under", "until", "up", "update",
        "updates", "very", "was", "we", "were", "what", "when", "where", "which", "while",
        "who", "whom", "why", "will", "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

pub(crate) fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

/// Lower-case word tokens. Punctuation is deleted rather than treated as a
/// separator, so "U.S." and "US" both become `us`; only whitespace splits.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Tokens with stop-words removed.
pub(crate) fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stop_word(t))
        .collect()
}

/// Order articles newest-first. Articles without a usable timestamp go last;
/// the sort is stable so equal timestamps keep pool order.
pub fn sort_newest_first(articles: &mut [ClassifiedArticle]) {
    articles.sort_by_key(|a| Reverse(a.published()));
}

/// Collapse near-duplicates according to `mode`.
pub fn cluster(mut articles: Vec<ClassifiedArticle>, mode: ClusterMode) -> Vec<ClassifiedArticle> {
    if mode == ClusterMode::Off {
        return articles;
    }
    let before = articles.len();
    sort_newest_first(&mut articles);
    let out = match mode {
        ClusterMode::Off => articles,
        ClusterMode::Title => lexical::dedupe(articles),
        ClusterMode::Smart => semantic::cluster(articles, &semantic::SemanticConfig::default()),
    };
    info!(?mode, before, after = out.len(), "Clustered candidate pool");
    out
}
