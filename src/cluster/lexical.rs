//! Lexical clustering on a normalized title key.

use super::content_tokens;
use crate::models::ClassifiedArticle;
use itertools::Itertools;
use std::collections::HashSet;
use tracing::debug;

const KEY_TOKENS: usize = 6;

/// Clustering key for a title: the first six distinct content words, sorted
/// and joined with `|`. Word order within the headline does not matter.
pub fn title_key(title: &str) -> String {
    content_tokens(title)
        .into_iter()
        .unique()
        .take(KEY_TOKENS)
        .sorted()
        .join("|")
}

/// Keep the first article seen for each title key.
///
/// Titles that reduce to an empty key are kept by identity, so blank or
/// stop-word-only headlines are never merged with each other.
pub fn dedupe(articles: Vec<ClassifiedArticle>) -> Vec<ClassifiedArticle> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(articles.len());
    for article in articles {
        let key = title_key(&article.article.title);
        let key = if key.is_empty() {
            format!("id:{}", article.article.identity().unwrap_or_default())
        } else {
            key
        };
        if seen.insert(key.clone()) {
            kept.push(article);
        } else {
            debug!(%key, url = %article.article.url, "Dropped lexical duplicate");
        }
    }
    kept
}
