//! Test doubles shared by fetcher and pipeline tests.

use crate::api::{NewsProvider, ProviderPage, SearchQuery};
use crate::error::NewsError;
use crate::models::{Article, Publisher};
use std::sync::Mutex;

type Handler = Box<dyn Fn(&SearchQuery) -> Result<ProviderPage, NewsError> + Send + Sync>;

/// Provider that answers every call with a closure and records the queries
/// it received.
pub struct ScriptedProvider {
    handler: Handler,
    calls: Mutex<Vec<SearchQuery>>,
}

impl ScriptedProvider {
    pub fn new(
        handler: impl Fn(&SearchQuery) -> Result<ProviderPage, NewsError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<SearchQuery> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl NewsProvider for ScriptedProvider {
    async fn fetch_page(&self, query: &SearchQuery) -> Result<ProviderPage, NewsError> {
        self.calls.lock().unwrap().push(query.clone());
        (self.handler)(query)
    }
}

/// An article published by `domain`, with a URL unique to `slug`.
pub fn article(domain: &str, slug: &str, published_at: &str) -> Article {
    Article {
        title: format!("{slug} story from {domain}"),
        description: String::new(),
        content: String::new(),
        url: format!("https://{domain}/{slug}"),
        image: String::new(),
        published_at: published_at.to_string(),
        source: Publisher {
            name: domain.to_string(),
            url: format!("https://{domain}"),
        },
    }
}

/// A page of `n` distinct articles from `domain`.
pub fn page_of(domain: &str, prefix: &str, n: usize, total: Option<usize>) -> ProviderPage {
    ProviderPage {
        articles: (0..n)
            .map(|i| article(domain, &format!("{prefix}-{i}"), "2024-01-15T10:00:00Z"))
            .collect(),
        total,
    }
}
