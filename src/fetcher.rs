//! Candidate pool fetching.
//!
//! Every outbound call made for one request goes through a [`PoolFetcher`],
//! which enforces the request's [`CallBudget`] and converts per-call failures
//! into empty results. Only request-fatal errors (quota rejection) propagate.
//!
//! Fetch phases:
//!
//! 1. **Primary**: page 1 alone to learn the effective page size, then the
//!    remaining pages in parallel
//! 2. **Supplemental**: a few rotating generic topics to widen balanced pools
//! 3. **Backfill**: site-scoped searches against publishers of short buckets
//!
//! Fan-out batches are joined all-settled; results are merged afterwards
//! with [`merge_dedup`].

use crate::api::{NewsProvider, ProviderPage, SearchQuery};
use crate::error::NewsError;
use crate::models::{Article, BiasBucket, Category, EndpointKind};
use crate::planner::{FetchPlan, MAX_PAGES, PROVIDER_PAGE_CAP};
use crate::request::RequestParameters;
use chrono::{Datelike, NaiveDate};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, instrument, warn};

/// Topics cycled through for supplemental fetches.
const ROTATING_TOPICS: [Category; 6] = [
    Category::World,
    Category::Business,
    Category::Technology,
    Category::Science,
    Category::Health,
    Category::Nation,
];

/// Upper bound on outbound calls for one request.
///
/// Every HTTP attempt counts, retries included.
#[derive(Debug)]
pub struct CallBudget {
    limit: usize,
    used: AtomicUsize,
}

impl CallBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Reserve one call. Returns `false` once the budget is spent.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

/// Query for the primary fetch of a request.
pub fn primary_query(params: &RequestParameters, plan: &FetchPlan) -> SearchQuery {
    SearchQuery {
        endpoint: plan.endpoint,
        query: params.query.clone(),
        topic: params.category,
        language: params.language.clone(),
        country: params.country.clone(),
        from: params.from,
        to: params.to,
        site: None,
        expand: params.expand,
        page: 1,
        page_size: plan.page_size,
    }
}

/// `count` topics from the rotation, starting at an offset that advances
/// one step per day.
pub fn supplemental_topics(day: NaiveDate, count: usize) -> Vec<Category> {
    let offset = day.num_days_from_ce().unsigned_abs() as usize % ROTATING_TOPICS.len();
    ROTATING_TOPICS
        .iter()
        .cycle()
        .skip(offset)
        .take(count.min(ROTATING_TOPICS.len()))
        .copied()
        .collect()
}

/// Merge article batches, keeping one article per identity.
///
/// When an identity repeats, the copy with the newer publish timestamp
/// replaces the earlier one in place, and a parseable timestamp counts as
/// newer than an unparseable one. Ties keep the first seen.
/// Articles without any identity are dropped. Applying the merge to its own
/// output changes nothing.
pub fn merge_dedup<I>(batches: I) -> Vec<Article>
where
    I: IntoIterator<Item = Vec<Article>>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Article> = Vec::new();
    let mut dropped = 0usize;

    for article in batches.into_iter().flatten() {
        let Some(id) = article.identity().map(str::to_string) else {
            dropped += 1;
            continue;
        };
        match index.get(&id) {
            Some(&i) => {
                // A missing or unparseable timestamp ranks below any real one.
                if article.published() > merged[i].published() {
                    merged[i] = article;
                }
                dropped += 1;
            }
            None => {
                index.insert(id, merged.len());
                merged.push(article);
            }
        }
    }
    if dropped > 0 {
        debug!(dropped, kept = merged.len(), "Merged duplicate articles");
    }
    merged
}

/// Issues upstream calls for one request.
pub struct PoolFetcher<'a, P> {
    provider: &'a P,
    budget: &'a CallBudget,
}

impl<'a, P> PoolFetcher<'a, P>
where
    P: NewsProvider,
{
    /// Create a fetcher that charges every call to `budget`.
    pub fn new(provider: &'a P, budget: &'a CallBudget) -> Self {
        Self { provider, budget }
    }

    /// One budgeted call. `Ok(None)` means the call was skipped or failed
    /// and contributes nothing.
    async fn call(&self, query: &SearchQuery) -> Result<Option<ProviderPage>, NewsError> {
        match self.provider.fetch_budgeted(query, self.budget).await {
            Ok(Some(page)) => Ok(Some(page)),
            Ok(None) => {
                debug!(endpoint = ?query.endpoint, page = query.page, "Call budget exhausted; skipping");
                Ok(None)
            }
            Err(e) if e.is_request_fatal() => Err(e),
            Err(e) => {
                warn!(
                    endpoint = ?query.endpoint,
                    page = query.page,
                    site = ?query.site,
                    error = %e,
                    "Upstream call failed; continuing without its results"
                );
                Ok(None)
            }
        }
    }

    /// Run a batch of calls concurrently and collect every article, in batch
    /// order. A fatal error is returned only after the whole batch settles.
    async fn fan_out(&self, queries: Vec<SearchQuery>) -> Result<Vec<Vec<Article>>, NewsError> {
        let results = join_all(queries.iter().map(|q| self.call(q))).await;
        let mut batches = Vec::with_capacity(results.len());
        let mut fatal = None;
        for result in results {
            match result {
                Ok(Some(page)) => batches.push(page.articles),
                Ok(None) => {}
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(batches),
        }
    }

    /// Fetch up to `target` articles for `base`, paging as needed.
    ///
    /// Page 1 is requested alone. The number of articles it returns is the
    /// page size the provider actually honors, and the remaining pages are
    /// requested at that size so page offsets line up.
    ///
    /// # Arguments
    ///
    /// * `base` - Query for page 1; its page size is the size requested first
    /// * `target` - Number of articles wanted across all pages
    ///
    /// # Returns
    ///
    /// Articles in page order. Failed or unbudgeted pages contribute nothing;
    /// only a quota rejection is returned as an error.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let budget = CallBudget::new(12);
    /// let fetcher = PoolFetcher::new(&provider, &budget);
    /// let articles = fetcher.fetch_paged(&primary_query(&params, &plan), plan.target).await?;
    /// ```
    #[instrument(level = "info", skip_all, fields(endpoint = ?base.endpoint, wanted = target))]
    pub async fn fetch_paged(&self, base: &SearchQuery, target: usize) -> Result<Vec<Article>, NewsError> {
        let first_size = base.page_size.clamp(1, PROVIDER_PAGE_CAP);
        let Some(first) = self.call(&base.page(1, first_size)).await? else {
            return Ok(Vec::new());
        };
        let effective = first.articles.len();
        let mut articles = first.articles;
        if effective == 0 || effective >= target {
            return Ok(articles);
        }

        let mut pages = target.div_ceil(effective);
        if let Some(total) = first.total {
            pages = pages.min(total.div_ceil(effective));
        }
        let pages = pages.min(MAX_PAGES);
        if pages <= 1 {
            return Ok(articles);
        }

        debug!(effective, pages, "Fetching remaining pages");
        let rest = self
            .fan_out((2..=pages).map(|p| base.page(p, effective)).collect())
            .await?;
        for batch in rest {
            articles.extend(batch);
        }
        info!(count = articles.len(), pages, "Fetched paged results");
        Ok(articles)
    }

    /// Primary fetch described by the plan.
    pub async fn fetch_primary(
        &self,
        params: &RequestParameters,
        plan: &FetchPlan,
    ) -> Result<Vec<Article>, NewsError> {
        self.fetch_paged(&primary_query(params, plan), plan.target).await
    }

    /// Single-page headlines for each topic, carrying the query text.
    #[instrument(level = "info", skip_all, fields(topics = ?topics))]
    pub async fn fetch_supplemental(
        &self,
        params: &RequestParameters,
        topics: &[Category],
        page_size: usize,
    ) -> Result<Vec<Vec<Article>>, NewsError> {
        let queries = topics
            .iter()
            .map(|topic| SearchQuery {
                endpoint: EndpointKind::Headlines,
                query: params.query.clone(),
                topic: Some(*topic),
                language: params.language.clone(),
                country: params.country.clone(),
                from: None,
                to: None,
                site: None,
                expand: params.expand,
                page: 1,
                page_size: page_size.clamp(1, PROVIDER_PAGE_CAP),
            })
            .collect();
        self.fan_out(queries).await
    }

    /// Site-scoped searches for under-filled buckets: `pages` pages for each
    /// listed domain.
    #[instrument(level = "info", skip_all, fields(buckets = targets.len()))]
    pub async fn fetch_backfill(
        &self,
        params: &RequestParameters,
        targets: &[(BiasBucket, Vec<String>)],
        pages: usize,
        page_size: usize,
    ) -> Result<Vec<Vec<Article>>, NewsError> {
        let mut queries = Vec::new();
        for (bucket, domains) in targets {
            debug!(%bucket, ?domains, "Backfilling bucket");
            for domain in domains {
                for page in 1..=pages {
                    queries.push(SearchQuery {
                        endpoint: EndpointKind::Search,
                        query: params.query.clone(),
                        topic: None,
                        language: params.language.clone(),
                        country: params.country.clone(),
                        from: params.from,
                        to: params.to,
                        site: Some(domain.clone()),
                        expand: params.expand,
                        page,
                        page_size: page_size.clamp(1, PROVIDER_PAGE_CAP),
                    });
                }
            }
        }
        self.fan_out(queries).await
    }
}
