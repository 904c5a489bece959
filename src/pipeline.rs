//! Request orchestration.
//!
//! ```text
//! normalize → cache → plan → fetch (primary + supplemental) → merge
//!   → classify → date window → reliability floor → bucket backfill
//!   → cluster → bias filter | balanced sample → truncate → cache
//! ```
//!
//! A quota rejection anywhere in the fetch phases aborts the request; the
//! last cached payload for the same parameters is then served with a stale
//! marker, if one is still inside the stale window.

use crate::api::NewsProvider;
use crate::cache::ResponseCache;
use crate::classifier::PublisherTable;
use crate::cluster;
use crate::config::PipelineOptions;
use crate::error::NewsError;
use crate::fetcher::{CallBudget, PoolFetcher, merge_dedup, supplemental_topics};
use crate::models::{Article, BiasBucket, ClassifiedArticle, NewsResponse, PipelineStats, StaleMarker};
use crate::planner::fetch_plan;
use crate::request::{RawRequest, RequestParameters};
use crate::sampler;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct Aggregator<P> {
    provider: P,
    table: Arc<PublisherTable>,
    cache: ResponseCache,
    options: PipelineOptions,
}

impl<P> Aggregator<P>
where
    P: NewsProvider,
{
    pub fn new(
        provider: P,
        table: Arc<PublisherTable>,
        cache: ResponseCache,
        options: PipelineOptions,
    ) -> Self {
        Self {
            provider,
            table,
            cache,
            options,
        }
    }

    /// Serve one request, from cache when possible.
    #[instrument(level = "info", skip_all, fields(q = %raw.q.as_deref().unwrap_or("")))]
    pub async fn handle(&self, raw: &RawRequest) -> Result<NewsResponse, NewsError> {
        let params = raw.normalize();
        let key = params.cache_key();

        if let Some(hit) = self.cache.get_fresh(&key) {
            info!(cached_at = %hit.stored_at, "Serving cached payload");
            return Ok(hit.value);
        }

        match self.run(&params).await {
            Ok(response) => {
                self.cache.insert(key, response.clone());
                debug!(entries = self.cache.len(), "Cached payload");
                Ok(response)
            }
            Err(e @ NewsError::QuotaExceeded { .. }) => match self.cache.get_stale(&key) {
                Some(hit) => {
                    warn!(error = %e, cached_at = %hit.stored_at, "Quota exceeded; serving stale payload");
                    let mut response = hit.value;
                    response.stale = Some(StaleMarker {
                        reason: "quota_exceeded".to_string(),
                        cached_at: hit.stored_at,
                    });
                    Ok(response)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn run(&self, params: &RequestParameters) -> Result<NewsResponse, NewsError> {
        let plan = fetch_plan(params);
        let budget = CallBudget::new(self.options.call_budget);
        let fetcher = PoolFetcher::new(&self.provider, &budget);
        info!(
            endpoint = ?plan.endpoint,
            target = plan.target,
            max = params.max,
            balanced = params.balanced,
            "Planned fetch"
        );

        let topics = if params.balanced && params.category.is_none() {
            supplemental_topics(Utc::now().date_naive(), self.options.supplemental_topics)
        } else {
            Vec::new()
        };
        let (primary, supplemental) = futures::join!(
            fetcher.fetch_primary(params, &plan),
            fetcher.fetch_supplemental(params, &topics, plan.page_size),
        );
        let mut merged = merge_dedup(std::iter::once(primary?).chain(supplemental?));
        let mut pool = self.classify_and_filter(params, merged.clone());

        if params.balanced {
            let short = self.short_buckets(&pool, params.max);
            if !short.is_empty() {
                let extra = fetcher
                    .fetch_backfill(params, &short, self.options.backfill_pages, plan.page_size)
                    .await?;
                merged = merge_dedup(std::iter::once(merged).chain(extra));
                pool = self.classify_and_filter(params, merged.clone());
            }
        }
        let fetched = merged.len();
        let after_filters = pool.len();

        let pool = cluster::cluster(pool, params.cluster);
        let after_clustering = pool.len();

        let mut articles = if params.balanced {
            sampler::sample(&pool, params.max)
        } else if let Some(bias) = params.bias {
            pool.into_iter().filter(|a| a.bias == Some(bias)).collect()
        } else {
            pool
        };
        articles.truncate(params.max);

        let stats = PipelineStats {
            upstream_calls: budget.used(),
            fetched,
            after_filters,
            after_clustering,
            bucket_counts: bucket_counts(&articles),
        };
        info!(
            returned = articles.len(),
            calls = stats.upstream_calls,
            fetched,
            after_filters,
            after_clustering,
            "Request complete"
        );

        Ok(NewsResponse {
            total_articles: articles.len(),
            articles,
            generated_at: Utc::now(),
            endpoint: plan.endpoint,
            parameters: params.clone(),
            stats,
            stale: None,
        })
    }

    /// Classify, then apply the date window and reliability floor.
    fn classify_and_filter(
        &self,
        params: &RequestParameters,
        articles: Vec<Article>,
    ) -> Vec<ClassifiedArticle> {
        let floor = params.min_reliability.unwrap_or(0);
        let before = articles.len();
        let kept: Vec<ClassifiedArticle> = articles
            .into_iter()
            .map(|a| self.table.classify_article(a))
            .filter(|a| params.in_window(a.published()))
            .filter(|a| a.reliability_score >= floor)
            .collect();
        debug!(before, after = kept.len(), floor, "Applied local filters");
        kept
    }

    /// Buckets holding fewer than their balanced quota, with the domains to
    /// query for each.
    fn short_buckets(&self, pool: &[ClassifiedArticle], max: usize) -> Vec<(BiasBucket, Vec<String>)> {
        let per_bucket = max.div_ceil(BiasBucket::ALL.len());
        BiasBucket::ALL
            .into_iter()
            .filter(|b| pool.iter().filter(|a| a.bias == Some(*b)).count() < per_bucket)
            .map(|b| {
                let domains: Vec<String> = self
                    .table
                    .domains_for(b)
                    .iter()
                    .take(self.options.backfill_domains)
                    .cloned()
                    .collect();
                (b, domains)
            })
            .filter(|(_, domains)| !domains.is_empty())
            .collect()
    }
}

fn bucket_counts(articles: &[ClassifiedArticle]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for a in articles {
        let name = a.bias.map(BiasBucket::as_str).unwrap_or("unclassified");
        *counts.entry(name.to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProviderPage;
    use crate::models::EndpointKind;
    use crate::testing::{ScriptedProvider, article, page_of};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn aggregator(provider: ScriptedProvider, ttl: Duration) -> Aggregator<ScriptedProvider> {
        Aggregator::new(
            provider,
            Arc::new(PublisherTable::builtin().unwrap()),
            ResponseCache::new(ttl, Duration::from_secs(600), 10),
            PipelineOptions::default(),
        )
    }

    fn request(q: &str) -> RawRequest {
        RawRequest {
            q: Some(q.into()),
            ..Default::default()
        }
    }

    fn mixed_page() -> ProviderPage {
        ProviderPage {
            articles: vec![
                article("apnews.com", "a", "2024-01-15T10:00:00Z"),
                article("foxnews.com", "b", "2024-01-15T09:00:00Z"),
                article("unknown-blog.net", "c", "2024-01-15T08:00:00Z"),
                article("www.cnn.com", "d", "2024-01-15T07:00:00Z"),
                article("breitbart.com", "e", "2024-01-15T06:00:00Z"),
            ],
            total: Some(5),
        }
    }

    #[tokio::test]
    async fn classifies_and_echoes_parameters() {
        let agg = aggregator(ScriptedProvider::new(|_| Ok(mixed_page())), Duration::from_secs(60));
        let resp = agg.handle(&request("budget")).await.unwrap();
        assert_eq!(resp.endpoint, EndpointKind::Search);
        assert_eq!(resp.total_articles, 5);
        assert_eq!(resp.parameters.query, "budget");
        assert!(resp.stale.is_none());

        let unknown = &resp.articles[2];
        assert_eq!(unknown.bias, None);
        assert_eq!(unknown.reliability_score, 50);
        let cnn = &resp.articles[3];
        assert_eq!(cnn.bias, Some(BiasBucket::LeanLeft));
        assert_eq!(resp.stats.bucket_counts.get("unclassified"), Some(&1));
    }

    #[tokio::test]
    async fn reliability_floor_is_enforced() {
        let agg = aggregator(ScriptedProvider::new(|_| Ok(mixed_page())), Duration::from_secs(60));
        let raw = RawRequest {
            min_reliability: Some(70),
            ..request("budget")
        };
        let resp = agg.handle(&raw).await.unwrap();
        assert_eq!(resp.total_articles, 2);
        assert!(resp.articles.iter().all(|a| a.reliability_score >= 70));
    }

    #[tokio::test]
    async fn date_window_keeps_unparseable() {
        let provider = ScriptedProvider::new(|_| {
            Ok(ProviderPage {
                articles: vec![
                    article("apnews.com", "dec", "2023-12-31T23:59:59Z"),
                    article("apnews.com", "mid", "2024-01-15T12:00:00Z"),
                    article("apnews.com", "last", "2024-01-31T23:00:00Z"),
                    article("apnews.com", "feb", "2024-02-01T00:00:00Z"),
                    article("apnews.com", "junk", "sometime last week"),
                ],
                total: None,
            })
        });
        let agg = aggregator(provider, Duration::from_secs(60));
        let raw = RawRequest {
            from: Some("2024-01-01".into()),
            to: Some("2024-01-31".into()),
            ..request("budget")
        };
        let resp = agg.handle(&raw).await.unwrap();
        let slugs: Vec<_> = resp
            .articles
            .iter()
            .map(|a| a.article.url.rsplit('/').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(slugs, vec!["mid", "last", "junk"]);
    }

    #[tokio::test]
    async fn bias_filter_keeps_one_bucket() {
        let agg = aggregator(ScriptedProvider::new(|_| Ok(mixed_page())), Duration::from_secs(60));
        let raw = RawRequest {
            bias: Some("right".into()),
            ..request("budget")
        };
        let resp = agg.handle(&raw).await.unwrap();
        assert_eq!(resp.total_articles, 2);
        assert!(resp.articles.iter().all(|a| a.bias == Some(BiasBucket::Right)));
    }

    #[tokio::test]
    async fn balanced_request_backfills_within_budget() {
        let provider = ScriptedProvider::new(|q| match &q.site {
            Some(site) => Ok(page_of(site, &format!("site-{}", q.page), 3, None)),
            None => {
                let prefix = match q.topic {
                    Some(t) => t.as_str().to_string(),
                    None => format!("primary-{}", q.page),
                };
                Ok(page_of("apnews.com", &prefix, 10, Some(10)))
            }
        });
        let agg = aggregator(provider, Duration::from_secs(60));
        let raw = RawRequest {
            balanced: Some(true),
            ..request("budget")
        };
        let resp = agg.handle(&raw).await.unwrap();

        // 1 primary + 3 supplemental + 8 of the 12 wanted backfill calls.
        assert_eq!(resp.stats.upstream_calls, 12);
        assert_eq!(agg.provider.call_count(), 12);
        assert_eq!(resp.total_articles, 10);

        let counts = &resp.stats.bucket_counts;
        assert_eq!(counts.get("left"), Some(&2));
        assert_eq!(counts.get("lean-left"), Some(&2));
        assert_eq!(counts.get("center"), Some(&2));
        // Right had no budget left and borrows from its neighbour.
        assert_eq!(counts.get("lean-right"), Some(&4));
        assert_eq!(counts.get("right"), None);

        let sites: Vec<_> = agg.provider.calls().into_iter().filter_map(|c| c.site).collect();
        assert_eq!(&sites[..3], ["alternet.org", "democracynow.org", "jacobin.com"]);
    }

    #[tokio::test]
    async fn failing_upstream_yields_empty_result() {
        let provider = ScriptedProvider::new(|_| Err(NewsError::Upstream("503".into())));
        let agg = aggregator(provider, Duration::from_secs(60));
        let resp = agg.handle(&request("budget")).await.unwrap();
        assert_eq!(resp.total_articles, 0);
        assert!(resp.articles.is_empty());
    }

    #[tokio::test]
    async fn fresh_cache_hit_skips_upstream() {
        let agg = aggregator(ScriptedProvider::new(|_| Ok(mixed_page())), Duration::from_secs(60));
        agg.handle(&request("budget")).await.unwrap();
        let calls = agg.provider.call_count();
        let again = agg.handle(&request("  budget ")).await.unwrap();
        assert_eq!(agg.provider.call_count(), calls);
        assert_eq!(again.total_articles, 5);
    }

    #[tokio::test]
    async fn quota_rejection_falls_back_to_stale_payload() {
        let exhausted = Arc::new(AtomicBool::new(false));
        let flag = exhausted.clone();
        let provider = ScriptedProvider::new(move |_| {
            if flag.load(Ordering::SeqCst) {
                Err(NewsError::QuotaExceeded {
                    status: 403,
                    message: "daily limit".into(),
                })
            } else {
                Ok(mixed_page())
            }
        });
        let agg = aggregator(provider, Duration::ZERO);

        let first = agg.handle(&request("budget")).await.unwrap();
        assert!(first.stale.is_none());

        exhausted.store(true, Ordering::SeqCst);
        let second = agg.handle(&request("budget")).await.unwrap();
        let marker = second.stale.expect("stale marker");
        assert_eq!(marker.reason, "quota_exceeded");
        assert_eq!(second.total_articles, first.total_articles);

        let err = agg.handle(&request("tariffs")).await.unwrap_err();
        assert!(matches!(err, NewsError::QuotaExceeded { status: 403, .. }));
    }
}
