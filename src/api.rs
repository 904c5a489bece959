//! Upstream news provider access with timeout and single-retry logic.
//!
//! # Architecture
//!
//! - [`NewsProvider`]: core trait, one call returns one page of articles
//! - [`GNewsClient`]: HTTP implementation against the GNews v4 API
//! - [`RetryProvider`]: decorator adding a per-call timeout and one retry
//!
//! # Failure classes
//!
//! - 401/403: quota or plan rejection, returned immediately, never retried
//! - timeouts, 429, 5xx, transport errors, undecodable bodies: retried once
//!   after a fixed delay, then surfaced to the fetcher, which treats the call
//!   as contributing no articles
//!
//! # Call budget
//!
//! Every attempt, retries included, draws one unit from the request's
//! [`CallBudget`]. A retry that finds the budget spent is abandoned and the
//! failure of the previous attempt is returned instead.

use crate::config::Settings;
use crate::error::NewsError;
use crate::fetcher::CallBudget;
use crate::models::{Article, Category, ContentMode, EndpointKind};
use crate::utils::truncate_for_log;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, instrument, warn};
use url::Url;

/// Parameters for one upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub endpoint: EndpointKind,
    pub query: String,
    pub topic: Option<Category>,
    pub language: String,
    pub country: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Restrict results to one publisher domain.
    pub site: Option<String>,
    pub expand: ContentMode,
    pub page: usize,
    pub page_size: usize,
}

impl SearchQuery {
    /// Same query, different page and page size.
    pub fn page(&self, page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            ..self.clone()
        }
    }

    /// Text sent as `q`, with the site restriction appended.
    pub fn query_text(&self) -> String {
        match &self.site {
            Some(site) if self.query.is_empty() => format!("site:{site}"),
            Some(site) => format!("{} site:{site}", self.query),
            None => self.query.clone(),
        }
    }
}

/// One page of upstream results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderPage {
    pub articles: Vec<Article>,
    /// Total matches reported by the provider, when it reports one.
    pub total: Option<usize>,
}

/// A paginated news search service.
pub trait NewsProvider {
    /// Fetch one page of results for `query`.
    ///
    /// # Arguments
    ///
    /// * `query` - Endpoint, filters, page number and page size for the call
    ///
    /// # Returns
    ///
    /// The page of articles, or the error that ended the call.
    async fn fetch_page(&self, query: &SearchQuery) -> Result<ProviderPage, NewsError>;

    /// Fetch one page, drawing one unit from `budget` for every outbound
    /// attempt.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the budget was already spent and nothing was sent.
    async fn fetch_budgeted(
        &self,
        query: &SearchQuery,
        budget: &CallBudget,
    ) -> Result<Option<ProviderPage>, NewsError> {
        if !budget.try_acquire() {
            return Ok(None);
        }
        self.fetch_page(query).await.map(Some)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GNewsResponse {
    total_articles: Option<usize>,
    #[serde(default)]
    articles: Vec<Article>,
}

/// HTTP client for the GNews v4 API.
#[derive(Clone)]
pub struct GNewsClient {
    client: Client,
    base_url: Url,
    api_key: String,
    call_timeout: Duration,
}

impl fmt::Debug for GNewsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GNewsClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl GNewsClient {
    /// Create a client for the provider rooted at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://gnews.io/api/v4`
    /// * `api_key` - Sent as the `apikey` query parameter on every call
    /// * `call_timeout` - Deadline for a single HTTP exchange
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = GNewsClient::new("https://gnews.io/api/v4", &key, Duration::from_secs(8))?;
    /// ```
    pub fn new(base_url: &str, api_key: &str, call_timeout: Duration) -> Result<Self, NewsError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| NewsError::Internal(format!("invalid provider base URL: {e}")))?;
        let client = Client::builder()
            .timeout(call_timeout)
            .user_agent(concat!("balanced_news/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            call_timeout,
        })
    }

    fn request_url(&self, q: &SearchQuery) -> Result<Url, NewsError> {
        let mut url = self
            .base_url
            .join(q.endpoint.path())
            .map_err(|e| NewsError::Internal(format!("failed to build request URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            let text = q.query_text();
            if !text.is_empty() {
                pairs.append_pair("q", &text);
            }
            pairs.append_pair("lang", &q.language);
            if let Some(country) = &q.country {
                pairs.append_pair("country", country);
            }
            if let Some(topic) = q.topic {
                pairs.append_pair("topic", topic.as_str());
            }
            // Date bounds narrow the search endpoint only; the local window
            // filter is authoritative either way.
            if q.endpoint == EndpointKind::Search {
                if let Some(from) = q.from {
                    pairs.append_pair("from", &from.format("%Y-%m-%dT%H:%M:%SZ").to_string());
                }
                if let Some(to) = q.to {
                    pairs.append_pair("to", &to.format("%Y-%m-%dT%H:%M:%SZ").to_string());
                }
            }
            if q.expand == ContentMode::Full {
                pairs.append_pair("expand", "content");
            }
            pairs.append_pair("max", &q.page_size.to_string());
            pairs.append_pair("page", &q.page.to_string());
            pairs.append_pair("apikey", &self.api_key);
        }
        Ok(url)
    }

    /// Transport failure, reporting timeouts against the configured deadline.
    fn transport_error(&self, e: reqwest::Error) -> NewsError {
        if e.is_timeout() {
            NewsError::Timeout(self.call_timeout.as_millis())
        } else {
            NewsError::from(e)
        }
    }
}

/// Pull a readable message out of a provider error body.
fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("errors").or_else(|| v.get("message")) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.to_string());
    truncate_for_log(&message, 300)
}

impl NewsProvider for GNewsClient {
    #[instrument(level = "debug", skip_all, fields(endpoint = ?query.endpoint, page = query.page, size = query.page_size))]
    async fn fetch_page(&self, query: &SearchQuery) -> Result<ProviderPage, NewsError> {
        let url = self.request_url(query)?;
        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let elapsed_ms = t0.elapsed().as_millis();

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let message = error_message(&body);
            error!(status = status.as_u16(), %message, "Provider rejected request (quota or plan)");
            return Err(NewsError::QuotaExceeded {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(NewsError::Upstream(format!(
                "status {}: {}",
                status.as_u16(),
                error_message(&body)
            )));
        }

        let parsed: GNewsResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, body = %truncate_for_log(&body, 200), "Malformed provider body");
            NewsError::Upstream(format!("malformed response body: {e}"))
        })?;
        let articles: Vec<Article> = parsed.articles.into_iter().map(Article::normalized).collect();
        debug!(elapsed_ms, count = articles.len(), total = ?parsed.total_articles, "Fetched provider page");
        Ok(ProviderPage {
            articles,
            total: parsed.total_articles,
        })
    }
}

/// Wrapper that adds a per-call timeout and bounded fixed-delay retries to
/// any [`NewsProvider`].
///
/// Quota rejections are passed through untouched. When driven through
/// [`NewsProvider::fetch_budgeted`] each attempt is charged to the budget,
/// so retries never push a request past its call cap.
pub struct RetryProvider<T> {
    /// The provider that performs each attempt.
    inner: T,
    /// Attempts allowed after the first one.
    max_retries: usize,
    /// Fixed pause before each retry.
    delay: Duration,
    /// Deadline applied to every attempt.
    call_timeout: Duration,
}

impl<T> RetryProvider<T>
where
    T: NewsProvider,
{
    /// Wrap `inner` with a timeout and retry policy.
    ///
    /// # Arguments
    ///
    /// * `inner` - Provider that performs each attempt
    /// * `max_retries` - Attempts allowed after the first (the pipeline uses 1)
    /// * `delay` - Fixed pause before each retry
    /// * `call_timeout` - Deadline for each attempt; expiry counts as a
    ///   retryable [`NewsError::Timeout`]
    ///
    /// # Example
    ///
    /// ```ignore
    /// let provider = RetryProvider::new(client, 1, Duration::from_millis(300), Duration::from_secs(8));
    /// let page = provider.fetch_page(&query).await?;
    /// ```
    pub fn new(inner: T, max_retries: usize, delay: Duration, call_timeout: Duration) -> Self {
        Self {
            inner,
            max_retries,
            delay,
            call_timeout,
        }
    }

    /// Run attempts until one succeeds, the error is not retryable, retries
    /// run out, or `permit` refuses the next attempt.
    async fn attempts(
        &self,
        query: &SearchQuery,
        mut permit: impl FnMut() -> bool,
    ) -> Result<Option<ProviderPage>, NewsError> {
        let mut attempt = 0usize;
        let mut last_error: Option<NewsError> = None;
        loop {
            if !permit() {
                return match last_error {
                    Some(e) => {
                        debug!(attempt, error = %e, "Call budget exhausted; not retrying");
                        Err(e)
                    }
                    None => Ok(None),
                };
            }
            let t0 = Instant::now();
            let result = match timeout(self.call_timeout, self.inner.fetch_page(query)).await {
                Ok(r) => r,
                Err(_) => Err(NewsError::Timeout(self.call_timeout.as_millis())),
            };
            match result {
                Ok(page) => return Ok(Some(page)),
                Err(e) if !e.is_retryable() || attempt >= self.max_retries => {
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms = t0.elapsed().as_millis(),
                        delay = ?self.delay,
                        error = %e,
                        "Provider call failed; retrying"
                    );
                    last_error = Some(e);
                    sleep(self.delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryProvider")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl<T> NewsProvider for RetryProvider<T>
where
    T: NewsProvider,
{
    #[instrument(level = "debug", skip_all, fields(endpoint = ?query.endpoint, page = query.page))]
    async fn fetch_page(&self, query: &SearchQuery) -> Result<ProviderPage, NewsError> {
        Ok(self.attempts(query, || true).await?.unwrap_or_default())
    }

    #[instrument(level = "debug", skip_all, fields(endpoint = ?query.endpoint, page = query.page))]
    async fn fetch_budgeted(
        &self,
        query: &SearchQuery,
        budget: &CallBudget,
    ) -> Result<Option<ProviderPage>, NewsError> {
        self.attempts(query, || budget.try_acquire()).await
    }
}

/// Build the production provider stack from settings: the HTTP client
/// wrapped in a single-retry [`RetryProvider`].
///
/// # Errors
///
/// Fails when the base URL does not parse or the HTTP client cannot be built.
pub fn build_provider(settings: &Settings) -> Result<RetryProvider<GNewsClient>, NewsError> {
    let client = GNewsClient::new(&settings.base_url, &settings.api_key, settings.call_timeout)?;
    Ok(RetryProvider::new(
        client,
        1,
        settings.retry_delay,
        settings.call_timeout,
    ))
}
