//! Runtime settings resolved from the command line and environment.

use crate::cli::Cli;
use crate::error::NewsError;
use std::path::PathBuf;
use std::time::Duration;

/// Per-request fetch limits used by the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upstream calls allowed per request, across every fetch phase.
    pub call_budget: usize,
    /// Generic topics fetched to widen a balanced pool.
    pub supplemental_topics: usize,
    /// Domains queried for each under-filled bucket.
    pub backfill_domains: usize,
    /// Pages fetched per backfill domain.
    pub backfill_pages: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            call_budget: 12,
            supplemental_topics: 3,
            backfill_domains: 3,
            backfill_pages: 1,
        }
    }
}

/// Validated process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    pub call_timeout: Duration,
    pub retry_delay: Duration,
    pub cache_ttl: Duration,
    pub cache_stale: Duration,
    pub cache_max_entries: usize,
    pub publishers: Option<PathBuf>,
    pub pipeline: PipelineOptions,
}

impl Settings {
    /// Resolve settings, failing before any outbound call when the provider
    /// key is absent.
    pub fn from_cli(cli: &Cli) -> Result<Self, NewsError> {
        let api_key = cli
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(NewsError::MissingConfig("GNEWS_API_KEY"))?
            .to_string();

        Ok(Self {
            api_key,
            base_url: cli.base_url.clone(),
            call_timeout: Duration::from_millis(cli.call_timeout_ms.max(1)),
            retry_delay: Duration::from_millis(cli.retry_delay_ms),
            cache_ttl: Duration::from_secs(cli.cache_ttl_secs),
            cache_stale: Duration::from_secs(cli.cache_stale_secs.max(cli.cache_ttl_secs)),
            cache_max_entries: cli.cache_max_entries.max(1),
            publishers: cli.publishers.as_ref().map(PathBuf::from),
            pipeline: PipelineOptions {
                call_budget: cli.call_budget.max(1),
                ..PipelineOptions::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn missing_api_key_is_config_error() {
        let mut cli = Cli::parse_from(["balanced_news", "-q", "x"]);
        cli.api_key = None;
        let err = Settings::from_cli(&cli).unwrap_err();
        assert!(matches!(err, NewsError::MissingConfig("GNEWS_API_KEY")));

        cli.api_key = Some("   ".into());
        assert!(Settings::from_cli(&cli).is_err());
    }

    #[test]
    fn settings_from_flags() {
        let cli = Cli::parse_from([
            "balanced_news",
            "--api-key",
            "k",
            "--call-budget",
            "0",
            "--cache-ttl-secs",
            "60",
            "--cache-stale-secs",
            "10",
        ]);
        let s = Settings::from_cli(&cli).unwrap();
        assert_eq!(s.api_key, "k");
        assert_eq!(s.pipeline.call_budget, 1);
        assert_eq!(s.cache_ttl, Duration::from_secs(60));
        assert_eq!(s.cache_stale, Duration::from_secs(60));
    }
}
