//! Command-line interface definitions.
//!
//! Request parameters mirror the inbound surface of the aggregator. Provider
//! and runtime settings can also come from environment variables.

use crate::request::RawRequest;
use clap::Parser;

/// Command-line arguments for `balanced_news`.
///
/// # Examples
///
/// ```sh
/// # Balanced sample of ten articles on a keyword
/// balanced_news -q "budget" --balanced
///
/// # Reliable, clustered business headlines written to disk
/// balanced_news -q tariffs --category business --min-reliability 70 --cluster smart -j ./out
///
/// # Several requests sharing one response cache
/// balanced_news --batch requests.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Search text
    #[arg(short, long)]
    pub q: Option<String>,

    /// Two-letter language code
    #[arg(long)]
    pub lang: Option<String>,

    /// Two-letter country code
    #[arg(long)]
    pub country: Option<String>,

    /// Number of articles to return (1-100)
    #[arg(long)]
    pub max: Option<i64>,

    /// Topic category (general, world, nation, business, technology,
    /// entertainment, sports, science, health)
    #[arg(long)]
    pub category: Option<String>,

    /// Content mode: summary or full
    #[arg(long)]
    pub expand: Option<String>,

    /// Earliest publish date (ISO 8601 date or datetime)
    #[arg(long)]
    pub from: Option<String>,

    /// Latest publish date, inclusive (ISO 8601 date or datetime)
    #[arg(long)]
    pub to: Option<String>,

    /// Keep only one bias bucket (left, lean-left, center, lean-right, right)
    #[arg(long)]
    pub bias: Option<String>,

    /// Minimum reliability score (0-100)
    #[arg(long)]
    pub min_reliability: Option<i64>,

    /// Sample evenly across the five bias buckets
    #[arg(long)]
    pub balanced: bool,

    /// Near-duplicate clustering: off, title, or smart
    #[arg(long)]
    pub cluster: Option<String>,

    /// YAML file with a list of requests to run in sequence
    #[arg(long)]
    pub batch: Option<String>,

    /// Output directory for JSON payload files (stdout when omitted)
    #[arg(short, long)]
    pub json_output_dir: Option<String>,

    /// Replacement publisher table (YAML)
    #[arg(long, env = "PUBLISHER_TABLE")]
    pub publishers: Option<String>,

    /// GNews API key
    #[arg(long, env = "GNEWS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Provider base URL
    #[arg(long, env = "GNEWS_BASE_URL", default_value = "https://gnews.io/api/v4/")]
    pub base_url: String,

    /// Timeout for each upstream call, in milliseconds
    #[arg(long, env = "CALL_TIMEOUT_MS", default_value_t = 8000)]
    pub call_timeout_ms: u64,

    /// Delay before the single retry of a failed call, in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 300)]
    pub retry_delay_ms: u64,

    /// Maximum upstream calls per request
    #[arg(long, env = "CALL_BUDGET", default_value_t = 12)]
    pub call_budget: usize,

    /// Seconds a cached payload is served as fresh
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Seconds a cached payload stays available as a stale fallback
    #[arg(long, env = "CACHE_STALE_SECS", default_value_t = 86_400)]
    pub cache_stale_secs: u64,

    /// Maximum cached payloads
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = 100)]
    pub cache_max_entries: usize,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,
}

impl Cli {
    /// The single request described by the command-line flags.
    pub fn raw_request(&self) -> RawRequest {
        RawRequest {
            q: self.q.clone(),
            lang: self.lang.clone(),
            country: self.country.clone(),
            max: self.max,
            category: self.category.clone(),
            expand: self.expand.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            bias: self.bias.clone(),
            min_reliability: self.min_reliability,
            balanced: Some(self.balanced),
            cluster: self.cluster.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BiasBucket, ClusterMode};

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "balanced_news",
            "-q",
            "budget vote",
            "--max",
            "20",
            "--balanced",
            "--cluster",
            "smart",
            "--json-output-dir",
            "./json",
        ]);

        assert_eq!(cli.q.as_deref(), Some("budget vote"));
        assert_eq!(cli.json_output_dir.as_deref(), Some("./json"));
        assert_eq!(cli.call_budget, 12);

        let params = cli.raw_request().normalize();
        assert_eq!(params.max, 20);
        assert!(params.balanced);
        assert_eq!(params.cluster, ClusterMode::Smart);
    }

    #[test]
    fn test_cli_bias_filter() {
        let cli = Cli::parse_from([
            "balanced_news",
            "-q",
            "tariffs",
            "--bias",
            "lean-right",
            "--min-reliability",
            "70",
        ]);
        let params = cli.raw_request().normalize();
        assert_eq!(params.bias, Some(BiasBucket::LeanRight));
        assert_eq!(params.min_reliability, Some(70));
        assert!(!params.balanced);
    }
}
