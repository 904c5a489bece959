//! # Balanced News
//!
//! A news aggregation pipeline that queries an upstream news search API,
//! tags every article with its publisher's political leaning and
//! reliability, collapses near-duplicate stories, and returns a set that is
//! optionally balanced across the five bias buckets.
//!
//! ## Usage
//!
//! ```sh
//! GNEWS_API_KEY=... balanced_news -q "budget" --balanced --cluster smart
//! balanced_news --batch requests.yaml -j ./json
//! ```
//!
//! ## Architecture
//!
//! 1. **Planning**: decide how many raw items to request given the filters
//! 2. **Fetching**: paged and supplemental upstream calls under a call budget
//! 3. **Classification**: bias and reliability lookup by publisher domain
//! 4. **Filtering**: date window, reliability floor, near-duplicate clustering
//! 5. **Selection**: single-bias filter or balanced sampling
//! 6. **Output**: JSON payloads on stdout or in dated files

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cache;
mod classifier;
mod cli;
mod cluster;
mod config;
mod error;
mod fetcher;
mod models;
mod outputs;
mod pipeline;
mod planner;
mod request;
mod sampler;
#[cfg(test)]
mod testing;
mod utils;

use api::build_provider;
use cache::ResponseCache;
use classifier::PublisherTable;
use cli::Cli;
use config::Settings;
use error::{ErrorReport, NewsError};
use models::NewsResponse;
use outputs::json;
use pipeline::Aggregator;
use request::{RawRequest, parse_batch};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("balanced_news starting up");

    let args = Cli::parse();
    debug!(?args.batch, ?args.json_output_dir, ?args.publishers, "Parsed CLI arguments");

    match run(&args).await {
        Ok(0) => {
            info!(elapsed_ms = start_time.elapsed().as_millis(), "balanced_news finished");
            Ok(())
        }
        Ok(failures) => {
            error!(failures, elapsed_ms = start_time.elapsed().as_millis(), "Some requests failed");
            std::process::exit(1);
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "balanced_news failed");
            report(&e, args.pretty)?;
            std::process::exit(1);
        }
    }
}

/// Serve every request and return how many failed.
async fn run(args: &Cli) -> Result<usize, NewsError> {
    let settings = Settings::from_cli(args)?;

    let table = match &settings.publishers {
        Some(path) => PublisherTable::load(path)?,
        None => PublisherTable::builtin()?,
    };
    let provider = build_provider(&settings)?;
    let cache = ResponseCache::new(
        settings.cache_ttl,
        settings.cache_stale,
        settings.cache_max_entries,
    );
    let aggregator = Aggregator::new(provider, Arc::new(table), cache, settings.pipeline.clone());

    // Early check: output dir must be writable before any upstream call.
    if let Some(dir) = &args.json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "JSON output directory is not writable");
            return Err(NewsError::Internal(format!("output directory {dir} is not writable: {e}")));
        }
    }

    let requests: Vec<RawRequest> = match &args.batch {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            let batch = parse_batch(&text)?;
            info!(path = %path, requests = batch.len(), "Loaded batch file");
            batch
        }
        None => vec![args.raw_request()],
    };

    let mut failures = 0usize;
    for (index, raw) in requests.iter().enumerate() {
        match aggregator.handle(raw).await {
            Ok(response) => {
                if let Err(e) = emit(&response, args).await {
                    error!(index, error = %e, "Failed to write payload");
                    failures += 1;
                }
            }
            Err(e) => {
                error!(index, kind = e.kind(), error = %e, "Request failed");
                if let Err(out) = report(&e, args.pretty) {
                    error!(index, error = %out, "Failed to render error report");
                }
                failures += 1;
            }
        }
    }
    Ok(failures)
}

/// Print a payload, or write it to the JSON output directory.
async fn emit(response: &NewsResponse, args: &Cli) -> Result<(), Box<dyn Error>> {
    match &args.json_output_dir {
        Some(dir) => {
            json::write_response(response, dir).await?;
        }
        None => println!("{}", render(response, args.pretty)?),
    }
    Ok(())
}

fn report(err: &NewsError, pretty: bool) -> Result<(), serde_json::Error> {
    println!("{}", render(&ErrorReport::new(err), pretty)?);
    Ok(())
}

fn render<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}
