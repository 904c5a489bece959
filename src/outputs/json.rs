//! JSON payload files.
//!
//! Files are grouped by the UTC date the payload was generated:
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     ├── budget-vote_141502.json
//!     └── headlines-business_141530.json
//! ```

use crate::models::NewsResponse;
use crate::utils::slugify_title;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// File stem describing what a payload answers: the query text, or the
/// category for topic headlines.
fn payload_stem(response: &NewsResponse) -> String {
    let params = &response.parameters;
    let label = if !params.query.is_empty() {
        params.query.clone()
    } else if let Some(category) = params.category {
        format!("headlines {}", category.as_str())
    } else {
        "headlines".to_string()
    };
    let slug = slugify_title(&label);
    if slug.is_empty() { "request".to_string() } else { slug }
}

/// Write a [`NewsResponse`] to a JSON file under a dated directory.
///
/// The date and time in the path come from the payload's `generated_at`.
///
/// # Arguments
///
/// * `response` - The payload to serialize
/// * `json_output_dir` - Base directory for JSON output
///
/// # Returns
///
/// The path written, or an error if directory creation or file writing fails.
///
/// # Output Path
///
/// `{json_output_dir}/{date}/{slug}_{HHMMSS}.json`
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_response(
    response: &NewsResponse,
    json_output_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(response)?;

    let dir = PathBuf::from(json_output_dir).join(response.generated_at.format("%Y-%m-%d").to_string());
    if let Err(e) = fs::create_dir_all(&dir).await {
        error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let path = dir.join(format!(
        "{}_{}.json",
        payload_stem(response),
        response.generated_at.format("%H%M%S")
    ));
    fs::write(&path, json).await?;
    info!(path = %path.display(), articles = response.total_articles, "Wrote JSON payload");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointKind, PipelineStats};
    use crate::request::RawRequest;
    use chrono::{TimeZone, Utc};

    fn response(q: Option<&str>, category: Option<&str>) -> NewsResponse {
        let params = RawRequest {
            q: q.map(str::to_string),
            category: category.map(str::to_string),
            ..Default::default()
        }
        .normalize();
        NewsResponse {
            total_articles: 0,
            articles: vec![],
            generated_at: Utc.with_ymd_and_hms(2024, 1, 15, 14, 15, 2).unwrap(),
            endpoint: EndpointKind::Search,
            parameters: params,
            stats: PipelineStats::default(),
            stale: None,
        }
    }

    #[test]
    fn stem_from_query_or_category() {
        assert_eq!(payload_stem(&response(Some("Budget Vote!"), None)), "budget-vote");
        assert_eq!(payload_stem(&response(None, Some("business"))), "headlines-business");
        assert_eq!(payload_stem(&response(None, None)), "headlines");
        assert_eq!(payload_stem(&response(Some("!!!"), None)), "request");
    }

    #[tokio::test]
    async fn writes_dated_file() {
        let root = std::env::temp_dir().join(format!("balanced_news_json_{}", std::process::id()));
        let root_str = root.to_string_lossy().to_string();

        let path = write_response(&response(Some("budget"), None), &root_str)
            .await
            .unwrap();
        assert_eq!(path, root.join("2024-01-15").join("budget_141502.json"));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["parameters"]["query"], "budget");
        assert_eq!(written["totalArticles"], 0);
        assert!(written.get("stale").is_none());

        let _ = std::fs::remove_dir_all(&root);
    }
}
