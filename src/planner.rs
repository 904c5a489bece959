//! Overfetch planning.
//!
//! Local post-filters throw candidates away, so the upstream request has to
//! ask for more than the caller wants. Balanced mode needs the most headroom
//! because upstream results skew toward center and lean-left outlets.

use crate::models::EndpointKind;
use crate::request::RequestParameters;

/// Ceiling on the raw number of upstream items requested per fetch plan.
pub const MAX_UPSTREAM_TARGET: usize = 100;
/// Largest page size the provider honors on a single call.
pub const PROVIDER_PAGE_CAP: usize = 25;
/// Most pages fetched for the primary query.
pub const MAX_PAGES: usize = 4;

const BALANCED_FACTOR: f64 = 3.0;
const FILTERED_FACTOR: f64 = 1.5;

/// Which local post-filters will run on the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFilters {
    pub balanced: bool,
    pub bias_filter: bool,
    pub reliability_floor: bool,
    pub clustering: bool,
}

impl ActiveFilters {
    pub fn of(params: &RequestParameters) -> Self {
        Self {
            balanced: params.balanced,
            bias_filter: params.bias.is_some(),
            reliability_floor: params.min_reliability.is_some_and(|r| r > 0),
            clustering: params.cluster != crate::models::ClusterMode::Off,
        }
    }

    fn any_post_filter(&self) -> bool {
        self.bias_filter || self.reliability_floor || self.clustering
    }
}

/// Number of raw upstream items to fetch for `requested` output items.
///
/// The result is never below `requested` and never above
/// [`MAX_UPSTREAM_TARGET`] (unless `requested` itself is larger).
pub fn plan(requested: usize, filters: &ActiveFilters) -> usize {
    let factor = if filters.balanced {
        BALANCED_FACTOR
    } else if filters.any_post_filter() {
        FILTERED_FACTOR
    } else {
        1.0
    };
    let raw = (requested as f64 * factor).ceil() as usize;
    raw.min(MAX_UPSTREAM_TARGET).max(requested)
}

/// How the primary fetch will be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub target: usize,
    pub endpoint: EndpointKind,
    /// Page size requested on the first call.
    pub page_size: usize,
}

/// Build the primary fetch plan for a request.
///
/// A category selects the topic-scoped headlines endpoint. Headlines is also
/// used when there is no query text at all, since search requires one.
pub fn fetch_plan(params: &RequestParameters) -> FetchPlan {
    let target = plan(params.max, &ActiveFilters::of(params));
    let endpoint = if params.category.is_some() || params.query.is_empty() {
        EndpointKind::Headlines
    } else {
        EndpointKind::Search
    };
    FetchPlan {
        target,
        endpoint,
        page_size: target.min(PROVIDER_PAGE_CAP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RawRequest;

    #[test]
    fn no_filters_means_no_overfetch() {
        assert_eq!(plan(10, &ActiveFilters::default()), 10);
        assert_eq!(plan(100, &ActiveFilters::default()), 100);
    }

    #[test]
    fn balanced_triples_within_bounds() {
        let f = ActiveFilters {
            balanced: true,
            ..Default::default()
        };
        let n = plan(10, &f);
        assert!((10..=30).contains(&n));
        assert_eq!(n, 30);
        assert_eq!(plan(50, &f), MAX_UPSTREAM_TARGET);
        assert_eq!(plan(100, &f), 100);
    }

    #[test]
    fn post_filters_add_half() {
        for f in [
            ActiveFilters {
                bias_filter: true,
                ..Default::default()
            },
            ActiveFilters {
                reliability_floor: true,
                ..Default::default()
            },
            ActiveFilters {
                clustering: true,
                ..Default::default()
            },
        ] {
            assert_eq!(plan(10, &f), 15);
            assert_eq!(plan(7, &f), 11);
            assert_eq!(plan(90, &f), 100);
        }
    }

    #[test]
    fn fetch_plan_picks_endpoint() {
        let search = RawRequest {
            q: Some("election".into()),
            ..Default::default()
        }
        .normalize();
        let p = fetch_plan(&search);
        assert_eq!(p.endpoint, EndpointKind::Search);
        assert_eq!(p.target, 10);
        assert_eq!(p.page_size, 10);

        let topic = RawRequest {
            q: Some("election".into()),
            category: Some("world".into()),
            balanced: Some(true),
            max: Some(20),
            ..Default::default()
        }
        .normalize();
        let p = fetch_plan(&topic);
        assert_eq!(p.endpoint, EndpointKind::Headlines);
        assert_eq!(p.target, 60);
        assert_eq!(p.page_size, PROVIDER_PAGE_CAP);

        let empty = RawRequest::default().normalize();
        assert_eq!(fetch_plan(&empty).endpoint, EndpointKind::Headlines);
    }
}
