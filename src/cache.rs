//! Process-wide response cache.
//!
//! Entries are keyed by normalized request parameters. An entry younger than
//! the TTL is served as fresh. Older entries are kept until the stale window
//! passes so a quota rejection can fall back to them. Inserting beyond the
//! size bound evicts the oldest-inserted entry.

use crate::models::NewsResponse;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry {
    stored: Instant,
    stored_at: DateTime<Utc>,
    value: NewsResponse,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
}

impl State {
    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// A payload read back from the cache.
#[derive(Debug, Clone)]
pub struct Cached {
    pub value: NewsResponse,
    pub stored_at: DateTime<Utc>,
}

pub struct ResponseCache {
    ttl: Duration,
    stale_window: Duration,
    max_entries: usize,
    state: Mutex<State>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, stale_window: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            stale_window: stale_window.max(ttl),
            max_entries: max_entries.max(1),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation leaves the map consistent, so a poisoned lock is
        // still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A payload stored less than one TTL ago.
    pub fn get_fresh(&self, key: &str) -> Option<Cached> {
        self.get_within(key, self.ttl)
    }

    /// Any payload still inside the stale window, fresh or not.
    pub fn get_stale(&self, key: &str) -> Option<Cached> {
        self.get_within(key, self.stale_window)
    }

    fn get_within(&self, key: &str, max_age: Duration) -> Option<Cached> {
        let mut state = self.lock();
        let entry = state.entries.get(key)?;
        let age = entry.stored.elapsed();
        if age >= self.stale_window {
            state.remove(key);
            debug!(%key, "Purged expired cache entry");
            return None;
        }
        (age < max_age).then(|| Cached {
            value: entry.value.clone(),
            stored_at: entry.stored_at,
        })
    }

    /// Store a payload. A later insert for the same key replaces the earlier
    /// one and counts as the newest entry.
    pub fn insert(&self, key: String, value: NewsResponse) {
        let mut state = self.lock();
        state.remove(&key);

        let stale_window = self.stale_window;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.stored.elapsed() >= stale_window)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            state.remove(k);
        }

        while state.entries.len() >= self.max_entries {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            debug!(key = %oldest, "Evicted oldest cache entry");
        }

        state.order.push_back(key.clone());
        state.entries.insert(
            key,
            Entry {
                stored: Instant::now(),
                stored_at: Utc::now(),
                value,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointKind, PipelineStats};
    use crate::request::RawRequest;

    fn response(total: usize) -> NewsResponse {
        NewsResponse {
            total_articles: total,
            articles: vec![],
            generated_at: Utc::now(),
            endpoint: EndpointKind::Search,
            parameters: RawRequest::default().normalize(),
            stats: PipelineStats::default(),
            stale: None,
        }
    }

    #[test]
    fn fresh_hit_and_miss() {
        let cache = ResponseCache::new(Duration::from_secs(60), Duration::from_secs(600), 10);
        assert!(cache.get_fresh("a").is_none());
        cache.insert("a".into(), response(1));
        assert_eq!(cache.get_fresh("a").unwrap().value.total_articles, 1);
        assert!(cache.get_fresh("b").is_none());
    }

    #[test]
    fn expired_entries_are_stale_only() {
        let cache = ResponseCache::new(Duration::ZERO, Duration::from_secs(600), 10);
        cache.insert("a".into(), response(1));
        assert!(cache.get_fresh("a").is_none());
        assert!(cache.get_stale("a").is_some());
    }

    #[test]
    fn entries_past_stale_window_are_purged() {
        let cache = ResponseCache::new(Duration::ZERO, Duration::ZERO, 10);
        cache.insert("a".into(), response(1));
        assert!(cache.get_stale("a").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn evicts_oldest_inserted_beyond_max() {
        let cache = ResponseCache::new(Duration::from_secs(60), Duration::from_secs(60), 2);
        cache.insert("a".into(), response(1));
        cache.insert("b".into(), response(2));
        cache.insert("a".into(), response(3));
        cache.insert("c".into(), response(4));
        assert_eq!(cache.len(), 2);
        assert!(cache.get_fresh("b").is_none());
        assert_eq!(cache.get_fresh("a").unwrap().value.total_articles, 3);
        assert!(cache.get_fresh("c").is_some());
    }

    #[test]
    fn concurrent_inserts_are_safe() {
        let cache = std::sync::Arc::new(ResponseCache::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            8,
        ));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.insert(format!("{t}-{i}"), response(i));
                        let _ = cache.get_fresh(&format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }
}
