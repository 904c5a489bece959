//! Balanced sampling across bias buckets.
//!
//! Each of the five buckets is given a quota of `ceil(N / 5)`. Quotas are
//! filled round-robin in canonical order, short buckets borrow from their
//! political neighbours first, and the remainder comes from unclassified and
//! leftover articles. The result is interleaved so the head of the list is
//! already balanced.

use crate::models::{BiasBucket, ClassifiedArticle};
use std::cmp::Reverse;
use std::collections::VecDeque;
use tracing::debug;

const LANES: usize = BiasBucket::ALL.len() + 1;
const UNCLASSIFIED: usize = BiasBucket::ALL.len();

/// Pool indices sorted newest first, unknown timestamps last.
fn newest_first(pool: &[ClassifiedArticle], mut idx: Vec<usize>) -> VecDeque<usize> {
    idx.sort_by_key(|&i| Reverse(pool[i].published()));
    idx.into()
}

struct Selection {
    lanes: [Vec<usize>; LANES],
    total: usize,
    target: usize,
}

impl Selection {
    fn full(&self) -> bool {
        self.total >= self.target
    }

    fn take(&mut self, lane: usize, item: usize) {
        self.lanes[lane].push(item);
        self.total += 1;
    }
}

/// Draw up to `target` articles from `pool`, balanced across bias buckets.
///
/// When every bucket holds at least `ceil(target / 5)` articles the result
/// has exactly `target` items and no bucket exceeds that quota. Otherwise the
/// result still has `min(target, pool.len())` items. The same pool always
/// yields the same sample.
pub fn sample(pool: &[ClassifiedArticle], target: usize) -> Vec<ClassifiedArticle> {
    if target == 0 || pool.is_empty() {
        return Vec::new();
    }

    let mut by_bucket: [Vec<usize>; LANES] = Default::default();
    for (i, a) in pool.iter().enumerate() {
        let lane = a.bias.map(BiasBucket::index).unwrap_or(UNCLASSIFIED);
        by_bucket[lane].push(i);
    }
    let mut queues: [VecDeque<usize>; LANES] = by_bucket.map(|idx| newest_first(pool, idx));

    let per_bucket = target.div_ceil(BiasBucket::ALL.len());
    let mut sel = Selection {
        lanes: Default::default(),
        total: 0,
        target,
    };

    // Quota round-robin.
    loop {
        let mut progressed = false;
        for b in BiasBucket::ALL {
            if sel.full() {
                break;
            }
            let lane = b.index();
            if sel.lanes[lane].len() < per_bucket {
                if let Some(i) = queues[lane].pop_front() {
                    sel.take(lane, i);
                    progressed = true;
                }
            }
        }
        if !progressed || sel.full() {
            break;
        }
    }

    // Short buckets borrow from every other bucket, nearest first.
    for b in BiasBucket::ALL {
        let lane = b.index();
        for donor in b.adjacency() {
            while sel.lanes[lane].len() < per_bucket && !sel.full() {
                match queues[donor.index()].pop_front() {
                    Some(i) => sel.take(lane, i),
                    None => break,
                }
            }
        }
    }

    // Unclassified articles, then every remaining article.
    while !sel.full() {
        match queues[UNCLASSIFIED].pop_front() {
            Some(i) => sel.take(UNCLASSIFIED, i),
            None => break,
        }
    }
    if !sel.full() {
        let rest: Vec<usize> = queues.iter_mut().flat_map(|q| q.drain(..)).collect();
        for i in newest_first(pool, rest) {
            if sel.full() {
                break;
            }
            let lane = pool[i].bias.map(BiasBucket::index).unwrap_or(UNCLASSIFIED);
            sel.take(lane, i);
        }
    }

    let picked = interleave(sel.lanes, target);
    debug!(pool = pool.len(), target, picked = picked.len(), per_bucket, "Balanced sample drawn");
    picked.into_iter().map(|i| pool[i].clone()).collect()
}

/// Round-robin across lanes in canonical order, unclassified last.
fn interleave(lanes: [Vec<usize>; LANES], target: usize) -> Vec<usize> {
    let longest = lanes.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(target);
    for round in 0..longest {
        for lane in &lanes {
            if let Some(&i) = lane.get(round) {
                out.push(i);
            }
        }
    }
    out.truncate(target);
    out
}
