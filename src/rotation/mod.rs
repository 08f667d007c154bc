//! Target rotation
//!
//! Pure selection of the next destination for a link. Nothing here touches
//! storage; callers persist `next_index_to_persist` themselves.
//!
//! The persisted cursor is not linearizable: two concurrent hits can read the
//! same `last_used_target_index`, pick the same target, and both write the
//! same next index. One rotation step is then skipped. Rotation is fair only
//! approximately under contention.

use rand::RngExt;

use crate::config::RotationStrategy;
use crate::models::{Link, Target};

/// Outcome of one rotation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationDecision {
    pub target_url: String,
    /// `None` when the cursor must not move: on fallback to `original_url`,
    /// and for weighted draws, which never read it.
    pub next_index_to_persist: Option<i64>,
}

impl RotationDecision {
    fn fallback(link: &Link) -> Self {
        Self {
            target_url: link.original_url.clone(),
            next_index_to_persist: None,
        }
    }
}

/// Round-robin over target positions. `weight` is not consulted.
pub fn next_target(link: &Link) -> RotationDecision {
    if link.targets.is_empty() {
        return RotationDecision::fallback(link);
    }

    let len = link.targets.len() as i64;
    let current = link.last_used_target_index.unwrap_or(-1);
    // rem_euclid keeps a stale or negative cursor inside the list
    let next = (current + 1).rem_euclid(len);

    select(link, next)
}

/// Cumulative-weight draw. `roll` must be in `0..total_weight`; targets with
/// zero weight are never chosen. Falls back to `original_url` when every
/// weight is zero. The cursor is left alone.
pub fn weighted_target(link: &Link, roll: u64) -> RotationDecision {
    let total = total_weight(&link.targets);
    if total == 0 {
        return RotationDecision::fallback(link);
    }

    let roll = roll % total;
    let mut cumulative = 0u64;
    for (index, target) in link.targets.iter().enumerate() {
        cumulative += u64::from(target.weight);
        if roll < cumulative {
            return RotationDecision {
                next_index_to_persist: None,
                ..select(link, index as i64)
            };
        }
    }

    RotationDecision::fallback(link)
}

/// Applies the configured strategy, drawing from the thread RNG when weighted.
pub fn decide(link: &Link, strategy: RotationStrategy) -> RotationDecision {
    match strategy {
        RotationStrategy::RoundRobin => next_target(link),
        RotationStrategy::Weighted => {
            let total = total_weight(&link.targets);
            if total == 0 {
                return RotationDecision::fallback(link);
            }
            let roll = rand::rng().random_range(0..total);
            weighted_target(link, roll)
        }
    }
}

/// Whether the link's rotation window and click limit allow rotation at `now`
/// (Unix seconds). Open-ended bounds always pass.
pub fn is_rotation_active(link: &Link, now: i64) -> bool {
    if link.rotation_start.is_some_and(|start| now < start) {
        return false;
    }
    if link.rotation_end.is_some_and(|end| now > end) {
        return false;
    }
    if link
        .click_limit
        .is_some_and(|limit| link.click_count >= limit)
    {
        return false;
    }
    true
}

fn total_weight(targets: &[Target]) -> u64 {
    targets.iter().map(|t| u64::from(t.weight)).sum()
}

fn select(link: &Link, index: i64) -> RotationDecision {
    match link.targets.get(index as usize) {
        Some(target) if is_valid_url(&target.url) => RotationDecision {
            target_url: target.url.clone(),
            next_index_to_persist: Some(index),
        },
        _ => RotationDecision::fallback(link),
    }
}

fn is_valid_url(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty()
        && (url.starts_with("http://") || url.starts_with("https://"))
        && reqwest::Url::parse(url).is_ok()
}
