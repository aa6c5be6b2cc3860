//! Capacity eviction and age compaction for certified records.
//!
//! Both passes share one guard: a record that is the only certified
//! reference for its task is never removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::index::MemoryIndex;

/// Result of an eviction or compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionResult {
    pub removed_count: usize,
    pub remaining_count: usize,
    pub removed_ids: Vec<String>,
}

/// Evict records until the index holds at most `max_records`.
///
/// Candidates are ordered by utility (lowest first), then least recently
/// used, then id. `protect` names a record that must survive this pass,
/// typically the one just stored.
pub fn evict_to_capacity(
    index: &mut MemoryIndex,
    max_records: usize,
    protect: Option<&str>,
) -> CompactionResult {
    let mut removed_ids = Vec::new();

    if index.len() > max_records {
        let mut candidates: Vec<(f64, u64, String)> = index
            .iter()
            .filter(|e| Some(e.record.id.as_str()) != protect)
            .map(|e| (e.utility, e.last_used, e.record.id.clone()))
            .collect();
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        for (_, _, id) in candidates {
            if index.len() <= max_records {
                break;
            }
            if index.is_sole_reference(&id) {
                continue;
            }
            if index.remove(&id).is_ok() {
                removed_ids.push(id);
            }
        }

        if index.len() > max_records {
            tracing::warn!(
                len = index.len(),
                max_records,
                "capacity exceeded; remaining records are sole task references"
            );
        }
    }

    CompactionResult {
        removed_count: removed_ids.len(),
        remaining_count: index.len(),
        removed_ids,
    }
}

/// Remove records certified more than `max_age_days` before `now`.
pub fn compact_by_age(
    index: &mut MemoryIndex,
    max_age_days: u64,
    now: DateTime<Utc>,
) -> CompactionResult {
    let cutoff = now - chrono::Duration::days(max_age_days as i64);
    let mut stale: Vec<(DateTime<Utc>, String)> = index
        .iter()
        .filter(|e| e.record.certified_at < cutoff)
        .map(|e| (e.record.certified_at, e.record.id.clone()))
        .collect();
    // Oldest first so a task keeps its newest stale record as the reference.
    stale.sort();

    let mut removed_ids = Vec::new();
    for (_, id) in stale {
        if index.is_sole_reference(&id) {
            continue;
        }
        if index.remove(&id).is_ok() {
            removed_ids.push(id);
        }
    }

    CompactionResult {
        removed_count: removed_ids.len(),
        remaining_count: index.len(),
        removed_ids,
    }
}
