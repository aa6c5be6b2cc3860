//! In-memory similarity index over certified records.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{MemoryError, MemoryResult};
use super::record::{EpisodicMemoryRecord, RetrievedRecord};
use super::similarity::SimilarityKey;

/// A stored record plus its usage bookkeeping.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub record: Arc<EpisodicMemoryRecord>,
    /// Highest similarity this record has scored in a served retrieval.
    pub utility: f64,
    /// Logical tick of the last insert or retrieval that touched the record.
    pub last_used: u64,
}

/// Certified records keyed by id, with a per-task reference count.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: BTreeMap<String, IndexedRecord>,
    per_task: BTreeMap<String, usize>,
    tick: u64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Insert a record. Ids are unique.
    pub fn insert(&mut self, record: EpisodicMemoryRecord) -> MemoryResult<Arc<EpisodicMemoryRecord>> {
        if self.entries.contains_key(&record.id) {
            return Err(MemoryError::Unavailable(format!(
                "duplicate record id: {}",
                record.id
            )));
        }
        let tick = self.next_tick();
        let record = Arc::new(record);
        *self.per_task.entry(record.task_id.clone()).or_insert(0) += 1;
        self.entries.insert(
            record.id.clone(),
            IndexedRecord {
                record: Arc::clone(&record),
                utility: 0.0,
                last_used: tick,
            },
        );
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<&IndexedRecord> {
        self.entries.get(id)
    }

    pub fn remove(&mut self, id: &str) -> MemoryResult<IndexedRecord> {
        let removed = self
            .entries
            .remove(id)
            .ok_or_else(|| MemoryError::RecordNotFound { id: id.to_string() })?;
        if let Some(count) = self.per_task.get_mut(&removed.record.task_id) {
            *count -= 1;
            if *count == 0 {
                self.per_task.remove(&removed.record.task_id);
            }
        }
        Ok(removed)
    }

    /// True when `id` is the only certified record for its task.
    pub fn is_sole_reference(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .and_then(|e| self.per_task.get(&e.record.task_id))
            .is_some_and(|count| *count <= 1)
    }

    pub fn records_for_task(&self, task_id: &str) -> usize {
        self.per_task.get(task_id).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedRecord> {
        self.entries.values()
    }

    /// Score every record against `query`, keep those at or above `floor`,
    /// and return at most `k` ordered by non-increasing similarity.
    /// Ties prefer the more recently certified record, then the smaller id.
    /// Served records have their usage bookkeeping refreshed.
    pub fn query(&mut self, query: &SimilarityKey, floor: f64, k: usize) -> Vec<RetrievedRecord> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<RetrievedRecord> = self
            .entries
            .values()
            .map(|e| RetrievedRecord {
                record: Arc::clone(&e.record),
                similarity: query.score(&e.record.key),
            })
            .filter(|r| r.similarity >= floor)
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.record.certified_at.cmp(&a.record.certified_at))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        scored.truncate(k);

        let tick = self.next_tick();
        for hit in &scored {
            if let Some(entry) = self.entries.get_mut(&hit.record.id) {
                entry.utility = entry.utility.max(hit.similarity);
                entry.last_used = tick;
            }
        }
        scored
    }
}
