//! The certified episodic store.
//!
//! `EpisodicStore` is the capability the planner and evaluator depend on.
//! `CertifiedMemory` is the in-process implementation: one coarse
//! `tokio::sync::RwLock` around the index, so a retrieval observes either
//! the state before a store or the state after it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::{Episode, MemoryConfig, ReliabilityProfile, Step, Task};
use crate::metrics::METRICS;
use crate::obs;

use super::error::MemoryResult;
use super::index::MemoryIndex;
use super::record::{CertifiedSlice, EpisodicMemoryRecord, RetrievedRecord};
use super::retention::{compact_by_age, evict_to_capacity};
use super::similarity::SimilarityKey;
use super::stats::{StatsRegistry, StatsSnapshot};

// ---------------------------------------------------------------------------
// Certification outcome
// ---------------------------------------------------------------------------

/// Why an episode was not certified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    TaskMismatch { episode_task: String, profile_task: String },
    PartialProfile,
    SuccessBelowBar { observed: f64, bar: f64 },
    ConsistencyBelowBar { observed: f64, bar: f64 },
    NoSuccessfulTrajectory,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskMismatch {
                episode_task,
                profile_task,
            } => write!(f, "episode task {episode_task} does not match profile task {profile_task}"),
            Self::PartialProfile => write!(f, "profile is partial"),
            Self::SuccessBelowBar { observed, bar } => {
                write!(f, "success rate {observed:.3} below bar {bar:.3}")
            }
            Self::ConsistencyBelowBar { observed, bar } => {
                write!(f, "consistency {observed:.3} below bar {bar:.3}")
            }
            Self::NoSuccessfulTrajectory => write!(f, "no successful trajectory to reuse"),
        }
    }
}

/// Result of `certify_and_store`. Rejection is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CertificationOutcome {
    Certified {
        record_id: String,
        evicted: Vec<String>,
    },
    Rejected {
        reason: RejectionReason,
    },
}

impl CertificationOutcome {
    pub fn is_certified(&self) -> bool {
        matches!(self, Self::Certified { .. })
    }
}

/// Apply the certification bar. On acceptance returns the reference
/// trajectory the record will carry.
pub fn check_certification(
    episode: &Episode,
    profile: &ReliabilityProfile,
    config: &MemoryConfig,
) -> Result<Vec<Step>, RejectionReason> {
    if episode.task.id != profile.task_id {
        return Err(RejectionReason::TaskMismatch {
            episode_task: episode.task.id.clone(),
            profile_task: profile.task_id.clone(),
        });
    }
    if profile.partial || episode.partial {
        return Err(RejectionReason::PartialProfile);
    }
    if profile.success_rate < config.success_bar {
        return Err(RejectionReason::SuccessBelowBar {
            observed: profile.success_rate,
            bar: config.success_bar,
        });
    }
    if profile.behavioral_consistency < config.consistency_bar {
        return Err(RejectionReason::ConsistencyBelowBar {
            observed: profile.behavioral_consistency,
            bar: config.consistency_bar,
        });
    }
    episode
        .reference_trajectory()
        .map(<[Step]>::to_vec)
        .ok_or(RejectionReason::NoSuccessfulTrajectory)
}

// ---------------------------------------------------------------------------
// EpisodicStore
// ---------------------------------------------------------------------------

/// Certified storage and similarity retrieval of past episodes.
#[async_trait]
pub trait EpisodicStore: Send + Sync {
    /// Store `episode` if `profile` passes the certification bar.
    async fn certify_and_store(
        &self,
        episode: &Episode,
        profile: &ReliabilityProfile,
    ) -> MemoryResult<CertificationOutcome>;

    /// Up to `k` records scoring at or above the similarity floor, most
    /// similar first. An empty result means no certified memory applies.
    async fn retrieve_similar(&self, task: &Task, k: usize) -> MemoryResult<Vec<RetrievedRecord>>;

    /// Certification statistics for one agent.
    async fn stats(&self, agent_id: &str) -> MemoryResult<StatsSnapshot>;

    /// All stored records, oldest certification first.
    async fn list_records(&self) -> MemoryResult<Vec<Arc<EpisodicMemoryRecord>>>;
}

// ---------------------------------------------------------------------------
// CertifiedMemory
// ---------------------------------------------------------------------------

/// In-process certified memory.
#[derive(Debug)]
pub struct CertifiedMemory {
    config: MemoryConfig,
    index: RwLock<MemoryIndex>,
    stats: Arc<StatsRegistry>,
}

impl CertifiedMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_stats(config, Arc::new(StatsRegistry::new()))
    }

    /// Share a stats registry with the runner so executed and logged
    /// actions land in the same counters.
    pub fn with_stats(config: MemoryConfig, stats: Arc<StatsRegistry>) -> Self {
        Self {
            config,
            index: RwLock::new(MemoryIndex::new()),
            stats,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn stats_registry(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }
}

#[async_trait]
impl EpisodicStore for CertifiedMemory {
    async fn certify_and_store(
        &self,
        episode: &Episode,
        profile: &ReliabilityProfile,
    ) -> MemoryResult<CertificationOutcome> {
        let stats = self.stats.for_agent(&episode.agent_id);
        // The certification call itself is a logged action.
        stats.record_actions_executed(1);
        stats.record_actions_logged(1);

        let reference = match check_certification(episode, profile, &self.config) {
            Ok(reference) => reference,
            Err(reason) => {
                obs::emit_memory_rejected(&episode.task.id, &reason.to_string());
                return Ok(CertificationOutcome::Rejected { reason });
            }
        };

        let record = EpisodicMemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: episode.task.id.clone(),
            agent_id: episode.agent_id.clone(),
            episode: episode.clone(),
            slice: CertifiedSlice::from(profile),
            certified_at: Utc::now(),
            key: SimilarityKey::for_episode(&episode.task, &reference),
            reference,
        };
        let record_id = record.id.clone();

        let evicted = {
            let mut index = self.index.write().await;
            index.insert(record)?;
            let mut evicted = Vec::new();
            if let Some(days) = self.config.max_age_days {
                evicted.extend(compact_by_age(&mut index, days, Utc::now()).removed_ids);
            }
            evicted.extend(
                evict_to_capacity(&mut index, self.config.max_records, Some(&record_id))
                    .removed_ids,
            );
            evicted
        };

        stats.record_actions_logged(episode.total_actions());
        METRICS.inc_certifications();
        obs::emit_memory_certified(&episode.task.id, &record_id);
        if !evicted.is_empty() {
            obs::emit_memory_evicted(&evicted);
        }

        Ok(CertificationOutcome::Certified { record_id, evicted })
    }

    async fn retrieve_similar(&self, task: &Task, k: usize) -> MemoryResult<Vec<RetrievedRecord>> {
        let query = SimilarityKey::for_task(task);
        let hits = self
            .index
            .write()
            .await
            .query(&query, self.config.min_similarity, k);
        obs::emit_memory_retrieved(&task.id, k, hits.len(), hits.first().map(|h| h.similarity));
        Ok(hits)
    }

    async fn stats(&self, agent_id: &str) -> MemoryResult<StatsSnapshot> {
        Ok(self.stats.snapshot(agent_id))
    }

    async fn list_records(&self) -> MemoryResult<Vec<Arc<EpisodicMemoryRecord>>> {
        let index = self.index.read().await;
        let mut records: Vec<Arc<EpisodicMemoryRecord>> =
            index.iter().map(|e| Arc::clone(&e.record)).collect();
        records.sort_by(|a, b| {
            a.certified_at
                .cmp(&b.certified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }
}
