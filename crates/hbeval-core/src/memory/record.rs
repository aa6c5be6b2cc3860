//! Certified episodic memory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Episode, ReliabilityProfile, ReliabilityStatus, Step};

use super::similarity::SimilarityKey;

/// The profile figures a record was certified on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertifiedSlice {
    pub success_rate: f64,
    pub behavioral_consistency: f64,
    pub variance: f64,
    pub perturbation_robustness: f64,
    pub status: ReliabilityStatus,
}

impl From<&ReliabilityProfile> for CertifiedSlice {
    fn from(profile: &ReliabilityProfile) -> Self {
        Self {
            success_rate: profile.success_rate,
            behavioral_consistency: profile.behavioral_consistency,
            variance: profile.variance,
            perturbation_robustness: profile.perturbation_robustness,
            status: profile.status,
        }
    }
}

/// A certified episode. Immutable once stored; evictable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMemoryRecord {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub episode: Episode,
    pub slice: CertifiedSlice,
    pub certified_at: DateTime<Utc>,
    pub key: SimilarityKey,
    /// Successful trajectory handed to the planner on replanning.
    pub reference: Vec<Step>,
}

impl EpisodicMemoryRecord {
    /// Remaining plan from `current_state`: the reference after the last
    /// step that reached that state, or the whole reference when the
    /// state never occurs in it.
    pub fn suffix_after(&self, current_state: Option<&str>) -> Vec<Step> {
        let position = current_state.and_then(|state| {
            self.reference
                .iter()
                .rposition(|step| step.state == state)
        });
        match position {
            Some(idx) => self.reference[idx + 1..].to_vec(),
            None => self.reference.clone(),
        }
    }
}

/// A record paired with its similarity to the retrieval query.
#[derive(Debug, Clone)]
pub struct RetrievedRecord {
    pub record: std::sync::Arc<EpisodicMemoryRecord>,
    pub similarity: f64,
}
