//! Similarity keys and scoring for certified-record retrieval.
//!
//! A key combines description tokens, the declared constraint set and the
//! shape of the reference trajectory. Scoring a query task against a record
//! is cosine overlap on token sets (weight 0.8) plus Jaccard agreement on
//! constraint sets (weight 0.2), so scores stay in `[0, 1]`.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::{ContentDigest, Step, Task};

const TOKEN_WEIGHT: f64 = 0.8;
const CONSTRAINT_WEIGHT: f64 = 0.2;

/// Coarse shape of a trajectory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrajectoryShape {
    pub length: usize,
    pub distinct_actions: usize,
    pub distinct_states: usize,
}

impl TrajectoryShape {
    pub fn of(trajectory: &[Step]) -> Self {
        let actions: HashSet<&str> = trajectory.iter().map(|s| s.action.as_str()).collect();
        let states: HashSet<&str> = trajectory.iter().map(|s| s.state.as_str()).collect();
        Self {
            length: trajectory.len(),
            distinct_actions: actions.len(),
            distinct_states: states.len(),
        }
    }
}

/// Index key for a certified record (or a query built from a bare task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityKey {
    pub tokens: BTreeSet<String>,
    pub constraints: BTreeSet<String>,
    pub shape: TrajectoryShape,
    pub digest: ContentDigest,
}

/// Lowercased alphanumeric word tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

impl SimilarityKey {
    /// Key for a certified episode of `task` whose reference is `trajectory`.
    pub fn for_episode(task: &Task, trajectory: &[Step]) -> Self {
        let tokens = tokenize(&task.description);
        let constraints = task.constraints.clone();
        let shape = TrajectoryShape::of(trajectory);

        let mut canonical = String::new();
        for t in &tokens {
            canonical.push_str(t);
            canonical.push(' ');
        }
        canonical.push('|');
        for c in &constraints {
            canonical.push_str(c);
            canonical.push(' ');
        }
        canonical.push_str(&format!(
            "|{}:{}:{}",
            shape.length, shape.distinct_actions, shape.distinct_states
        ));

        Self {
            tokens,
            constraints,
            shape,
            digest: ContentDigest::from_bytes(canonical.as_bytes()),
        }
    }

    /// Query key for a task with no trajectory yet.
    pub fn for_task(task: &Task) -> Self {
        Self::for_episode(task, &[])
    }

    /// Similarity of this (query) key to a record key, in `[0, 1]`.
    pub fn score(&self, record: &SimilarityKey) -> f64 {
        TOKEN_WEIGHT * cosine_overlap(&self.tokens, &record.tokens)
            + CONSTRAINT_WEIGHT * constraint_agreement(&self.constraints, &record.constraints)
    }
}

fn cosine_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    shared / ((a.len() as f64).sqrt() * (b.len() as f64).sqrt())
}

/// Jaccard agreement; two empty constraint sets match fully.
fn constraint_agreement(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
