//! Reliability profile: the per-task statistical certification record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::VarianceBands;
use super::planning::PlanningSummary;

/// Variance band a profile falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReliabilityStatus {
    Stable,
    Volatile,
    Unstable,
}

impl ReliabilityStatus {
    pub fn from_variance(variance: f64, bands: &VarianceBands) -> Self {
        if variance <= bands.stability_bound {
            Self::Stable
        } else if variance >= bands.risk_bound {
            Self::Unstable
        } else {
            Self::Volatile
        }
    }
}

impl std::fmt::Display for ReliabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "STABLE"),
            Self::Volatile => write!(f, "VOLATILE"),
            Self::Unstable => write!(f, "UNSTABLE"),
        }
    }
}

/// Coarse fairness risk derived from variance and composite reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessRisk {
    Low,
    Medium,
    High,
}

impl FairnessRisk {
    pub fn assess(variance: f64, composite: f64, bands: &VarianceBands) -> Self {
        if variance < bands.stability_bound && composite > 0.7 {
            Self::Low
        } else if variance < bands.risk_bound && composite > 0.5 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// Weighted blend of the three headline scores.
pub fn composite_reliability(variance: f64, consistency: f64, robustness: f64) -> f64 {
    (1.0 - variance) * 0.4 + consistency * 0.3 + robustness * 0.3
}

/// Supporting figures behind the headline scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileBreakdown {
    /// Success rate per variant id.
    pub variant_success_rates: BTreeMap<String, f64>,
    /// Relative success-rate drop per perturbation name (negative = improvement).
    pub degradations: BTreeMap<String, f64>,
    /// Consistency per variant id (1.0 where fewer than two successes).
    pub variant_consistency: BTreeMap<String, f64>,
    /// Failure count per category label.
    pub failure_distribution: BTreeMap<String, usize>,
    /// Share of failures falling in the top quarter of categories.
    pub failure_concentration: f64,
    pub top_failing_categories: Vec<String>,
    /// Mean Shannon entropy (bits) of action distributions in failed attempts.
    pub failed_action_entropy: f64,
}

/// Per-task aggregate produced once per evaluation run. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityProfile {
    pub task_id: String,
    pub evaluated_at: DateTime<Utc>,
    /// Set when the run was cancelled and only completed attempts were aggregated.
    pub partial: bool,
    pub repetitions: usize,
    pub variant_count: usize,
    pub attempts: usize,
    pub successes: usize,

    pub success_rate: f64,
    /// Unbiased sample variance of the success indicator (divisor N−1).
    pub variance: f64,
    /// Population variance of the success indicator (divisor N).
    pub population_variance: f64,
    pub behavioral_consistency: f64,
    pub perturbation_robustness: f64,
    /// Normalised entropy of failure categories; 0 when no failures.
    pub failure_clustering: f64,

    pub status: ReliabilityStatus,
    pub composite_reliability: f64,
    pub fairness_risk: FairnessRisk,

    pub breakdown: ProfileBreakdown,
    pub planning: PlanningSummary,
}

impl ReliabilityProfile {
    /// Variance at or above the configured risk bound.
    pub fn is_high_variance(&self, bands: &VarianceBands) -> bool {
        self.variance >= bands.risk_bound
    }

    pub fn failures(&self) -> usize {
        self.attempts - self.successes
    }
}
