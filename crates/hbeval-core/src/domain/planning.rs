//! Planner phases and the per-attempt planning trace.

use serde::{Deserialize, Serialize};

use super::attempt::Attempt;

/// Per-attempt planner state machine.
///
/// `Nominal → Monitoring → Replanned → (Success | Failed)`; the terminal
/// phases are reachable from any phase once the attempt's outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannerPhase {
    Nominal,
    Monitoring,
    Replanned,
    Success,
    Failed,
}

impl PlannerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for PlannerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nominal => write!(f, "NOMINAL"),
            Self::Monitoring => write!(f, "MONITORING"),
            Self::Replanned => write!(f, "REPLANNED"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why a debounce window ended without a corrective plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PlannerFallback {
    /// Retrieval returned no certified record.
    NoCertifiedMemory,
    /// Best record fell short of the replan similarity bar.
    BelowSimilarityBar { best: f64, bar: f64 },
    /// Retrieval backend fault; the planner degrades to no intervention.
    MemoryUnavailable { detail: String },
}

/// Planner bookkeeping attached to a finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningTrace {
    /// Highest non-terminal phase reached before finalisation.
    pub peak_phase: PlannerPhase,
    pub final_phase: PlannerPhase,
    pub steps_observed: usize,
    pub redundant_steps: usize,
    pub last_pei: f64,
    pub min_pei: f64,
    /// Debounce windows completed (PEI below threshold for the full window).
    pub sustained_windows: usize,
    /// Similarity of the record whose suffix was substituted, if any.
    pub correction_similarity: Option<f64>,
    pub fallbacks: Vec<PlannerFallback>,
    /// True when a replanned attempt went on to succeed.
    pub recovered: bool,
}

impl PlanningTrace {
    pub fn replanned(&self) -> bool {
        self.correction_similarity.is_some()
    }
}

/// Planner activity aggregated across the attempts of an episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningSummary {
    pub attempts_observed: usize,
    pub attempts_monitored: usize,
    pub attempts_replanned: usize,
    pub sustained_windows: usize,
    pub recoveries: usize,
    pub memory_faults: usize,
}

impl PlanningSummary {
    pub fn from_attempts(attempts: &[Attempt]) -> Self {
        let mut summary = Self::default();
        for trace in attempts.iter().filter_map(|a| a.planning.as_ref()) {
            summary.attempts_observed += 1;
            if trace.peak_phase != PlannerPhase::Nominal {
                summary.attempts_monitored += 1;
            }
            if trace.replanned() {
                summary.attempts_replanned += 1;
            }
            if trace.recovered {
                summary.recoveries += 1;
            }
            summary.sustained_windows += trace.sustained_windows;
            summary.memory_faults += trace
                .fallbacks
                .iter()
                .filter(|f| matches!(f, PlannerFallback::MemoryUnavailable { .. }))
                .count();
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display_and_terminal() {
        assert_eq!(PlannerPhase::Monitoring.to_string(), "MONITORING");
        assert!(PlannerPhase::Success.is_terminal());
        assert!(!PlannerPhase::Replanned.is_terminal());
    }

    #[test]
    fn test_phase_serde_uses_screaming_case() {
        let json = serde_json::to_string(&PlannerPhase::Replanned).unwrap();
        assert_eq!(json, "\"REPLANNED\"");
    }

    #[test]
    fn test_fallback_tagging() {
        let json = serde_json::to_value(PlannerFallback::BelowSimilarityBar {
            best: 0.2,
            bar: 0.5,
        })
        .unwrap();
        assert_eq!(json["reason"], "below_similarity_bar");
    }
}
