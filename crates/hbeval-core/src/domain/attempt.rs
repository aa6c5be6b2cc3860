//! Attempts, trajectories, and episodes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::planning::PlanningTrace;
use super::task::{Task, Variant};

/// One action taken by the agent and the state it led to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    /// Observable state after the action; recurrence marks redundancy.
    pub state: String,
}

impl Step {
    pub fn new(action: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            state: state.into(),
        }
    }
}

/// Coarse failure taxonomy used for clustering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Attempt or memory retrieval exceeded its bound, or the step budget ran out.
    Timeout,
    NoAction,
    InvalidAction,
    IncorrectOutput,
    ConstraintViolation,
    /// The agent capability itself returned an error.
    AgentFault,
    /// Agent-supplied label outside the built-in taxonomy.
    Other(String),
}

impl FailureCategory {
    /// Stable label used as the clustering key.
    pub fn label(&self) -> String {
        match self {
            Self::Timeout => "timeout".into(),
            Self::NoAction => "no_action".into(),
            Self::InvalidAction => "invalid_action".into(),
            Self::IncorrectOutput => "incorrect_output".into(),
            Self::ConstraintViolation => "constraint_violation".into(),
            Self::AgentFault => "agent_fault".into(),
            Self::Other(label) => label.clone(),
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// What the agent capability reports for a single attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub success: bool,
    pub trajectory: Vec<Step>,
    /// Action cost count as accounted by the agent.
    pub cost: u64,
    /// Optional agent-supplied failure label.
    pub failure_category: Option<FailureCategory>,
}

impl AttemptReport {
    pub fn success(trajectory: Vec<Step>) -> Self {
        let cost = trajectory.len() as u64;
        Self {
            success: true,
            trajectory,
            cost,
            failure_category: None,
        }
    }

    pub fn failure(trajectory: Vec<Step>, category: Option<FailureCategory>) -> Self {
        let cost = trajectory.len() as u64;
        Self {
            success: false,
            trajectory,
            cost,
            failure_category: category,
        }
    }
}

/// Classify an unlabelled failure from its trajectory.
pub fn classify_failure(trajectory: &[Step], task: &Task) -> FailureCategory {
    if trajectory.len() >= task.max_steps {
        return FailureCategory::Timeout;
    }
    match trajectory.last() {
        None => FailureCategory::NoAction,
        Some(step) if step.action == "invalid" => FailureCategory::InvalidAction,
        Some(_) => FailureCategory::IncorrectOutput,
    }
}

/// One completed execution of a variant. Never mutated after completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub task_id: String,
    pub variant_id: String,
    pub perturbation: Option<String>,
    /// Repetition index within its variant (0-based).
    pub repetition: usize,
    pub success: bool,
    pub trajectory: Vec<Step>,
    pub cost: u64,
    pub wall_time_ms: u64,
    /// Present iff `success == false`.
    pub failure_category: Option<FailureCategory>,
    /// Planner bookkeeping when the attempt ran under the adaptive planner.
    pub planning: Option<PlanningTrace>,
    pub completed_at: DateTime<Utc>,
}

impl Attempt {
    /// Build an attempt from the agent's report, labelling unlabelled failures.
    pub fn from_report(
        task: &Task,
        variant: &Variant,
        repetition: usize,
        report: AttemptReport,
        wall_time_ms: u64,
    ) -> Self {
        let failure_category = if report.success {
            None
        } else {
            Some(
                report
                    .failure_category
                    .unwrap_or_else(|| classify_failure(&report.trajectory, task)),
            )
        };
        Self {
            id: Uuid::new_v4(),
            task_id: task.id.clone(),
            variant_id: variant.id.clone(),
            perturbation: variant.perturbation.clone(),
            repetition,
            success: report.success,
            trajectory: report.trajectory,
            cost: report.cost,
            wall_time_ms,
            failure_category,
            planning: None,
            completed_at: Utc::now(),
        }
    }

    /// A failed attempt with a forced category and whatever trajectory was seen.
    pub fn failed(
        task: &Task,
        variant: &Variant,
        repetition: usize,
        category: FailureCategory,
        trajectory: Vec<Step>,
        wall_time_ms: u64,
    ) -> Self {
        let cost = trajectory.len() as u64;
        Self {
            id: Uuid::new_v4(),
            task_id: task.id.clone(),
            variant_id: variant.id.clone(),
            perturbation: variant.perturbation.clone(),
            repetition,
            success: false,
            trajectory,
            cost,
            wall_time_ms,
            failure_category: Some(category),
            planning: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_planning(mut self, planning: PlanningTrace) -> Self {
        self.planning = Some(planning);
        self
    }

    /// The ordered action sequence, used for edit-distance comparison.
    pub fn actions(&self) -> Vec<&str> {
        self.trajectory.iter().map(|s| s.action.as_str()).collect()
    }

    pub fn indicator(&self) -> f64 {
        if self.success {
            1.0
        } else {
            0.0
        }
    }
}

/// All attempts for one task across its variants. Read-only once complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Identity of the agent that produced the attempts.
    pub agent_id: String,
    pub task: Task,
    pub variants: Vec<Variant>,
    /// Repetitions requested per variant.
    pub repetitions: usize,
    pub attempts: Vec<Attempt>,
    /// True when the run was cancelled before every attempt completed.
    pub partial: bool,
}

impl Episode {
    /// Attempts grouped by variant id.
    pub fn attempts_by_variant(&self) -> BTreeMap<&str, Vec<&Attempt>> {
        let mut groups: BTreeMap<&str, Vec<&Attempt>> = BTreeMap::new();
        for attempt in &self.attempts {
            groups
                .entry(attempt.variant_id.as_str())
                .or_default()
                .push(attempt);
        }
        groups
    }

    /// Number of attempts the run was scheduled to execute.
    pub fn expected_attempts(&self) -> usize {
        self.repetitions * self.variants.len()
    }

    pub fn total_actions(&self) -> u64 {
        self.attempts.iter().map(|a| a.trajectory.len() as u64).sum()
    }

    /// Shortest successful trajectory, preferring the unperturbed variant.
    pub fn reference_trajectory(&self) -> Option<&[Step]> {
        let successes = self.attempts.iter().filter(|a| a.success);
        successes
            .min_by_key(|a| (a.perturbation.is_some(), a.trajectory.len(), a.repetition))
            .map(|a| a.trajectory.as_slice())
    }
}
