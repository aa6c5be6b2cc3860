//! Adaptive planner: per-attempt efficiency monitoring and memory-informed
//! replanning.
//!
//! Each attempt runs through `NOMINAL -> MONITORING -> REPLANNED ->
//! (SUCCESS | FAILED)`. The planner never retrieves while NOMINAL, and
//! substitutes at most one plan per attempt.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{StepDirective, StepGuide};
use crate::domain::{
    FailureCategory, PlannerConfig, PlannerFallback, PlannerPhase, PlanningTrace, Step, Task,
};
use crate::memory::EpisodicStore;
use crate::metrics::METRICS;
use crate::obs;

fn count_revisits(prefix: &[Step]) -> usize {
    let mut seen = HashSet::new();
    prefix.iter().filter(|s| !seen.insert(s.state.as_str())).count()
}

/// Fraction of steps whose resulting state was already visited earlier
/// in the prefix.
pub fn redundancy_fraction(prefix: &[Step]) -> f64 {
    if prefix.is_empty() {
        return 0.0;
    }
    count_revisits(prefix) as f64 / prefix.len() as f64
}

/// Planning Efficiency Index of a trajectory prefix:
/// `(optimal / actual) * (1 - redundancy)`. A prefix still shorter than the
/// optimal path (including an empty one) scores 1.
pub fn compute_pei(prefix: &[Step], task: &Task) -> f64 {
    pei_from_counts(task.optimal_steps, prefix.len(), count_revisits(prefix))
}

fn pei_from_counts(optimal: usize, actual: usize, redundant: usize) -> f64 {
    if actual < optimal || actual == 0 {
        return 1.0;
    }
    let efficiency = optimal as f64 / actual as f64;
    let redundancy = redundant as f64 / actual as f64;
    (efficiency * (1.0 - redundancy)).clamp(0.0, 1.0)
}

/// Live planner state for one in-progress attempt.
#[derive(Debug, Clone)]
pub struct PlanningState {
    task: Task,
    phase: PlannerPhase,
    peak_phase: PlannerPhase,
    trajectory: Vec<Step>,
    visited: HashSet<String>,
    cumulative_cost: u64,
    redundant: usize,
    pei: f64,
    min_pei: f64,
    consecutive_below: usize,
    sustained_windows: usize,
    correction_similarity: Option<f64>,
    fallbacks: Vec<PlannerFallback>,
    aborted: Option<FailureCategory>,
}

impl PlanningState {
    fn new(task: &Task) -> Self {
        Self {
            task: task.clone(),
            phase: PlannerPhase::Nominal,
            peak_phase: PlannerPhase::Nominal,
            trajectory: Vec::new(),
            visited: HashSet::new(),
            cumulative_cost: 0,
            redundant: 0,
            pei: 1.0,
            min_pei: 1.0,
            consecutive_below: 0,
            sustained_windows: 0,
            correction_similarity: None,
            fallbacks: Vec::new(),
            aborted: None,
        }
    }

    pub fn phase(&self) -> PlannerPhase {
        self.phase
    }

    pub fn pei(&self) -> f64 {
        self.pei
    }

    pub fn cumulative_cost(&self) -> u64 {
        self.cumulative_cost
    }

    pub fn redundant_steps(&self) -> usize {
        self.redundant
    }

    /// Intervention flag: a plan substitution has been applied.
    pub fn intervened(&self) -> bool {
        self.correction_similarity.is_some()
    }

    pub fn sustained_windows(&self) -> usize {
        self.sustained_windows
    }

    pub fn fallbacks(&self) -> &[PlannerFallback] {
        &self.fallbacks
    }

    pub fn trajectory(&self) -> &[Step] {
        &self.trajectory
    }

    /// Set when the planner stopped the attempt (retrieval timeout).
    pub fn aborted(&self) -> Option<&FailureCategory> {
        self.aborted.as_ref()
    }

    fn transition(&mut self, to: PlannerPhase) {
        obs::emit_planner_transition(&self.task.id, self.phase, to, self.pei);
        self.phase = to;
        if !to.is_terminal() {
            self.peak_phase = to;
        }
    }
}

/// Monitors attempts and consults certified memory on sustained degradation.
pub struct AdaptivePlanner {
    config: PlannerConfig,
    memory: Arc<dyn EpisodicStore>,
}

impl AdaptivePlanner {
    pub fn new(config: PlannerConfig, memory: Arc<dyn EpisodicStore>) -> Self {
        Self { config, memory }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Fresh NOMINAL state for an attempt at `task`.
    pub fn begin(&self, task: &Task) -> PlanningState {
        PlanningState::new(task)
    }

    /// Step guide bound to a fresh state, for handing to an agent.
    pub fn guide(self: &Arc<Self>, task: &Task) -> PlannerGuide {
        PlannerGuide {
            planner: Arc::clone(self),
            state: self.begin(task),
        }
    }

    /// Account for one executed step and decide whether to intervene.
    pub async fn observe(&self, state: &mut PlanningState, step: &Step) -> StepDirective {
        if state.phase.is_terminal() || state.aborted.is_some() {
            return StepDirective::Continue;
        }

        state.cumulative_cost += 1;
        if !state.visited.insert(step.state.clone()) {
            state.redundant += 1;
        }
        state.trajectory.push(step.clone());
        state.pei = pei_from_counts(
            state.task.optimal_steps,
            state.trajectory.len(),
            state.redundant,
        );
        state.min_pei = state.min_pei.min(state.pei);

        let below = state.pei < self.config.pei_threshold;
        match state.phase {
            PlannerPhase::Nominal if below => {
                state.transition(PlannerPhase::Monitoring);
                state.consecutive_below = 1;
            }
            PlannerPhase::Monitoring if below => state.consecutive_below += 1,
            PlannerPhase::Monitoring => state.consecutive_below = 0,
            _ => return StepDirective::Continue,
        }

        if state.phase == PlannerPhase::Monitoring
            && state.consecutive_below >= self.config.debounce_steps
        {
            state.sustained_windows += 1;
            state.consecutive_below = 0;
            return self.try_replan(state, step).await;
        }
        StepDirective::Continue
    }

    async fn try_replan(&self, state: &mut PlanningState, step: &Step) -> StepDirective {
        let retrieval = tokio::time::timeout(
            self.config.retrieval_timeout,
            self.memory
                .retrieve_similar(&state.task, self.config.retrieval_k),
        )
        .await;

        let hits = match retrieval {
            Err(_) => {
                tracing::warn!(
                    task_id = %state.task.id,
                    timeout_ms = self.config.retrieval_timeout.as_millis() as u64,
                    "memory retrieval timed out; aborting attempt"
                );
                state.aborted = Some(FailureCategory::Timeout);
                return StepDirective::Abort(FailureCategory::Timeout);
            }
            Ok(Err(err)) => {
                self.fall_back(
                    state,
                    PlannerFallback::MemoryUnavailable {
                        detail: err.to_string(),
                    },
                );
                return StepDirective::Continue;
            }
            Ok(Ok(hits)) => hits,
        };

        let Some(best) = hits.first() else {
            self.fall_back(state, PlannerFallback::NoCertifiedMemory);
            return StepDirective::Continue;
        };
        if best.similarity <= self.config.replan_similarity_bar {
            self.fall_back(
                state,
                PlannerFallback::BelowSimilarityBar {
                    best: best.similarity,
                    bar: self.config.replan_similarity_bar,
                },
            );
            return StepDirective::Continue;
        }

        let suffix = best.record.suffix_after(Some(step.state.as_str()));
        state.correction_similarity = Some(best.similarity);
        state.transition(PlannerPhase::Replanned);
        METRICS.inc_replans();
        tracing::info!(
            task_id = %state.task.id,
            record_id = %best.record.id,
            similarity = best.similarity,
            suffix_len = suffix.len(),
            "substituting remaining plan from certified memory"
        );
        StepDirective::Substitute(suffix)
    }

    fn fall_back(&self, state: &mut PlanningState, fallback: PlannerFallback) {
        obs::emit_planner_fallback(&state.task.id, &fallback);
        state.fallbacks.push(fallback);
    }

    /// Close the attempt with its real outcome and keep the audit trace.
    pub fn finalize(&self, mut state: PlanningState, success: bool) -> PlanningTrace {
        let terminal = if success {
            PlannerPhase::Success
        } else {
            PlannerPhase::Failed
        };
        state.transition(terminal);
        let recovered = success && state.intervened();
        PlanningTrace {
            peak_phase: state.peak_phase,
            final_phase: state.phase,
            steps_observed: state.trajectory.len(),
            redundant_steps: state.redundant,
            last_pei: state.pei,
            min_pei: state.min_pei,
            sustained_windows: state.sustained_windows,
            correction_similarity: state.correction_similarity,
            fallbacks: state.fallbacks,
            recovered,
        }
    }
}

/// `StepGuide` adapter that feeds an agent's steps into the planner.
pub struct PlannerGuide {
    planner: Arc<AdaptivePlanner>,
    state: PlanningState,
}

impl PlannerGuide {
    pub fn state(&self) -> &PlanningState {
        &self.state
    }

    pub fn finish(self, success: bool) -> PlanningTrace {
        self.planner.finalize(self.state, success)
    }
}

#[async_trait]
impl StepGuide for PlannerGuide {
    async fn on_step(&mut self, step: &Step) -> StepDirective {
        self.planner.observe(&mut self.state, step).await
    }
}
