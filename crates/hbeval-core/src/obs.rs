//! Structured lifecycle events for evaluation, planning and memory.
//!
//! Every emitter logs with a stable `event = "..."` field so downstream
//! tooling can filter without parsing messages. Async code instruments
//! futures with [`evaluation_span`]; synchronous callers can hold an
//! [`EvaluationSpan`] guard instead.

use tracing::{debug, info, warn};

use crate::domain::{PlannerFallback, PlannerPhase};

/// The `hbeval.evaluation` span tagged with task and agent.
pub fn evaluation_span(task_id: &str, agent_id: &str) -> tracing::Span {
    tracing::info_span!("hbeval.evaluation", task_id = %task_id, agent_id = %agent_id)
}

/// RAII guard holding an entered evaluation span. Not `Send`; do not hold
/// it across an `.await`.
pub struct EvaluationSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvaluationSpan {
    pub fn enter(task_id: &str, agent_id: &str) -> Self {
        Self {
            _span: evaluation_span(task_id, agent_id).entered(),
        }
    }
}

pub fn emit_evaluation_started(task_id: &str, agent_id: &str, planned_attempts: usize) {
    info!(
        event = "evaluation.started",
        task_id = %task_id,
        agent_id = %agent_id,
        planned_attempts,
    );
}

pub fn emit_evaluation_finished(
    task_id: &str,
    attempts: usize,
    success_rate: f64,
    variance: f64,
    partial: bool,
    duration_ms: u64,
) {
    info!(
        event = "evaluation.finished",
        task_id = %task_id,
        attempts,
        success_rate,
        variance,
        partial,
        duration_ms,
    );
}

/// Per-attempt completion. Debug level: one line per attempt is noisy.
pub fn emit_attempt_finished(
    variant_id: &str,
    repetition: usize,
    success: bool,
    failure_category: Option<&str>,
    wall_time_ms: u64,
) {
    debug!(
        event = "attempt.finished",
        variant_id = %variant_id,
        repetition,
        success,
        failure_category = failure_category.unwrap_or("-"),
        wall_time_ms,
    );
}

pub fn emit_planner_transition(task_id: &str, from: PlannerPhase, to: PlannerPhase, pei: f64) {
    debug!(
        event = "planner.transition",
        task_id = %task_id,
        from = %from,
        to = %to,
        pei,
    );
}

/// The planner declined to intervene. Memory faults log at warn.
pub fn emit_planner_fallback(task_id: &str, fallback: &PlannerFallback) {
    match fallback {
        PlannerFallback::MemoryUnavailable { detail } => warn!(
            event = "planner.fallback",
            task_id = %task_id,
            reason = "memory_unavailable",
            detail = %detail,
        ),
        PlannerFallback::NoCertifiedMemory => info!(
            event = "planner.fallback",
            task_id = %task_id,
            reason = "no_certified_memory",
        ),
        PlannerFallback::BelowSimilarityBar { best, bar } => info!(
            event = "planner.fallback",
            task_id = %task_id,
            reason = "below_similarity_bar",
            best = *best,
            bar = *bar,
        ),
    }
}

pub fn emit_memory_certified(task_id: &str, record_id: &str) {
    info!(event = "memory.certified", task_id = %task_id, record_id = %record_id);
}

pub fn emit_memory_rejected(task_id: &str, reason: &str) {
    info!(event = "memory.rejected", task_id = %task_id, reason = %reason);
}

pub fn emit_memory_evicted(record_ids: &[String]) {
    info!(
        event = "memory.evicted",
        count = record_ids.len(),
        record_ids = %record_ids.join(","),
    );
}

pub fn emit_memory_retrieved(task_id: &str, k: usize, returned: usize, best: Option<f64>) {
    debug!(
        event = "memory.retrieved",
        task_id = %task_id,
        k,
        returned,
        best_similarity = best.unwrap_or(0.0),
    );
}
