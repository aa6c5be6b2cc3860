//! Capability interfaces consumed by the pipeline.
//!
//! The evaluator and runner depend only on these traits, never on a
//! concrete agent or perturbation generator. In-memory implementations
//! live in [`crate::fakes`] and [`crate::sim`].

use async_trait::async_trait;

use crate::domain::{AgentError, AttemptReport, FailureCategory, Step, Task, Variant};

/// What the planner tells an in-flight attempt after each step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDirective {
    Continue,
    /// Replace the remaining plan with these steps.
    Substitute(Vec<Step>),
    /// Stop now; the runner records the attempt as a failure of this category.
    Abort(FailureCategory),
}

/// Observer invoked once per executed step of an attempt.
#[async_trait]
pub trait StepGuide: Send {
    async fn on_step(&mut self, step: &Step) -> StepDirective;
}

/// The agent under test: a black box that attempts a variant.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identity used to key certification statistics.
    fn id(&self) -> &str;

    /// Clear any internal episodic state before a fresh attempt.
    async fn reset(&self);

    /// Attempt a variant and report outcome, trajectory and cost.
    async fn attempt(&self, variant: &Variant) -> Result<AttemptReport, AgentError>;

    /// Attempt a variant while reporting each step to `guide`.
    ///
    /// Agents that can accept a substituted plan override this. The default
    /// runs [`Agent::attempt`] and replays the finished trajectory through the
    /// guide, so planner bookkeeping still happens but substitutions are not
    /// applied.
    async fn attempt_guided(
        &self,
        variant: &Variant,
        guide: &mut dyn StepGuide,
    ) -> Result<AttemptReport, AgentError> {
        let report = self.attempt(variant).await?;
        for step in &report.trajectory {
            if let StepDirective::Abort(_) = guide.on_step(step).await {
                break;
            }
        }
        Ok(report)
    }
}

/// Source of semantically-equivalent task variants.
///
/// Implementations must be pure: the same task always yields the same
/// variants. Semantic preservation is assumed, not verified.
pub trait PerturbationSource: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, task: &Task) -> Vec<Variant>;
}

/// A source that yields no perturbed variants (unperturbed runs only).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPerturbation;

impl PerturbationSource for NoPerturbation {
    fn name(&self) -> &str {
        "none"
    }

    fn generate(&self, _task: &Task) -> Vec<Variant> {
        Vec::new()
    }
}
