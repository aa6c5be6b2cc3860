//! Episode-Level Evaluator.
//!
//! Validates the request, drives the [`EpisodeRunner`] across the
//! unperturbed variant plus every supplied variant, then aggregates the
//! resulting episode into a [`ReliabilityProfile`]. Apart from running the
//! agent, evaluation has no side effects.

pub mod aggregate;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::agent::{Agent, PerturbationSource};
use crate::domain::{
    CertificationConfig, Episode, EvalError, EvalResult, ReliabilityProfile, Task, Variant,
    VarianceBands,
};
use crate::memory::StatsRegistry;
use crate::obs;
use crate::perturbation::{validate_perturbation, DEFAULT_MIN_SIMILARITY};
use crate::planner::AdaptivePlanner;
use crate::runner::{CancelHandle, EpisodeRunner};

pub use aggregate::{assemble_profile, MIN_SAMPLES};

/// An evaluated episode and its profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub episode: Episode,
    pub profile: ReliabilityProfile,
}

/// The unperturbed variant followed by `variants`, de-duplicated by id.
pub fn plan_variants(task: &Task, variants: &[Variant]) -> EvalResult<Vec<Variant>> {
    let identity = Variant::identity(task);
    let mut seen: HashSet<String> = HashSet::from([identity.id.clone()]);
    let mut planned = vec![identity];
    for variant in variants {
        if variant.task_id != task.id {
            return Err(EvalError::InvalidTask(format!(
                "variant {} belongs to task {}, not {}",
                variant.id, variant.task_id, task.id
            )));
        }
        if variant.is_identity() || !seen.insert(variant.id.clone()) {
            tracing::debug!(variant_id = %variant.id, "skipping repeated variant");
            continue;
        }
        planned.push(variant.clone());
    }
    Ok(planned)
}

pub struct EpisodeEvaluator {
    runner: EpisodeRunner,
    bands: VarianceBands,
}

impl EpisodeEvaluator {
    pub fn new(config: &CertificationConfig) -> Self {
        Self::from_parts(EpisodeRunner::new(config.runner()), config.variance_bands())
    }

    pub fn from_parts(runner: EpisodeRunner, bands: VarianceBands) -> Self {
        Self { runner, bands }
    }

    /// Route attempts through the adaptive planner.
    pub fn with_planner(mut self, planner: Arc<AdaptivePlanner>) -> Self {
        self.runner = self.runner.with_planner(planner);
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsRegistry>) -> Self {
        self.runner = self.runner.with_stats(stats);
        self
    }

    pub fn runner(&self) -> &EpisodeRunner {
        &self.runner
    }

    pub fn bands(&self) -> &VarianceBands {
        &self.bands
    }

    /// Evaluate `task` with `k` repetitions per variant and return its profile.
    pub async fn evaluate(
        &self,
        task: &Task,
        agent: Arc<dyn Agent>,
        k: usize,
        variants: &[Variant],
    ) -> EvalResult<ReliabilityProfile> {
        self.evaluate_episode(task, agent, k, variants, &CancelHandle::new())
            .await
            .map(|evaluation| evaluation.profile)
    }

    /// Evaluate with variants generated by `source`. Variants that look
    /// semantically distant from the task are logged and still run.
    pub async fn evaluate_with_source(
        &self,
        task: &Task,
        agent: Arc<dyn Agent>,
        k: usize,
        source: &dyn PerturbationSource,
    ) -> EvalResult<Evaluation> {
        let variants = source.generate(task);
        for variant in &variants {
            let (valid, similarity) =
                validate_perturbation(&task.description, &variant.description, DEFAULT_MIN_SIMILARITY);
            if !valid {
                tracing::warn!(
                    source = source.name(),
                    variant_id = %variant.id,
                    similarity,
                    "perturbation may not preserve task semantics"
                );
            }
        }
        self.evaluate_episode(task, agent, k, &variants, &CancelHandle::new())
            .await
    }

    /// Full evaluation returning the episode alongside the profile.
    ///
    /// Invalid input fails before any attempt runs. After cancellation the
    /// completed attempts still aggregate into a profile marked partial.
    pub async fn evaluate_episode(
        &self,
        task: &Task,
        agent: Arc<dyn Agent>,
        k: usize,
        variants: &[Variant],
        cancel: &CancelHandle,
    ) -> EvalResult<Evaluation> {
        task.validate()?;
        if k < 1 {
            return Err(EvalError::InvalidRepetitions(k));
        }
        let planned = plan_variants(task, variants)?;
        let scheduled = planned.len() * k;
        if scheduled < MIN_SAMPLES {
            return Err(EvalError::InsufficientSamples {
                observed: scheduled,
                required: MIN_SAMPLES,
            });
        }

        let span = obs::evaluation_span(&task.id, agent.id());
        async move {
            obs::emit_evaluation_started(&task.id, agent.id(), scheduled);
            let started = Instant::now();

            let episode = self.runner.run(task, agent, &planned, k, cancel).await;
            let profile = assemble_profile(&episode, &self.bands)?;

            obs::emit_evaluation_finished(
                &task.id,
                profile.attempts,
                profile.success_rate,
                profile.variance,
                profile.partial,
                started.elapsed().as_millis() as u64,
            );
            Ok(Evaluation { episode, profile })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_variants_identity_first_and_dedup() {
        let task = Task::new("t", "book a flight", 2);
        let para = Variant::perturbed(&task, "paraphrase", "reserve a flight");
        let planned =
            plan_variants(&task, &[para.clone(), Variant::identity(&task), para.clone()]).unwrap();
        assert_eq!(planned.len(), 2);
        assert!(planned[0].is_identity());
        assert_eq!(planned[1].id, para.id);
    }

    #[test]
    fn test_plan_variants_rejects_foreign_variant() {
        let task = Task::new("t", "d", 2);
        let other = Task::new("u", "d", 2);
        let foreign = Variant::perturbed(&other, "format", "d");
        assert!(matches!(
            plan_variants(&task, &[foreign]),
            Err(EvalError::InvalidTask(_))
        ));
    }
}
