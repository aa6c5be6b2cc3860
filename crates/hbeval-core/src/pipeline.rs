//! End-to-end certification run: evaluate under the planner, classify,
//! then offer the episode to certified memory.

use std::sync::Arc;

use serde::Serialize;

use crate::agent::Agent;
use crate::classify::{classify_decision, Decision};
use crate::domain::{CertificationConfig, EvalResult, Task, Variant};
use crate::evaluator::{EpisodeEvaluator, Evaluation};
use crate::memory::{
    CertificationOutcome, CertifiedMemory, EpisodicStore, StatsRegistry, StatsSnapshot,
};
use crate::metrics::METRICS;
use crate::planner::AdaptivePlanner;
use crate::runner::CancelHandle;

/// Everything one certification run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub evaluation: Evaluation,
    pub decision: Decision,
    /// `None` when memory faulted during certification.
    pub certification: Option<CertificationOutcome>,
    pub stats: StatsSnapshot,
}

pub struct CertificationPipeline {
    config: CertificationConfig,
    memory: Arc<dyn EpisodicStore>,
    stats: Arc<StatsRegistry>,
    evaluator: EpisodeEvaluator,
}

impl CertificationPipeline {
    /// Pipeline over a fresh in-process certified memory.
    pub fn new(config: CertificationConfig) -> EvalResult<Self> {
        let stats = Arc::new(StatsRegistry::new());
        let memory = Arc::new(CertifiedMemory::with_stats(config.memory(), Arc::clone(&stats)));
        Self::with_memory(config, memory, stats)
    }

    /// Pipeline over a caller-supplied store. `stats` must be the registry
    /// that store logs into.
    pub fn with_memory(
        config: CertificationConfig,
        memory: Arc<dyn EpisodicStore>,
        stats: Arc<StatsRegistry>,
    ) -> EvalResult<Self> {
        config.validate()?;
        let planner = Arc::new(AdaptivePlanner::new(config.planner(), Arc::clone(&memory)));
        let evaluator = EpisodeEvaluator::new(&config)
            .with_planner(planner)
            .with_stats(Arc::clone(&stats));
        Ok(Self {
            config,
            memory,
            stats,
            evaluator,
        })
    }

    pub fn config(&self) -> &CertificationConfig {
        &self.config
    }

    pub fn memory(&self) -> Arc<dyn EpisodicStore> {
        Arc::clone(&self.memory)
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    pub async fn run(
        &self,
        task: &Task,
        agent: Arc<dyn Agent>,
        variants: &[Variant],
    ) -> EvalResult<PipelineReport> {
        self.run_with_cancel(task, agent, variants, &CancelHandle::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        task: &Task,
        agent: Arc<dyn Agent>,
        variants: &[Variant],
        cancel: &CancelHandle,
    ) -> EvalResult<PipelineReport> {
        let agent_id = agent.id().to_string();
        let evaluation = self
            .evaluator
            .evaluate_episode(task, agent, self.config.k, variants, cancel)
            .await?;
        let decision = classify_decision(&evaluation.profile, &self.config);

        let certification = match self
            .memory
            .certify_and_store(&evaluation.episode, &evaluation.profile)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(
                    task_id = %task.id,
                    error = %err,
                    "certification skipped; memory unavailable"
                );
                None
            }
        };

        METRICS.flush();
        Ok(PipelineReport {
            evaluation,
            decision,
            certification,
            stats: self.stats.snapshot(&agent_id),
        })
    }
}
