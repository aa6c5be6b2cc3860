//! Episode Runner: executes every variant of a task K times.
//!
//! Attempts run as tokio tasks bounded by a semaphore. Each attempt
//! resets the agent, runs under the attempt timeout and always yields a
//! recorded [`Attempt`]: timeouts, agent errors and panics become
//! failures so the aggregation barrier never hangs or aborts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::warn;

use crate::agent::Agent;
use crate::domain::{Attempt, Episode, FailureCategory, RunnerConfig, Task, Variant};
use crate::memory::StatsRegistry;
use crate::metrics::METRICS;
use crate::obs;
use crate::planner::AdaptivePlanner;

/// Cooperative cancellation for an in-flight evaluation. Clones share state.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once cancellation is requested.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs attempts and optionally routes their steps through the planner.
pub struct EpisodeRunner {
    config: RunnerConfig,
    planner: Option<Arc<AdaptivePlanner>>,
    stats: Arc<StatsRegistry>,
}

impl EpisodeRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            planner: None,
            stats: Arc::new(StatsRegistry::new()),
        }
    }

    pub fn with_planner(mut self, planner: Arc<AdaptivePlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Share the registry that certified memory logs into.
    pub fn with_stats(mut self, stats: Arc<StatsRegistry>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `k` attempts of every variant. Attempts come back ordered by
    /// variant then repetition. When `cancel` fires, attempts not yet
    /// finished are dropped and the episode is marked partial.
    pub async fn run(
        &self,
        task: &Task,
        agent: Arc<dyn Agent>,
        variants: &[Variant],
        k: usize,
        cancel: &CancelHandle,
    ) -> Episode {
        let sem = Arc::new(Semaphore::new(self.config.max_concurrent_attempts.max(1)));
        let mut slots = Vec::with_capacity(variants.len() * k);
        let mut handles = Vec::with_capacity(variants.len() * k);

        for (variant_idx, variant) in variants.iter().enumerate() {
            for repetition in 0..k {
                let sem = Arc::clone(&sem);
                let agent = Arc::clone(&agent);
                let planner = self.planner.clone();
                let stats = Arc::clone(&self.stats);
                let task = task.clone();
                let variant = variant.clone();
                let cancel_rx = cancel.subscribe();
                let timeout = self.config.attempt_timeout;

                let handle = tokio::spawn(async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return None;
                    };
                    if *cancel_rx.borrow() {
                        return None;
                    }
                    tokio::select! {
                        biased;
                        _ = cancelled(cancel_rx) => None,
                        attempt = execute_attempt(
                            agent, &task, &variant, repetition, planner, stats, timeout,
                        ) => Some(attempt),
                    }
                });
                slots.push((variant_idx, repetition));
                handles.push(handle);
            }
        }

        let joined = join_all(handles).await;
        let mut attempts = Vec::with_capacity(joined.len());
        // join_all preserves spawn order: variant, then repetition.
        for ((variant_idx, repetition), joined) in slots.into_iter().zip(joined) {
            let variant = &variants[variant_idx];
            match joined {
                Ok(Some(attempt)) => attempts.push(attempt),
                Ok(None) => {}
                Err(join_err) => {
                    warn!(
                        variant_id = %variant.id,
                        repetition,
                        error = %join_err,
                        "attempt task did not complete; recording agent fault"
                    );
                    let attempt = Attempt::failed(
                        task,
                        variant,
                        repetition,
                        FailureCategory::AgentFault,
                        Vec::new(),
                        0,
                    );
                    let stats = self.stats.for_agent(agent.id());
                    stats.record_failure();
                    attempts.push(attempt);
                }
            }
        }

        let expected = variants.len() * k;
        let partial = attempts.len() < expected;
        if partial {
            warn!(
                task_id = %task.id,
                completed = attempts.len(),
                expected,
                "evaluation cancelled; episode is partial"
            );
        }

        Episode {
            agent_id: agent.id().to_string(),
            task: task.clone(),
            variants: variants.to_vec(),
            repetitions: k,
            attempts,
            partial,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

async fn execute_attempt(
    agent: Arc<dyn Agent>,
    task: &Task,
    variant: &Variant,
    repetition: usize,
    planner: Option<Arc<AdaptivePlanner>>,
    stats: Arc<StatsRegistry>,
    timeout: Duration,
) -> Attempt {
    let started = Instant::now();
    agent.reset().await;

    let attempt = match planner {
        None => match tokio::time::timeout(timeout, agent.attempt(variant)).await {
            Err(_) => Attempt::failed(
                task,
                variant,
                repetition,
                FailureCategory::Timeout,
                Vec::new(),
                elapsed_ms(started),
            ),
            Ok(Err(err)) => {
                warn!(variant_id = %variant.id, repetition, error = %err, "agent fault");
                Attempt::failed(
                    task,
                    variant,
                    repetition,
                    FailureCategory::AgentFault,
                    Vec::new(),
                    elapsed_ms(started),
                )
            }
            Ok(Ok(report)) => {
                Attempt::from_report(task, variant, repetition, report, elapsed_ms(started))
            }
        },
        Some(planner) => {
            let mut guide = planner.guide(task);
            let outcome =
                tokio::time::timeout(timeout, agent.attempt_guided(variant, &mut guide)).await;
            let observed = guide.state().trajectory().to_vec();
            let attempt = match outcome {
                Err(_) => Attempt::failed(
                    task,
                    variant,
                    repetition,
                    FailureCategory::Timeout,
                    observed,
                    elapsed_ms(started),
                ),
                Ok(Err(err)) => {
                    warn!(variant_id = %variant.id, repetition, error = %err, "agent fault");
                    Attempt::failed(
                        task,
                        variant,
                        repetition,
                        FailureCategory::AgentFault,
                        observed,
                        elapsed_ms(started),
                    )
                }
                Ok(Ok(report)) => match guide.state().aborted().cloned() {
                    Some(category) => Attempt::failed(
                        task,
                        variant,
                        repetition,
                        category,
                        observed,
                        elapsed_ms(started),
                    ),
                    None => Attempt::from_report(
                        task,
                        variant,
                        repetition,
                        report,
                        elapsed_ms(started),
                    ),
                },
            };
            let trace = guide.finish(attempt.success);
            attempt.with_planning(trace)
        }
    };

    METRICS.inc_attempts();
    if attempt.failure_category == Some(FailureCategory::Timeout) {
        METRICS.inc_timeouts();
    }

    let agent_stats = stats.for_agent(agent.id());
    agent_stats.record_actions_executed(attempt.trajectory.len() as u64);
    let recovered = attempt.planning.as_ref().is_some_and(|p| p.recovered);
    if recovered {
        agent_stats.record_recovery();
    } else if !attempt.success {
        agent_stats.record_failure();
    }

    obs::emit_attempt_finished(
        &attempt.variant_id,
        attempt.repetition,
        attempt.success,
        attempt.failure_category.as_ref().map(|c| c.label()).as_deref(),
        attempt.wall_time_ms,
    );
    attempt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_handle_shared_between_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        let rx = handle.subscribe();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
        // Already-cancelled receivers resolve immediately.
        cancelled(rx).await;
    }
}
