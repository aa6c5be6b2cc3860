//! Runner behaviour under timeouts, agent faults, memory faults,
//! cancellation and bounded concurrency. Time-driven tests run on a
//! paused clock so timeouts resolve instantly and deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use hbeval_core::domain::{MemoryConfig, PlannerFallback};
use hbeval_core::fakes::{walk, DelayedMemory, ScriptedAgent, ScriptedOutcome, UnavailableMemory};
use hbeval_core::memory::RejectionReason;
use hbeval_core::{
    AdaptivePlanner, Agent, AgentError, AttemptReport, CancelHandle, CertificationConfig,
    CertificationOutcome, CertifiedMemory, EpisodeEvaluator, EpisodicStore, EvalError,
    FailureCategory, Task, Variant,
};

fn task() -> Task {
    Task::new("orders", "cancel the most recent order", 3)
}

fn wander() -> ScriptedOutcome {
    ScriptedOutcome::Fail(walk(&["s1", "s2", "s1", "s2", "s1", "s2"]), None)
}

fn config_with(f: impl FnOnce(&mut CertificationConfig)) -> CertificationConfig {
    let mut config = CertificationConfig::default();
    f(&mut config);
    config.validate().unwrap();
    config
}

#[tokio::test(start_paused = true)]
async fn test_hanging_attempt_recorded_as_timeout() {
    let config = config_with(|c| c.attempt_timeout_ms = 100);
    let agent = ScriptedAgent::new(
        "agent-a",
        vec![
            ScriptedOutcome::Succeed(walk(&["s1", "s2", "s3"])),
            ScriptedOutcome::Hang,
        ],
    );
    let profile = EpisodeEvaluator::new(&config)
        .evaluate(&task(), Arc::new(agent), 4, &[])
        .await
        .unwrap();

    assert_eq!(profile.attempts, 4);
    assert_eq!(profile.successes, 2);
    assert_eq!(profile.breakdown.failure_distribution["timeout"], 2);
    assert!(!profile.partial);
}

#[tokio::test]
async fn test_agent_error_recorded_as_fault() {
    let config = CertificationConfig::default();
    let agent = ScriptedAgent::new(
        "agent-a",
        vec![
            ScriptedOutcome::Error("tool crashed".into()),
            ScriptedOutcome::Succeed(walk(&["s1", "s2", "s3"])),
        ],
    );
    let evaluation = EpisodeEvaluator::new(&config)
        .evaluate_episode(&task(), Arc::new(agent), 4, &[], &CancelHandle::new())
        .await
        .unwrap();

    let faults: Vec<_> = evaluation
        .episode
        .attempts
        .iter()
        .filter(|a| a.failure_category == Some(FailureCategory::AgentFault))
        .collect();
    assert_eq!(faults.len(), 2);
    assert!(faults.iter().all(|a| a.trajectory.is_empty()));
    assert_eq!(evaluation.profile.failure_clustering, 0.0);
}

struct PanickingAgent;

#[async_trait]
impl Agent for PanickingAgent {
    fn id(&self) -> &str {
        "panicky"
    }

    async fn reset(&self) {}

    async fn attempt(&self, variant: &Variant) -> Result<AttemptReport, AgentError> {
        if variant.is_identity() {
            panic!("agent bug");
        }
        Ok(AttemptReport::success(walk(&["s1"])))
    }
}

#[tokio::test]
async fn test_panicking_attempt_recorded_as_fault() {
    let task = task();
    let format = Variant::perturbed(&task, "format", "1. cancel the most recent order");
    let profile = EpisodeEvaluator::new(&CertificationConfig::default())
        .evaluate(&task, Arc::new(PanickingAgent), 2, &[format])
        .await
        .unwrap();

    assert_eq!(profile.attempts, 4);
    assert_eq!(profile.successes, 2);
    assert_eq!(profile.breakdown.failure_distribution["agent_fault"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_retrieval_aborts_attempt_with_timeout() {
    let config = config_with(|c| c.retrieval_timeout_ms = 50);
    let slow: Arc<dyn EpisodicStore> = Arc::new(DelayedMemory::new(
        Arc::new(CertifiedMemory::new(MemoryConfig::default())),
        Duration::from_secs(10),
    ));
    let planner = Arc::new(AdaptivePlanner::new(config.planner(), slow));
    let evaluator = EpisodeEvaluator::new(&config).with_planner(planner);

    let evaluation = evaluator
        .evaluate_episode(
            &task(),
            Arc::new(ScriptedAgent::new("agent-a", vec![wander()])),
            2,
            &[],
            &CancelHandle::new(),
        )
        .await
        .unwrap();

    for attempt in &evaluation.episode.attempts {
        assert_eq!(attempt.failure_category, Some(FailureCategory::Timeout));
        // Aborted right after the first debounce window completed.
        assert_eq!(attempt.trajectory.len(), 6);
        let trace = attempt.planning.as_ref().unwrap();
        assert!(!trace.replanned());
        assert!(trace.fallbacks.is_empty());
    }
}

#[tokio::test]
async fn test_memory_fault_degrades_to_no_intervention() {
    let config = CertificationConfig::default();
    let planner = Arc::new(AdaptivePlanner::new(
        config.planner(),
        Arc::new(UnavailableMemory),
    ));
    let evaluator = EpisodeEvaluator::new(&config).with_planner(planner);

    let profile = evaluator
        .evaluate(
            &task(),
            Arc::new(ScriptedAgent::new("agent-a", vec![wander()])),
            3,
            &[],
        )
        .await
        .unwrap();

    assert_eq!(profile.attempts, 3);
    assert_eq!(profile.planning.memory_faults, 3);
    assert_eq!(profile.planning.attempts_replanned, 0);
    assert_eq!(profile.breakdown.failure_distribution["incorrect_output"], 3);
}

#[tokio::test]
async fn test_memory_fault_fallback_is_traced() {
    let config = CertificationConfig::default();
    let planner = Arc::new(AdaptivePlanner::new(
        config.planner(),
        Arc::new(UnavailableMemory),
    ));
    let evaluation = EpisodeEvaluator::new(&config)
        .with_planner(planner)
        .evaluate_episode(
            &task(),
            Arc::new(ScriptedAgent::new("agent-a", vec![wander()])),
            2,
            &[],
            &CancelHandle::new(),
        )
        .await
        .unwrap();

    let trace = evaluation.episode.attempts[0].planning.as_ref().unwrap();
    assert!(matches!(
        trace.fallbacks.as_slice(),
        [PlannerFallback::MemoryUnavailable { .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_yields_partial_profile_that_never_certifies() {
    let config = CertificationConfig::default();
    let agent = Arc::new(
        ScriptedAgent::always("agent-a", walk(&["s1", "s2", "s3"]))
            .with_delay(Duration::from_secs(1)),
    );
    let cancel = CancelHandle::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            cancel.cancel();
        })
    };

    let evaluation = EpisodeEvaluator::new(&config)
        .evaluate_episode(&task(), agent.clone(), 6, &[], &cancel)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(evaluation.episode.partial);
    assert!(evaluation.profile.partial);
    assert_eq!(evaluation.profile.attempts, 2);
    assert_eq!(evaluation.profile.repetitions, 6);
    assert!(agent.attempts() < 6);

    let memory = CertifiedMemory::new(MemoryConfig::default());
    let outcome = memory
        .certify_and_store(&evaluation.episode, &evaluation.profile)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CertificationOutcome::Rejected {
            reason: RejectionReason::PartialProfile
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_before_two_attempts_is_insufficient() {
    let agent = Arc::new(
        ScriptedAgent::always("agent-a", walk(&["s1"])).with_delay(Duration::from_secs(1)),
    );
    let cancel = CancelHandle::new();
    cancel.cancel();

    let result = EpisodeEvaluator::new(&CertificationConfig::default())
        .evaluate_episode(&task(), agent, 4, &[], &cancel)
        .await;
    assert!(matches!(
        result,
        Err(EvalError::InsufficientSamples { observed: 0, .. })
    ));
}

/// Tracks how many attempts are in flight at once.
struct ProbeAgent {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Agent for ProbeAgent {
    fn id(&self) -> &str {
        "probe"
    }

    async fn reset(&self) {}

    async fn attempt(&self, _variant: &Variant) -> Result<AttemptReport, AgentError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(AttemptReport::success(walk(&["s1", "s2", "s3"])))
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounded_and_order_preserved() {
    let config = config_with(|c| c.max_concurrent_attempts = 3);
    let task = task();
    let variants = vec![
        Variant::perturbed(&task, "paraphrase", "revoke the most recent order"),
        Variant::perturbed(&task, "format", "1. cancel the most recent order"),
    ];
    let probe = Arc::new(ProbeAgent {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });

    let evaluation = EpisodeEvaluator::new(&config)
        .evaluate_episode(&task, probe.clone(), 4, &variants, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(probe.peak.load(Ordering::SeqCst), 3);
    assert_eq!(evaluation.episode.attempts.len(), 12);

    let order: Vec<(String, usize)> = evaluation
        .episode
        .attempts
        .iter()
        .map(|a| (a.variant_id.clone(), a.repetition))
        .collect();
    let mut expected = Vec::new();
    let ids = [
        "orders".to_string(),
        variants[0].id.clone(),
        variants[1].id.clone(),
    ];
    for variant_id in ids {
        for rep in 0..4 {
            expected.push((variant_id.clone(), rep));
        }
    }
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_invalid_requests_run_nothing() {
    let evaluator = EpisodeEvaluator::new(&CertificationConfig::default());
    let agent = Arc::new(ScriptedAgent::always("agent-a", walk(&["s1"])));

    let zero_k = evaluator.evaluate(&task(), agent.clone(), 0, &[]).await;
    assert!(matches!(zero_k, Err(EvalError::InvalidRepetitions(0))));

    let empty = Task::new("", "cancel it", 1);
    let invalid = evaluator.evaluate(&empty, agent.clone(), 3, &[]).await;
    assert!(matches!(invalid, Err(EvalError::InvalidTask(_))));

    let single = evaluator.evaluate(&task(), agent.clone(), 1, &[]).await;
    assert!(matches!(
        single,
        Err(EvalError::InsufficientSamples {
            observed: 1,
            required: 2
        })
    ));

    assert_eq!(agent.attempts(), 0);
}
