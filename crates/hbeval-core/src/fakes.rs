//! In-memory test doubles for the agent and memory capabilities.
//!
//! `ScriptedAgent` replays fixed outcomes per variant; `UnavailableMemory`
//! always faults; `DelayedMemory` slows retrieval of a wrapped store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{Agent, StepDirective, StepGuide};
use crate::domain::{
    AgentError, AttemptReport, Episode, FailureCategory, ReliabilityProfile, Step, Task, Variant,
};
use crate::memory::{
    CertificationOutcome, EpisodicMemoryRecord, EpisodicStore, MemoryError, MemoryResult,
    RetrievedRecord, StatsSnapshot,
};

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

/// One scripted attempt outcome.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed(Vec<Step>),
    Fail(Vec<Step>, Option<FailureCategory>),
    /// The capability itself errors.
    Error(String),
    /// Never completes; exercises the attempt timeout.
    Hang,
}

/// Trajectory helper: action `a{i}` reaching state named by `states[i]`.
pub fn walk(states: &[&str]) -> Vec<Step> {
    states
        .iter()
        .enumerate()
        .map(|(i, s)| Step::new(format!("a{i}"), *s))
        .collect()
}

/// Agent that cycles through a script per variant id, falling back to a
/// default script for unscripted variants.
pub struct ScriptedAgent {
    id: String,
    default_script: Vec<ScriptedOutcome>,
    scripts: HashMap<String, Vec<ScriptedOutcome>>,
    cursors: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    recover_on_substitution: bool,
    resets: AtomicUsize,
    attempts: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(id: impl Into<String>, default_script: Vec<ScriptedOutcome>) -> Self {
        Self {
            id: id.into(),
            default_script,
            scripts: HashMap::new(),
            cursors: Mutex::new(HashMap::new()),
            delay: None,
            recover_on_substitution: false,
            resets: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Agent that succeeds with the same trajectory every time.
    pub fn always(id: impl Into<String>, trajectory: Vec<Step>) -> Self {
        Self::new(id, vec![ScriptedOutcome::Succeed(trajectory)])
    }

    pub fn with_script(mut self, variant_id: impl Into<String>, script: Vec<ScriptedOutcome>) -> Self {
        self.scripts.insert(variant_id.into(), script);
        self
    }

    /// Sleep this long before completing each attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Follow a substituted plan to success instead of the scripted outcome.
    pub fn recovering(mut self) -> Self {
        self.recover_on_substitution = true;
        self
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, variant: &Variant) -> ScriptedOutcome {
        let script = self
            .scripts
            .get(&variant.id)
            .unwrap_or(&self.default_script);
        if script.is_empty() {
            return ScriptedOutcome::Fail(Vec::new(), None);
        }
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let cursor = cursors.entry(variant.id.clone()).or_insert(0);
        let outcome = script[*cursor % script.len()].clone();
        *cursor += 1;
        outcome
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn attempt(&self, variant: &Variant) -> Result<AttemptReport, AgentError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome(variant);
        self.pause().await;
        match outcome {
            ScriptedOutcome::Succeed(trajectory) => Ok(AttemptReport::success(trajectory)),
            ScriptedOutcome::Fail(trajectory, category) => {
                Ok(AttemptReport::failure(trajectory, category))
            }
            ScriptedOutcome::Error(msg) => Err(AgentError::Fault(msg)),
            ScriptedOutcome::Hang => std::future::pending().await,
        }
    }

    async fn attempt_guided(
        &self,
        variant: &Variant,
        guide: &mut dyn StepGuide,
    ) -> Result<AttemptReport, AgentError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome(variant);
        self.pause().await;
        let (planned, success, category) = match outcome {
            ScriptedOutcome::Succeed(trajectory) => (trajectory, true, None),
            ScriptedOutcome::Fail(trajectory, category) => (trajectory, false, category),
            ScriptedOutcome::Error(msg) => return Err(AgentError::Fault(msg)),
            ScriptedOutcome::Hang => std::future::pending().await,
        };

        let mut executed = Vec::with_capacity(planned.len());
        for step in planned {
            executed.push(step.clone());
            match guide.on_step(&step).await {
                StepDirective::Continue => {}
                StepDirective::Abort(category) => {
                    return Ok(AttemptReport::failure(executed, Some(category)));
                }
                StepDirective::Substitute(suffix) if self.recover_on_substitution => {
                    for step in suffix {
                        guide.on_step(&step).await;
                        executed.push(step);
                    }
                    return Ok(AttemptReport::success(executed));
                }
                StepDirective::Substitute(_) => {}
            }
        }

        Ok(if success {
            AttemptReport::success(executed)
        } else {
            AttemptReport::failure(executed, category)
        })
    }
}

// ---------------------------------------------------------------------------
// Memory doubles
// ---------------------------------------------------------------------------

/// A store whose backend is always down.
#[derive(Debug, Default)]
pub struct UnavailableMemory;

#[async_trait]
impl EpisodicStore for UnavailableMemory {
    async fn certify_and_store(
        &self,
        _episode: &Episode,
        _profile: &ReliabilityProfile,
    ) -> MemoryResult<CertificationOutcome> {
        Err(MemoryError::Unavailable("backend offline".into()))
    }

    async fn retrieve_similar(&self, _task: &Task, _k: usize) -> MemoryResult<Vec<RetrievedRecord>> {
        Err(MemoryError::Unavailable("backend offline".into()))
    }

    async fn stats(&self, _agent_id: &str) -> MemoryResult<StatsSnapshot> {
        Err(MemoryError::Unavailable("backend offline".into()))
    }

    async fn list_records(&self) -> MemoryResult<Vec<Arc<EpisodicMemoryRecord>>> {
        Err(MemoryError::Unavailable("backend offline".into()))
    }
}

/// Wraps a store and delays every retrieval.
pub struct DelayedMemory {
    inner: Arc<dyn EpisodicStore>,
    delay: Duration,
}

impl DelayedMemory {
    pub fn new(inner: Arc<dyn EpisodicStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl EpisodicStore for DelayedMemory {
    async fn certify_and_store(
        &self,
        episode: &Episode,
        profile: &ReliabilityProfile,
    ) -> MemoryResult<CertificationOutcome> {
        self.inner.certify_and_store(episode, profile).await
    }

    async fn retrieve_similar(&self, task: &Task, k: usize) -> MemoryResult<Vec<RetrievedRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.retrieve_similar(task, k).await
    }

    async fn stats(&self, agent_id: &str) -> MemoryResult<StatsSnapshot> {
        self.inner.stats(agent_id).await
    }

    async fn list_records(&self) -> MemoryResult<Vec<Arc<EpisodicMemoryRecord>>> {
        self.inner.list_records().await
    }
}
