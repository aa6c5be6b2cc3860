//! Seeded simulated agent for demos and determinism checks.
//!
//! Every attempt draws from an RNG seeded by `(seed, variant id, attempt
//! number for that variant)`, so two agents built with the same seed and
//! profile produce identical episodes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::{Agent, StepDirective, StepGuide};
use crate::domain::{AgentError, AttemptReport, ContentDigest, Step, Variant};

/// Behavioural knobs for the simulated agent.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationProfile {
    pub success_probability: f64,
    /// Subtracted from the success probability on perturbed variants.
    pub perturbation_penalty: f64,
    /// Steps on the direct path to the goal.
    pub plan_length: usize,
    /// Chance per step of wandering back to the previous state.
    pub detour_probability: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            success_probability: 0.8,
            perturbation_penalty: 0.1,
            plan_length: 4,
            detour_probability: 0.1,
        }
    }
}

struct Plan {
    steps: Vec<Step>,
    success: bool,
}

pub struct SimulatedAgent {
    id: String,
    seed: u64,
    profile: SimulationProfile,
    draws: Mutex<HashMap<String, u64>>,
    scratch: Mutex<Vec<Step>>,
}

impl SimulatedAgent {
    pub fn new(id: impl Into<String>, seed: u64, profile: SimulationProfile) -> Self {
        Self {
            id: id.into(),
            seed,
            profile,
            draws: Mutex::new(HashMap::new()),
            scratch: Mutex::new(Vec::new()),
        }
    }

    /// Restart every per-variant RNG stream from the beginning.
    pub fn rewind(&self) {
        self.draws.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn rng_for(&self, variant: &Variant) -> StdRng {
        let n = {
            let mut draws = self.draws.lock().unwrap_or_else(|e| e.into_inner());
            let n = draws.entry(variant.id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let material = format!("{}:{}:{}", self.seed, variant.id, n);
        let digest = ContentDigest::from_bytes(material.as_bytes());
        let seed = u64::from_str_radix(&digest.as_str()[..16], 16).unwrap_or(self.seed);
        StdRng::seed_from_u64(seed)
    }

    fn plan(&self, variant: &Variant) -> Plan {
        let mut rng = self.rng_for(variant);
        let p = &self.profile;
        let mut probability = p.success_probability;
        if !variant.is_identity() {
            probability -= p.perturbation_penalty;
        }
        let success = rng.gen_bool(probability.clamp(0.0, 1.0));
        let detour = if success {
            p.detour_probability
        } else {
            (p.detour_probability * 3.0).min(0.9)
        };

        let mut steps = Vec::new();
        let length = if success {
            p.plan_length
        } else {
            rng.gen_range(0..=p.plan_length)
        };
        for i in 1..=length {
            if i > 1 && rng.gen_bool(detour.clamp(0.0, 1.0)) {
                steps.push(Step::new("backtrack", format!("s{}", i - 1)));
            }
            steps.push(Step::new(format!("advance_{i}"), format!("s{i}")));
        }
        if !success && !steps.is_empty() && rng.gen_bool(0.3) {
            steps.push(Step::new("invalid", "error"));
        }

        self.scratch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(steps.iter().cloned());
        Plan { steps, success }
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn reset(&self) {
        self.scratch.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    async fn attempt(&self, variant: &Variant) -> Result<AttemptReport, AgentError> {
        let plan = self.plan(variant);
        Ok(if plan.success {
            AttemptReport::success(plan.steps)
        } else {
            AttemptReport::failure(plan.steps, None)
        })
    }

    async fn attempt_guided(
        &self,
        variant: &Variant,
        guide: &mut dyn StepGuide,
    ) -> Result<AttemptReport, AgentError> {
        let plan = self.plan(variant);
        let mut executed = Vec::with_capacity(plan.steps.len());
        for step in plan.steps {
            executed.push(step.clone());
            match guide.on_step(&step).await {
                StepDirective::Continue => {}
                StepDirective::Abort(category) => {
                    return Ok(AttemptReport::failure(executed, Some(category)));
                }
                StepDirective::Substitute(suffix) => {
                    for step in suffix {
                        guide.on_step(&step).await;
                        executed.push(step);
                    }
                    return Ok(AttemptReport::success(executed));
                }
            }
        }
        Ok(if plan.success {
            AttemptReport::success(executed)
        } else {
            AttemptReport::failure(executed, None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;

    #[tokio::test]
    async fn test_same_seed_same_reports() {
        let task = Task::new("t", "d", 4);
        let v = Variant::identity(&task);
        let a = SimulatedAgent::new("a", 7, SimulationProfile::default());
        let b = SimulatedAgent::new("a", 7, SimulationProfile::default());
        for _ in 0..10 {
            assert_eq!(a.attempt(&v).await.unwrap(), b.attempt(&v).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_rewind_replays_stream() {
        let task = Task::new("t", "d", 4);
        let v = Variant::identity(&task);
        let agent = SimulatedAgent::new("a", 3, SimulationProfile::default());
        let first = agent.attempt(&v).await.unwrap();
        agent.rewind();
        assert_eq!(agent.attempt(&v).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_certain_success_follows_plan() {
        let task = Task::new("t", "d", 4);
        let profile = SimulationProfile {
            success_probability: 1.0,
            detour_probability: 0.0,
            ..SimulationProfile::default()
        };
        let agent = SimulatedAgent::new("a", 1, profile);
        let report = agent.attempt(&Variant::identity(&task)).await.unwrap();
        assert!(report.success);
        assert_eq!(report.trajectory.len(), 4);
    }
}
