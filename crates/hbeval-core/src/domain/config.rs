//! Certification configuration surface.
//!
//! One serde-backed struct carries every recognised option; components
//! receive narrow views (`RunnerConfig`, `PlannerConfig`, `MemoryConfig`,
//! `VarianceBands`) so each sees only its own knobs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{EvalError, EvalResult};

/// All recognised options, with documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CertificationConfig {
    /// Repetitions per variant.
    #[serde(rename = "K", alias = "k")]
    pub k: usize,
    pub variance_stability_bound: f64,
    pub variance_risk_bound: f64,
    pub pei_threshold: f64,
    pub pei_debounce_steps: usize,
    pub certification_success_bar: f64,
    pub certification_consistency_bar: f64,
    pub memory_max_records: usize,
    pub memory_max_age_days: Option<u64>,
    pub retrieval_min_similarity: f64,
    pub retrieval_k: usize,
    pub replan_similarity_bar: f64,
    #[serde(alias = "attemptTimeout")]
    pub attempt_timeout_ms: u64,
    pub retrieval_timeout_ms: u64,
    pub max_concurrent_attempts: usize,
    /// Sustained PEI degradation windows needed before `RISK_MITIGATION`.
    pub risk_mitigation_min_windows: usize,
}

impl Default for CertificationConfig {
    fn default() -> Self {
        Self {
            k: 5,
            variance_stability_bound: 0.05,
            variance_risk_bound: 0.15,
            pei_threshold: 0.5,
            pei_debounce_steps: 3,
            certification_success_bar: 1.0,
            certification_consistency_bar: 0.8,
            memory_max_records: 1000,
            memory_max_age_days: None,
            retrieval_min_similarity: 0.3,
            retrieval_k: 3,
            replan_similarity_bar: 0.5,
            attempt_timeout_ms: 30_000,
            retrieval_timeout_ms: 5_000,
            max_concurrent_attempts: 1,
            risk_mitigation_min_windows: 2,
        }
    }
}

fn unit_interval(name: &str, value: f64) -> EvalResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EvalError::InvalidConfig(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn non_zero(name: &str, value: u64) -> EvalResult<()> {
    if value == 0 {
        return Err(EvalError::InvalidConfig(format!("{name} must be non-zero")));
    }
    Ok(())
}

impl CertificationConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> EvalResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EvalResult<()> {
        non_zero("K", self.k as u64)?;
        unit_interval("varianceStabilityBound", self.variance_stability_bound)?;
        unit_interval("varianceRiskBound", self.variance_risk_bound)?;
        if self.variance_stability_bound > self.variance_risk_bound {
            return Err(EvalError::InvalidConfig(format!(
                "varianceStabilityBound ({}) exceeds varianceRiskBound ({})",
                self.variance_stability_bound, self.variance_risk_bound
            )));
        }
        unit_interval("peiThreshold", self.pei_threshold)?;
        non_zero("peiDebounceSteps", self.pei_debounce_steps as u64)?;
        unit_interval("certificationSuccessBar", self.certification_success_bar)?;
        // A zero bar would admit episodes with nothing to reuse.
        if self.certification_success_bar <= 0.0 {
            return Err(EvalError::InvalidConfig(
                "certificationSuccessBar must be above 0".to_string(),
            ));
        }
        unit_interval(
            "certificationConsistencyBar",
            self.certification_consistency_bar,
        )?;
        non_zero("memoryMaxRecords", self.memory_max_records as u64)?;
        unit_interval("retrievalMinSimilarity", self.retrieval_min_similarity)?;
        non_zero("retrievalK", self.retrieval_k as u64)?;
        unit_interval("replanSimilarityBar", self.replan_similarity_bar)?;
        non_zero("attemptTimeoutMs", self.attempt_timeout_ms)?;
        non_zero("retrievalTimeoutMs", self.retrieval_timeout_ms)?;
        non_zero("maxConcurrentAttempts", self.max_concurrent_attempts as u64)?;
        Ok(())
    }

    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            max_concurrent_attempts: self.max_concurrent_attempts,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }

    pub fn planner(&self) -> PlannerConfig {
        PlannerConfig {
            pei_threshold: self.pei_threshold,
            debounce_steps: self.pei_debounce_steps,
            retrieval_k: self.retrieval_k,
            replan_similarity_bar: self.replan_similarity_bar,
            retrieval_timeout: Duration::from_millis(self.retrieval_timeout_ms),
        }
    }

    pub fn memory(&self) -> MemoryConfig {
        MemoryConfig {
            success_bar: self.certification_success_bar,
            consistency_bar: self.certification_consistency_bar,
            max_records: self.memory_max_records,
            max_age_days: self.memory_max_age_days,
            min_similarity: self.retrieval_min_similarity,
        }
    }

    pub fn variance_bands(&self) -> VarianceBands {
        VarianceBands {
            stability_bound: self.variance_stability_bound,
            risk_bound: self.variance_risk_bound,
        }
    }
}

/// Episode Runner knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub max_concurrent_attempts: usize,
    pub attempt_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        CertificationConfig::default().runner()
    }
}

/// Adaptive Planner knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub pei_threshold: f64,
    pub debounce_steps: usize,
    pub retrieval_k: usize,
    pub replan_similarity_bar: f64,
    pub retrieval_timeout: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        CertificationConfig::default().planner()
    }
}

/// Certified Episodic Memory knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub success_bar: f64,
    pub consistency_bar: f64,
    pub max_records: usize,
    pub max_age_days: Option<u64>,
    pub min_similarity: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        CertificationConfig::default().memory()
    }
}

/// Variance thresholds consumed by status and risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceBands {
    pub stability_bound: f64,
    pub risk_bound: f64,
}

impl Default for VarianceBands {
    fn default() -> Self {
        CertificationConfig::default().variance_bands()
    }
}
