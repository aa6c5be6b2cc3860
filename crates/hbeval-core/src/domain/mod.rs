//! Domain models for HB-Eval.
//!
//! Canonical definitions for the core entities:
//! - `Task` / `Variant`: what the agent is asked to do, and its perturbations
//! - `Attempt` / `Episode`: what the agent did
//! - `ReliabilityProfile`: the statistical verdict over an episode
//! - `CertificationConfig`: every tunable threshold

pub mod attempt;
pub mod config;
pub mod digest;
pub mod error;
pub mod planning;
pub mod profile;
pub mod task;

pub use attempt::{classify_failure, Attempt, AttemptReport, Episode, FailureCategory, Step};
pub use config::{CertificationConfig, MemoryConfig, PlannerConfig, RunnerConfig, VarianceBands};
pub use digest::ContentDigest;
pub use error::{AgentError, EvalError, EvalResult};
pub use planning::{PlannerFallback, PlannerPhase, PlanningSummary, PlanningTrace};
pub use profile::{
    composite_reliability, FairnessRisk, ProfileBreakdown, ReliabilityProfile, ReliabilityStatus,
};
pub use task::{Task, Variant, DEFAULT_MAX_STEPS};
