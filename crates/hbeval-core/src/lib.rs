//! HB-Eval core library.
//!
//! Reliability certification for autonomous agents: repeated, perturbed
//! evaluation into a reliability profile, adaptive replanning from
//! certified history, and a certified episodic memory with audit counters.

pub mod agent;
pub mod artifact;
pub mod classify;
pub mod domain;
pub mod evaluator;
pub mod fakes;
pub mod memory;
pub mod metrics;
pub mod obs;
pub mod perturbation;
pub mod pipeline;
pub mod planner;
pub mod runner;
pub mod sim;
pub mod telemetry;

pub use agent::{Agent, NoPerturbation, PerturbationSource, StepDirective, StepGuide};

pub use artifact::{read_profile_artifact, write_profile_artifact};

pub use classify::{classify_decision, Decision, DecisionLabel};

pub use domain::{
    AgentError, Attempt, AttemptReport, CertificationConfig, Episode, EvalError, EvalResult,
    FailureCategory, PlannerPhase, PlanningSummary, PlanningTrace, ReliabilityProfile,
    ReliabilityStatus, Step, Task, Variant,
};

pub use evaluator::{EpisodeEvaluator, Evaluation};

pub use memory::{
    CertificationOutcome, CertifiedMemory, EpisodicMemoryRecord, EpisodicStore, MemoryError,
    RetrievedRecord, StatsRegistry, StatsSnapshot,
};

pub use pipeline::{CertificationPipeline, PipelineReport};

pub use planner::{compute_pei, AdaptivePlanner, PlanningState};

pub use runner::{CancelHandle, EpisodeRunner};

pub use sim::{SimulatedAgent, SimulationProfile};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
