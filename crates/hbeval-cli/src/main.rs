//! HB-Eval - reliability certification CLI
//!
//! The `hbeval` command evaluates an agent over repeated, perturbed runs of
//! a task, classifies the deployment decision and offers the episode to an
//! in-process certified memory.
//!
//! ## Commands
//!
//! - `evaluate`: Certify the seeded simulated agent on a task
//! - `scenario`: Run a built-in scripted reference scenario
//! - `verify`: Check a persisted profile artifact against its digest
//! - `config`: Show or validate a configuration file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};

use hbeval_core::fakes::{walk, ScriptedAgent, ScriptedOutcome};
use hbeval_core::perturbation::StandardPerturbations;
use hbeval_core::{
    read_profile_artifact, write_profile_artifact, Agent, CertificationConfig,
    CertificationOutcome, CertificationPipeline, PerturbationSource, PipelineReport,
    SimulatedAgent, SimulationProfile, Step, Task, Variant,
};

#[derive(Parser)]
#[command(name = "hbeval")]
#[command(author = "HB-Eval Contributors")]
#[command(version = hbeval_core::VERSION)]
#[command(about = "Behavioral reliability certification for autonomous agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Certification configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true, env = "HBEVAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Certify the seeded simulated agent on a task
    Evaluate {
        /// Task identity
        #[arg(long)]
        task_id: String,

        /// Natural-language task description
        #[arg(long)]
        description: String,

        /// Reference step count for an efficient solution
        #[arg(long, default_value_t = 4)]
        optimal_steps: usize,

        /// Declared task constraint (repeatable)
        #[arg(long = "constraint")]
        constraints: Vec<String>,

        /// Seed for the simulated agent
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Probability that a simulated attempt succeeds
        #[arg(long, default_value_t = 0.8)]
        success_probability: f64,

        /// Skip the built-in perturbations and run the task as written
        #[arg(long)]
        no_perturb: bool,

        /// Write the profile and its digest under this directory
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Print the full report as JSON instead of a summary
        #[arg(long)]
        report_json: bool,
    },

    /// Run a built-in scripted reference scenario
    Scenario {
        #[arg(value_enum)]
        kind: ScenarioKind,

        /// Print the full report as JSON instead of a summary
        #[arg(long)]
        report_json: bool,
    },

    /// Check a persisted profile artifact against its digest
    Verify {
        /// Task identity the artifact was written for
        task_id: String,

        /// Artifact root directory
        #[arg(long, default_value = ".hbeval/profiles")]
        dir: PathBuf,
    },

    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        /// Path to the JSON configuration
        path: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ScenarioKind {
    /// Always succeeds with one trajectory; certified
    Stable,
    /// Succeeds 7 of 20 times; high variance, no certified memory
    HighRisk,
    /// Mixed variants with repeated efficiency collapse; blocked
    Degrading,
    /// Wanders until a certified plan is substituted
    Adaptive,
}

/// Compact view of a pipeline report for terminal output.
#[derive(Debug, Serialize)]
struct ReportSummary<'a> {
    task_id: &'a str,
    agent_id: &'a str,
    attempts: usize,
    partial: bool,
    success_rate: f64,
    variance: f64,
    behavioral_consistency: f64,
    perturbation_robustness: f64,
    status: String,
    decision: String,
    flagged: bool,
    certification: String,
    failure_resilience_rate: f64,
    traceability_index: f64,
}

impl<'a> ReportSummary<'a> {
    fn from_report(report: &'a PipelineReport) -> Self {
        let profile = &report.evaluation.profile;
        let certification = match &report.certification {
            Some(CertificationOutcome::Certified { record_id, .. }) => {
                format!("certified ({record_id})")
            }
            Some(CertificationOutcome::Rejected { reason }) => format!("rejected: {reason}"),
            None => "skipped: memory unavailable".to_string(),
        };
        Self {
            task_id: &profile.task_id,
            agent_id: &report.stats.agent_id,
            attempts: profile.attempts,
            partial: profile.partial,
            success_rate: profile.success_rate,
            variance: profile.variance,
            behavioral_consistency: profile.behavioral_consistency,
            perturbation_robustness: profile.perturbation_robustness,
            status: profile.status.to_string(),
            decision: report.decision.label.to_string(),
            flagged: report.decision.flagged,
            certification,
            failure_resilience_rate: report.stats.failure_resilience_rate,
            traceability_index: report.stats.traceability_index,
        }
    }

    fn print(&self, reasons: &[String]) {
        println!("Task:          {}", self.task_id);
        println!("Agent:         {}", self.agent_id);
        println!(
            "Attempts:      {}{}",
            self.attempts,
            if self.partial { " (partial)" } else { "" }
        );
        println!("Success rate:  {:.3}", self.success_rate);
        println!("Variance:      {:.4} [{}]", self.variance, self.status);
        println!("Consistency:   {:.3}", self.behavioral_consistency);
        println!("Robustness:    {:.3}", self.perturbation_robustness);
        println!(
            "Decision:      {}{}",
            self.decision,
            if self.flagged { " (flagged)" } else { "" }
        );
        for reason in reasons {
            println!("               - {reason}");
        }
        println!("Memory:        {}", self.certification);
        println!(
            "FRR / TI:      {:.3} / {:.3}",
            self.failure_resilience_rate, self.traceability_index
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    hbeval_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Evaluate {
            task_id,
            description,
            optimal_steps,
            constraints,
            seed,
            success_probability,
            no_perturb,
            artifacts,
            report_json,
        } => {
            let mut task = Task::new(task_id, description, optimal_steps);
            for constraint in constraints {
                task = task.with_constraint(constraint);
            }
            let profile = SimulationProfile {
                success_probability,
                plan_length: optimal_steps.max(1),
                ..SimulationProfile::default()
            };
            cmd_evaluate(
                config,
                &task,
                seed,
                profile,
                no_perturb,
                artifacts.as_deref(),
                report_json,
            )
            .await
        }
        Commands::Scenario { kind, report_json } => cmd_scenario(config, kind, report_json).await,
        Commands::Verify { task_id, dir } => cmd_verify(&task_id, &dir),
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&config),
            ConfigAction::Validate { path } => cmd_config_validate(&path),
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<CertificationConfig> {
    match path {
        Some(path) => CertificationConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration: {:?}", path)),
        None => Ok(CertificationConfig::default()),
    }
}

fn print_report(report: &PipelineReport, report_json: bool) -> Result<()> {
    if report_json {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        println!("{json}");
    } else {
        ReportSummary::from_report(report).print(&report.decision.reasons);
    }
    Ok(())
}

async fn cmd_evaluate(
    config: CertificationConfig,
    task: &Task,
    seed: u64,
    profile: SimulationProfile,
    no_perturb: bool,
    artifacts: Option<&Path>,
    report_json: bool,
) -> Result<()> {
    let variants = if no_perturb {
        Vec::new()
    } else {
        StandardPerturbations::default().generate(task)
    };
    let agent: Arc<dyn Agent> = Arc::new(SimulatedAgent::new("simulated", seed, profile));

    let pipeline = CertificationPipeline::new(config).context("Invalid configuration")?;
    let report = pipeline
        .run(task, agent, &variants)
        .await
        .with_context(|| format!("Evaluation failed for task: {}", task.id))?;

    if let Some(dir) = artifacts {
        let path = write_profile_artifact(&report.evaluation.profile, dir)
            .with_context(|| format!("Failed to write profile artifact under {:?}", dir))?;
        info!(path = %path.display(), "profile artifact written");
    }

    print_report(&report, report_json)
}

fn stable_trajectory() -> Vec<Step> {
    walk(&["s1", "s2", "s3"])
}

fn wander() -> ScriptedOutcome {
    ScriptedOutcome::Fail(walk(&["s1", "s2", "s1", "s2", "s1", "s2"]), None)
}

fn high_risk_script() -> Vec<ScriptedOutcome> {
    (0..20)
        .map(|r| match r {
            0 | 6 | 12 | 18 => ScriptedOutcome::Succeed(stable_trajectory()),
            3 | 9 | 15 => ScriptedOutcome::Succeed(vec![
                Step::new("search", "s1"),
                Step::new("filter", "s2"),
                Step::new("pick", "s3"),
            ]),
            4 => wander(),
            _ => ScriptedOutcome::Fail(walk(&["s1"]), None),
        })
        .collect()
}

async fn cmd_scenario(
    config: CertificationConfig,
    kind: ScenarioKind,
    report_json: bool,
) -> Result<()> {
    let task = Task::new("scenario", "find the cheapest flight to lisbon", 3);
    let ok = || ScriptedOutcome::Succeed(stable_trajectory());
    let miss = || ScriptedOutcome::Fail(walk(&["s1"]), None);

    let (config, agent, variants): (CertificationConfig, ScriptedAgent, Vec<Variant>) = match kind
    {
        ScenarioKind::Stable => (
            config,
            ScriptedAgent::always("scripted-stable", stable_trajectory()),
            Vec::new(),
        ),
        ScenarioKind::HighRisk => (
            CertificationConfig { k: 20, ..config },
            ScriptedAgent::new("scripted-high-risk", high_risk_script()),
            Vec::new(),
        ),
        ScenarioKind::Degrading => {
            let paraphrase =
                Variant::perturbed(&task, "paraphrase", "locate the cheapest flight to lisbon");
            let agent = ScriptedAgent::new(
                "scripted-degrading",
                vec![ok(), ok(), wander(), ok(), miss(), ok(), wander(), ok(), miss(), ok()],
            )
            .with_script(
                paraphrase.id.clone(),
                vec![ok(), miss(), wander(), miss(), ok(), miss(), miss(), ok(), miss(), miss()],
            );
            (CertificationConfig { k: 10, ..config }, agent, vec![paraphrase])
        }
        ScenarioKind::Adaptive => (
            config,
            ScriptedAgent::new("scripted-adaptive", vec![wander()]).recovering(),
            Vec::new(),
        ),
    };

    let pipeline = CertificationPipeline::new(config).context("Invalid configuration")?;

    if kind == ScenarioKind::Adaptive {
        // Seed memory with a certified reference for the same task.
        let seed = Arc::new(ScriptedAgent::always("scripted-stable", stable_trajectory()));
        let seeded = pipeline
            .run(&task, seed, &[])
            .await
            .context("Failed to seed certified memory")?;
        if !seeded.certification.is_some_and(|c| c.is_certified()) {
            anyhow::bail!("Reference episode was not certified; check certification bars");
        }
        info!("certified memory seeded with reference episode");
    }

    let report = pipeline
        .run(&task, Arc::new(agent), &variants)
        .await
        .with_context(|| format!("Scenario {:?} failed", kind))?;
    print_report(&report, report_json)
}

fn cmd_verify(task_id: &str, dir: &Path) -> Result<()> {
    let profile = read_profile_artifact(task_id, dir)
        .with_context(|| format!("Failed to verify profile artifact for task: {}", task_id))?;
    println!(
        "Verified profile for {} (evaluated {}): success rate {:.3}, variance {:.4} [{}]",
        profile.task_id,
        profile.evaluated_at.to_rfc3339(),
        profile.success_rate,
        profile.variance,
        profile.status
    );
    Ok(())
}

fn cmd_config_show(config: &CertificationConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("{json}");
    Ok(())
}

fn cmd_config_validate(path: &Path) -> Result<()> {
    CertificationConfig::from_json_file(path)
        .with_context(|| format!("Invalid configuration: {:?}", path))?;
    println!("Configuration OK: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_evaluate() {
        let cli = Cli::try_parse_from([
            "hbeval",
            "--verbose",
            "evaluate",
            "--task-id",
            "t1",
            "--description",
            "find a flight",
            "--constraint",
            "no_payment",
            "--seed",
            "7",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Evaluate {
                task_id,
                constraints,
                seed,
                optimal_steps,
                ..
            } => {
                assert_eq!(task_id, "t1");
                assert_eq!(constraints, vec!["no_payment".to_string()]);
                assert_eq!(seed, 7);
                assert_eq!(optimal_steps, 4);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn test_scenario_kind_names() {
        let cli = Cli::try_parse_from(["hbeval", "scenario", "high-risk"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Scenario {
                kind: ScenarioKind::HighRisk,
                ..
            }
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hbeval.json");
        std::fs::write(&path, r#"{"K": 8, "peiDebounceSteps": 2}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.k, 8);
        assert_eq!(config.pei_debounce_steps, 2);

        std::fs::write(&path, r#"{"memoryMaxRecords": 0}"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
        assert!(cmd_config_validate(&path).is_err());
    }

    #[test]
    fn test_high_risk_script_shape() {
        let script = high_risk_script();
        assert_eq!(script.len(), 20);
        let successes = script
            .iter()
            .filter(|o| matches!(o, ScriptedOutcome::Succeed(_)))
            .count();
        assert_eq!(successes, 7);
    }

    #[tokio::test]
    async fn test_evaluate_writes_verifiable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("cli-task", "find a cheap hotel", 3);
        let profile = SimulationProfile {
            success_probability: 1.0,
            detour_probability: 0.0,
            plan_length: 3,
            ..SimulationProfile::default()
        };
        cmd_evaluate(
            CertificationConfig::default(),
            &task,
            1,
            profile,
            false,
            Some(dir.path()),
            true,
        )
        .await
        .unwrap();
        cmd_verify("cli-task", dir.path()).unwrap();
    }

    #[tokio::test]
    async fn test_every_scenario_runs() {
        for kind in [
            ScenarioKind::Stable,
            ScenarioKind::HighRisk,
            ScenarioKind::Degrading,
            ScenarioKind::Adaptive,
        ] {
            cmd_scenario(CertificationConfig::default(), kind, false)
                .await
                .unwrap();
        }
    }
}
