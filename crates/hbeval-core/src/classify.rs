//! Deployment decision from a reliability profile.
//!
//! Classification is a pure function of the profile (including its
//! planning summary) and the configured bounds. It does not look at
//! whether memory was available; that branch lives in the planner.
//!
//! Rule, first match wins:
//! 1. any attempt was corrected from certified memory: `CORRECT_WITH_MEMORY`
//! 2. variance at or above the risk bound and at least
//!    `riskMitigationMinWindows` sustained PEI windows: `RISK_MITIGATION`
//! 3. otherwise `STABLE`, flagged when variance is at or above the risk
//!    bound or any sustained PEI window was observed

use serde::{Deserialize, Serialize};

use crate::domain::{CertificationConfig, ReliabilityProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionLabel {
    Stable,
    CorrectWithMemory,
    RiskMitigation,
}

impl DecisionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "STABLE",
            Self::CorrectWithMemory => "CORRECT_WITH_MEMORY",
            Self::RiskMitigation => "RISK_MITIGATION",
        }
    }

    pub fn blocks_deployment(self) -> bool {
        matches!(self, Self::RiskMitigation)
    }
}

impl std::fmt::Display for DecisionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labelled decision with the observations that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub label: DecisionLabel,
    /// Set on `STABLE` decisions that still warrant review.
    pub flagged: bool,
    pub reasons: Vec<String>,
}

impl Decision {
    pub fn blocks_deployment(&self) -> bool {
        self.label.blocks_deployment()
    }
}

pub fn classify_decision(profile: &ReliabilityProfile, config: &CertificationConfig) -> Decision {
    let bands = config.variance_bands();
    let planning = &profile.planning;
    let high_variance = profile.is_high_variance(&bands);
    let windows = planning.sustained_windows;

    let mut reasons = Vec::new();
    if high_variance {
        reasons.push(format!(
            "variance {:.4} at or above risk bound {:.4}",
            profile.variance, bands.risk_bound
        ));
    }
    if windows > 0 {
        reasons.push(format!(
            "{windows} sustained PEI window(s) below threshold {:.2}",
            config.pei_threshold
        ));
    }

    if planning.attempts_replanned > 0 {
        reasons.push(format!(
            "{} attempt(s) replanned from certified memory, {} recovered",
            planning.attempts_replanned, planning.recoveries
        ));
        return Decision {
            label: DecisionLabel::CorrectWithMemory,
            flagged: false,
            reasons,
        };
    }

    if high_variance && windows >= config.risk_mitigation_min_windows {
        return Decision {
            label: DecisionLabel::RiskMitigation,
            flagged: false,
            reasons,
        };
    }

    Decision {
        label: DecisionLabel::Stable,
        flagged: high_variance || windows > 0,
        reasons,
    }
}
