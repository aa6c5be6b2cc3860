//! Tasks and their semantically-equivalent variants.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::digest::ContentDigest;
use super::error::{EvalError, EvalResult};

/// Default step budget for a task when none is declared.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// A unit of work the agent is certified against. Immutable once defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identity.
    pub id: String,

    /// Natural-language task description handed to the agent.
    pub description: String,

    /// Reference step count for an efficient solution.
    pub optimal_steps: usize,

    /// Declared constraints (e.g. safety predicates).
    #[serde(default)]
    pub constraints: BTreeSet<String>,

    /// Step budget; reaching it without success classifies as a timeout.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

impl Task {
    /// Create a task with no constraints and the default step budget.
    pub fn new(id: impl Into<String>, description: impl Into<String>, optimal_steps: usize) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            optimal_steps,
            constraints: BTreeSet::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Add a declared constraint.
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.insert(constraint.into());
        self
    }

    /// Override the step budget.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Reject structurally empty tasks before any execution starts.
    pub fn validate(&self) -> EvalResult<()> {
        if self.id.trim().is_empty() {
            return Err(EvalError::InvalidTask("task id must not be empty".into()));
        }
        if self.description.trim().is_empty() {
            return Err(EvalError::InvalidTask(format!(
                "task '{}' has an empty description",
                self.id
            )));
        }
        if self.max_steps == 0 {
            return Err(EvalError::InvalidTask(format!(
                "task '{}' has a zero step budget",
                self.id
            )));
        }
        Ok(())
    }
}

/// A task description transformed by a perturbation. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    /// `<task_id>` for the identity variant, otherwise
    /// `<task_id>#<perturbation>-<digest>` where the digest covers the
    /// perturbation name and the perturbed description.
    pub id: String,

    /// Source task identity.
    pub task_id: String,

    /// The (possibly perturbed) description.
    pub description: String,

    /// Perturbation name; `None` for the unperturbed identity variant.
    pub perturbation: Option<String>,
}

fn variant_digest(perturbation: &str, description: &str) -> ContentDigest {
    let mut content = Vec::with_capacity(perturbation.len() + description.len() + 1);
    content.extend_from_slice(perturbation.as_bytes());
    content.push(0);
    content.extend_from_slice(description.as_bytes());
    ContentDigest::from_bytes(&content)
}

impl Variant {
    /// The unperturbed variant of `task`.
    pub fn identity(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            task_id: task.id.clone(),
            description: task.description.clone(),
            perturbation: None,
        }
    }

    /// A perturbed variant of `task` carrying `description`.
    pub fn perturbed(task: &Task, perturbation: &str, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: format!(
                "{}#{}-{}",
                task.id,
                perturbation,
                variant_digest(perturbation, &description).short()
            ),
            task_id: task.id.clone(),
            description,
            perturbation: Some(perturbation.to_string()),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.perturbation.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("t1", "find the cheapest flight", 4)
            .with_constraint("no_payment")
            .with_max_steps(20);
        assert_eq!(task.max_steps, 20);
        assert!(task.constraints.contains("no_payment"));
        task.validate().unwrap();
    }

    #[test]
    fn test_empty_task_rejected() {
        assert!(Task::new("", "desc", 1).validate().is_err());
        assert!(Task::new("t", "   ", 1).validate().is_err());
        assert!(Task::new("t", "desc", 1).with_max_steps(0).validate().is_err());
    }

    #[test]
    fn test_variant_ids() {
        let task = Task::new("t1", "find it", 2);
        let id = Variant::identity(&task);
        assert!(id.is_identity());
        assert_eq!(id.id, "t1");

        let p = Variant::perturbed(&task, "paraphrase", "locate it");
        assert!(p.id.starts_with("t1#paraphrase-"));
        assert_eq!(p.id.len(), "t1#paraphrase-".len() + 12);
        assert_eq!(p.task_id, "t1");
        assert!(!p.is_identity());

        // Same content, same id; different text under the same name, new id.
        assert_eq!(Variant::perturbed(&task, "paraphrase", "locate it").id, p.id);
        let other = Variant::perturbed(&task, "paraphrase", "track it down");
        assert_ne!(other.id, p.id);
        assert_ne!(Variant::perturbed(&task, "format", "locate it").id, p.id);
    }

    #[test]
    fn test_task_defaults_on_deserialize() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "description": "do it",
            "optimal_steps": 3
        }))
        .unwrap();
        assert_eq!(task.max_steps, DEFAULT_MAX_STEPS);
        assert!(task.constraints.is_empty());
    }
}
