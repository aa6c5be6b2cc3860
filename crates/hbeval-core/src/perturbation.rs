//! Built-in semantic-preserving perturbation sources.
//!
//! Each generator rewrites a task description without changing what is
//! being asked. All of them are deterministic, so `generate` stays pure.

use std::collections::HashSet;

use regex::Regex;

use crate::agent::PerturbationSource;
use crate::domain::{ContentDigest, Task, Variant};

/// Word-overlap floor below which a variant is flagged.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.7;

/// A single text rewrite.
pub trait TextPerturbation: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, text: &str) -> String;

    /// The perturbed variant of `task`, or `None` when the rewrite is a no-op.
    fn variant_for(&self, task: &Task) -> Option<Variant> {
        let rewritten = self.apply(&task.description);
        (rewritten != task.description).then(|| Variant::perturbed(task, self.name(), rewritten))
    }
}

macro_rules! single_source {
    ($ty:ty) => {
        impl PerturbationSource for $ty {
            fn name(&self) -> &str {
                TextPerturbation::name(self)
            }

            fn generate(&self, task: &Task) -> Vec<Variant> {
                self.variant_for(task).into_iter().collect()
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Paraphrase
// ---------------------------------------------------------------------------

const SYNONYMS: &[(&str, &str)] = &[
    ("find", "locate"),
    ("get", "retrieve"),
    ("show", "display"),
    ("click", "select"),
    ("navigate", "go"),
    ("search", "look for"),
];

/// Case-insensitive whole-word synonym substitution.
pub struct Paraphrase {
    rules: Vec<(Regex, &'static str)>,
}

impl Default for Paraphrase {
    fn default() -> Self {
        Self::new()
    }
}

impl Paraphrase {
    pub fn new() -> Self {
        let rules = SYNONYMS
            .iter()
            .filter_map(|(word, synonym)| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
                    .ok()
                    .map(|re| (re, *synonym))
            })
            .collect();
        Self { rules }
    }
}

impl TextPerturbation for Paraphrase {
    fn name(&self) -> &str {
        "paraphrase"
    }

    fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, (re, synonym)| {
                re.replace_all(&acc, *synonym).into_owned()
            })
    }
}

single_source!(Paraphrase);

// ---------------------------------------------------------------------------
// Context preamble
// ---------------------------------------------------------------------------

const PREAMBLES: &[&str] = &[
    "Please help me with the following task: ",
    "I need assistance with: ",
    "Could you please: ",
    "Task to complete: ",
];

/// Whether to add a conversational preamble or strip a known one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    #[default]
    Add,
    Remove,
}

/// Adds or strips non-essential context. The added preamble is chosen by
/// a digest of the text, so the same text always gets the same preamble.
#[derive(Debug, Clone, Default)]
pub struct ContextPreamble {
    pub mode: ContextMode,
}

impl ContextPreamble {
    pub fn new(mode: ContextMode) -> Self {
        Self { mode }
    }

    fn preamble_for(text: &str) -> &'static str {
        let digest = ContentDigest::from_bytes(text.as_bytes());
        let idx = u8::from_str_radix(&digest.as_str()[..2], 16).unwrap_or(0) as usize;
        PREAMBLES[idx % PREAMBLES.len()]
    }
}

impl TextPerturbation for ContextPreamble {
    fn name(&self) -> &str {
        match self.mode {
            ContextMode::Add => "context",
            ContextMode::Remove => "context_strip",
        }
    }

    fn apply(&self, text: &str) -> String {
        match self.mode {
            ContextMode::Add => format!("{}{}", Self::preamble_for(text), text),
            ContextMode::Remove => PREAMBLES
                .iter()
                .find_map(|p| text.strip_prefix(p))
                .unwrap_or(text)
                .to_string(),
        }
    }
}

single_source!(ContextPreamble);

// ---------------------------------------------------------------------------
// Format shift
// ---------------------------------------------------------------------------

/// Cycles layout: numbered list to bullets, bullets to a paragraph, and
/// anything else to a numbered list.
pub struct FormatShift {
    numbered: Option<Regex>,
    bulleted: Option<Regex>,
}

impl Default for FormatShift {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatShift {
    pub fn new() -> Self {
        Self {
            numbered: Regex::new(r"(?m)^\d+\.\s*").ok(),
            bulleted: Regex::new(r"(?m)^[•\-\*]\s*").ok(),
        }
    }

    fn is_match(re: &Option<Regex>, text: &str) -> bool {
        re.as_ref().is_some_and(|re| re.is_match(text))
    }

    fn strip(re: &Option<Regex>, line: &str) -> String {
        match re {
            Some(re) => re.replace(line, "").into_owned(),
            None => line.to_string(),
        }
    }

    fn to_numbered(&self, text: &str) -> String {
        let mut count = 0;
        text.split('\n')
            .map(|line| {
                if line.trim().is_empty() {
                    line.to_string()
                } else {
                    count += 1;
                    format!("{count}. {}", Self::strip(&self.bulleted, line))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_bullets(&self, text: &str) -> String {
        match &self.numbered {
            Some(re) => re.replace_all(text, "• ").into_owned(),
            None => text.to_string(),
        }
    }

    fn to_paragraph(&self, text: &str) -> String {
        text.split('\n')
            .map(|line| Self::strip(&self.bulleted, line))
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TextPerturbation for FormatShift {
    fn name(&self) -> &str {
        "format"
    }

    fn apply(&self, text: &str) -> String {
        if Self::is_match(&self.numbered, text) {
            self.to_bullets(text)
        } else if Self::is_match(&self.bulleted, text) {
            self.to_paragraph(text)
        } else {
            self.to_numbered(text)
        }
    }
}

single_source!(FormatShift);

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// Applies its parts in order, each to the previous output. Named after
/// its parts joined with `+`, e.g. `paraphrase+format`.
pub struct Composite {
    name: String,
    parts: Vec<Box<dyn TextPerturbation>>,
}

impl Composite {
    pub fn new(parts: Vec<Box<dyn TextPerturbation>>) -> Self {
        let name = parts
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, parts }
    }
}

impl TextPerturbation for Composite {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, text: &str) -> String {
        self.parts
            .iter()
            .fold(text.to_string(), |acc, part| part.apply(&acc))
    }
}

single_source!(Composite);

// ---------------------------------------------------------------------------
// Standard set
// ---------------------------------------------------------------------------

/// One variant per built-in generator: paraphrase, context, format.
pub struct StandardPerturbations {
    generators: Vec<Box<dyn TextPerturbation>>,
}

impl Default for StandardPerturbations {
    fn default() -> Self {
        Self {
            generators: vec![
                Box::new(Paraphrase::new()),
                Box::new(ContextPreamble::new(ContextMode::Add)),
                Box::new(FormatShift::new()),
            ],
        }
    }
}

impl StandardPerturbations {
    pub fn with_generators(generators: Vec<Box<dyn TextPerturbation>>) -> Self {
        Self { generators }
    }
}

impl PerturbationSource for StandardPerturbations {
    fn name(&self) -> &str {
        "standard"
    }

    fn generate(&self, task: &Task) -> Vec<Variant> {
        self.generators
            .iter()
            .filter_map(|g| g.variant_for(task))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Jaccard overlap of lowercase whitespace-separated words.
pub fn semantic_similarity(a: &str, b: &str) -> f64 {
    let lower_a = a.to_lowercase();
    let lower_b = b.to_lowercase();
    let words_a: HashSet<&str> = lower_a.split_whitespace().collect();
    let words_b: HashSet<&str> = lower_b.split_whitespace().collect();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

/// `(passes, similarity)` for a perturbed description.
pub fn validate_perturbation(original: &str, perturbed: &str, min_similarity: f64) -> (bool, f64) {
    let similarity = semantic_similarity(original, perturbed);
    (similarity >= min_similarity, similarity)
}
