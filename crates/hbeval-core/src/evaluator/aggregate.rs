//! Pure aggregation from an episode's attempts to a reliability profile.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::domain::{
    composite_reliability, Attempt, Episode, EvalError, EvalResult, FairnessRisk, PlanningSummary,
    ProfileBreakdown, ReliabilityProfile, ReliabilityStatus, VarianceBands,
};

/// Fewest attempts for which variance is defined.
pub const MIN_SAMPLES: usize = 2;

/// Share of failure categories counted as "top" for concentration.
const TOP_CATEGORY_FRACTION: f64 = 0.25;

/// Mean of the success indicators; 0 for no attempts.
pub fn success_rate(attempts: &[&Attempt]) -> f64 {
    if attempts.is_empty() {
        return 0.0;
    }
    attempts.iter().map(|a| a.indicator()).sum::<f64>() / attempts.len() as f64
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (divisor N-1). `None` below two samples.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < MIN_SAMPLES {
        return None;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Population variance (divisor N); 0 for no samples.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Levenshtein distance divided by the longer length, in `[0, 1]`.
pub fn normalized_edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 0.0,
        (true, false) | (false, true) => return 1.0,
        _ => {}
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()] as f64 / a.len().max(b.len()) as f64
}

/// Consistency over successful attempts, pairing only attempts of the
/// same variant. A variant with fewer than two successes contributes no
/// pairs and scores 1.0 so rare successes are not penalised.
///
/// Returns the pooled score and the per-variant scores.
pub fn behavioral_consistency(
    by_variant: &BTreeMap<&str, Vec<&Attempt>>,
) -> (f64, BTreeMap<String, f64>) {
    let mut all_distances = Vec::new();
    let mut per_variant = BTreeMap::new();

    for (variant_id, attempts) in by_variant {
        let successes: Vec<Vec<&str>> = attempts
            .iter()
            .filter(|a| a.success)
            .map(|a| a.actions())
            .collect();
        let mut distances = Vec::new();
        for i in 0..successes.len() {
            for j in (i + 1)..successes.len() {
                distances.push(normalized_edit_distance(&successes[i], &successes[j]));
            }
        }
        let score = if distances.is_empty() {
            1.0
        } else {
            1.0 - mean(&distances)
        };
        per_variant.insert(variant_id.to_string(), score);
        all_distances.extend(distances);
    }

    let pooled = if all_distances.is_empty() {
        1.0
    } else {
        1.0 - mean(&all_distances)
    };
    (pooled, per_variant)
}

/// Robustness plus per-variant success rates and the mean relative
/// degradation per perturbation name against the unperturbed baseline.
pub struct RobustnessSummary {
    pub robustness: f64,
    pub variant_success_rates: BTreeMap<String, f64>,
    pub degradations: BTreeMap<String, f64>,
}

/// `1 - mean relative drop` from the unperturbed variant to each perturbed
/// variant, clamped to `[0, 1]`. A zero baseline defines every drop as 0.
/// With no perturbed variants robustness is 1.0.
pub fn perturbation_robustness(by_variant: &BTreeMap<&str, Vec<&Attempt>>) -> RobustnessSummary {
    let variant_success_rates: BTreeMap<String, f64> = by_variant
        .iter()
        .map(|(id, attempts)| (id.to_string(), success_rate(attempts)))
        .collect();

    let baseline_attempts: Vec<&Attempt> = by_variant
        .values()
        .flatten()
        .filter(|a| a.perturbation.is_none())
        .copied()
        .collect();
    let baseline = success_rate(&baseline_attempts);

    // One drop per perturbed variant; several variants may share a name.
    let mut drops = Vec::new();
    let mut drops_by_name: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for attempts in by_variant.values() {
        let Some(name) = attempts.first().and_then(|a| a.perturbation.as_deref()) else {
            continue;
        };
        let drop = if baseline > 0.0 {
            (baseline - success_rate(attempts)) / baseline
        } else {
            0.0
        };
        drops.push(drop);
        drops_by_name.entry(name.to_string()).or_default().push(drop);
    }

    let robustness = if drops.is_empty() {
        1.0
    } else {
        (1.0 - mean(&drops)).clamp(0.0, 1.0)
    };
    let degradations = drops_by_name
        .into_iter()
        .map(|(name, drops)| (name, mean(&drops)))
        .collect();

    RobustnessSummary {
        robustness,
        variant_success_rates,
        degradations,
    }
}

/// Failure-category statistics over failed attempts.
pub struct ClusterSummary {
    /// Shannon entropy normalised by `log2(m)` over the `m` observed categories.
    pub clustering: f64,
    pub distribution: BTreeMap<String, usize>,
    pub concentration: f64,
    pub top_categories: Vec<String>,
}

pub fn failure_clustering(attempts: &[Attempt]) -> ClusterSummary {
    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    for attempt in attempts.iter().filter(|a| !a.success) {
        let label = attempt
            .failure_category
            .as_ref()
            .map(|c| c.label())
            .unwrap_or_else(|| "other".to_string());
        *distribution.entry(label).or_insert(0) += 1;
    }

    let total: usize = distribution.values().sum();
    if total == 0 {
        return ClusterSummary {
            clustering: 0.0,
            distribution,
            concentration: 0.0,
            top_categories: Vec::new(),
        };
    }

    let m = distribution.len();
    let entropy: f64 = distribution
        .values()
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.log2()
        })
        .sum();
    let clustering = if m > 1 {
        (entropy / (m as f64).log2()).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut ranked: Vec<(&String, &usize)> = distribution.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let top_n = ((m as f64 * TOP_CATEGORY_FRACTION) as usize).max(1);
    let top = &ranked[..top_n];
    let concentration = top.iter().map(|(_, c)| **c).sum::<usize>() as f64 / total as f64;
    let top_categories = top.iter().map(|(l, _)| (*l).clone()).collect();

    ClusterSummary {
        clustering,
        distribution,
        concentration,
        top_categories,
    }
}

/// Shannon entropy (base 2) of the action distribution in a sequence.
pub fn action_entropy(actions: &[&str]) -> f64 {
    if actions.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for action in actions {
        *counts.entry(action).or_insert(0) += 1;
    }
    let n = actions.len() as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Build the profile for `episode`. Fails with `InsufficientSamples`
/// when fewer than two attempts completed.
pub fn assemble_profile(episode: &Episode, bands: &VarianceBands) -> EvalResult<ReliabilityProfile> {
    let attempts = &episode.attempts;
    if attempts.len() < MIN_SAMPLES {
        return Err(EvalError::InsufficientSamples {
            observed: attempts.len(),
            required: MIN_SAMPLES,
        });
    }

    let indicators: Vec<f64> = attempts.iter().map(Attempt::indicator).collect();
    let refs: Vec<&Attempt> = attempts.iter().collect();
    let successes = attempts.iter().filter(|a| a.success).count();
    let rate = success_rate(&refs);
    let variance = sample_variance(&indicators).ok_or(EvalError::InsufficientSamples {
        observed: attempts.len(),
        required: MIN_SAMPLES,
    })?;
    let population = population_variance(&indicators);

    let by_variant = episode.attempts_by_variant();
    let (consistency, variant_consistency) = behavioral_consistency(&by_variant);
    let robustness = perturbation_robustness(&by_variant);
    let clusters = failure_clustering(attempts);

    let failed_entropies: Vec<f64> = attempts
        .iter()
        .filter(|a| !a.success)
        .map(|a| action_entropy(&a.actions()))
        .collect();
    let failed_action_entropy = if failed_entropies.is_empty() {
        0.0
    } else {
        mean(&failed_entropies)
    };

    let composite = composite_reliability(variance, consistency, robustness.robustness);

    Ok(ReliabilityProfile {
        task_id: episode.task.id.clone(),
        evaluated_at: Utc::now(),
        partial: episode.partial,
        repetitions: episode.repetitions,
        variant_count: episode.variants.len(),
        attempts: attempts.len(),
        successes,
        success_rate: rate,
        variance,
        population_variance: population,
        behavioral_consistency: consistency,
        perturbation_robustness: robustness.robustness,
        failure_clustering: clusters.clustering,
        status: ReliabilityStatus::from_variance(variance, bands),
        composite_reliability: composite,
        fairness_risk: FairnessRisk::assess(variance, composite, bands),
        breakdown: ProfileBreakdown {
            variant_success_rates: robustness.variant_success_rates,
            degradations: robustness.degradations,
            variant_consistency,
            failure_distribution: clusters.distribution,
            failure_concentration: clusters.concentration,
            top_failing_categories: clusters.top_categories,
            failed_action_entropy,
        },
        planning: PlanningSummary::from_attempts(attempts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptReport, FailureCategory, Step, Task, Variant};

    fn steps(actions: &[&str]) -> Vec<Step> {
        actions
            .iter()
            .enumerate()
            .map(|(i, a)| Step::new(*a, format!("s{i}")))
            .collect()
    }

    fn attempt(task: &Task, variant: &Variant, rep: usize, ok: bool, actions: &[&str]) -> Attempt {
        let report = if ok {
            AttemptReport::success(steps(actions))
        } else {
            AttemptReport::failure(steps(actions), Some(FailureCategory::IncorrectOutput))
        };
        Attempt::from_report(task, variant, rep, report, 1)
    }

    fn episode(task: &Task, variants: Vec<Variant>, attempts: Vec<Attempt>, reps: usize) -> Episode {
        Episode {
            agent_id: "agent".into(),
            task: task.clone(),
            variants,
            repetitions: reps,
            attempts,
            partial: false,
        }
    }

    #[test]
    fn test_edit_distance() {
        let a = ["x", "y", "z"];
        assert_eq!(normalized_edit_distance(&a, &a), 0.0);
        assert_eq!(normalized_edit_distance::<&str>(&[], &[]), 0.0);
        assert_eq!(normalized_edit_distance(&a, &[]), 1.0);
        assert!((normalized_edit_distance(&a, &["x", "q", "z"]) - 1.0 / 3.0).abs() < 1e-12);
        assert!((normalized_edit_distance(&["a", "b"], &["a", "b", "c", "d"]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_variance_estimators() {
        assert_eq!(sample_variance(&[1.0]), None);
        let v = [1.0, 0.0];
        assert!((sample_variance(&v).unwrap() - 0.5).abs() < 1e-12);
        assert!((population_variance(&v) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_scenario_a_identical_successes() {
        let task = Task::new("t", "book a flight", 3);
        let v = Variant::identity(&task);
        let attempts = (0..5)
            .map(|r| attempt(&task, &v, r, true, &["search", "select", "book"]))
            .collect();
        let ep = episode(&task, vec![v], attempts, 5);
        let p = assemble_profile(&ep, &VarianceBands::default()).unwrap();
        assert_eq!(p.success_rate, 1.0);
        assert_eq!(p.variance, 0.0);
        assert_eq!(p.behavioral_consistency, 1.0);
        assert_eq!(p.perturbation_robustness, 1.0);
        assert_eq!(p.failure_clustering, 0.0);
        assert_eq!(p.status, ReliabilityStatus::Stable);
        assert_eq!(p.fairness_risk, FairnessRisk::Low);
    }

    #[test]
    fn test_scenario_b_population_reference() {
        // 7 of 20 succeed: population variance 0.2275, sample variance 0.2395.
        let task = Task::new("t", "book a flight", 3);
        let v = Variant::identity(&task);
        let attempts = (0..20)
            .map(|r| attempt(&task, &v, r, r % 3 == 0 && r < 19, &["a", "b"]))
            .collect();
        let ep = episode(&task, vec![v], attempts, 20);
        let p = assemble_profile(&ep, &VarianceBands::default()).unwrap();
        assert_eq!(p.successes, 7);
        assert!((p.success_rate - 0.35).abs() < 1e-12);
        assert!((p.population_variance - 0.2275).abs() < 1e-12);
        assert!((p.variance - 0.2275 * 20.0 / 19.0).abs() < 1e-12);
        assert_eq!(p.perturbation_robustness, 1.0);
        assert_eq!(p.status, ReliabilityStatus::Unstable);
    }

    #[test]
    fn test_single_attempt_is_insufficient() {
        let task = Task::new("t", "d", 1);
        let v = Variant::identity(&task);
        let ep = episode(&task, vec![v.clone()], vec![attempt(&task, &v, 0, true, &["a"])], 1);
        assert!(matches!(
            assemble_profile(&ep, &VarianceBands::default()),
            Err(EvalError::InsufficientSamples { observed: 1, required: 2 })
        ));
    }

    #[test]
    fn test_consistency_rare_success_convention() {
        // One success per variant: no pairs, consistency 1.0 by convention.
        let task = Task::new("t", "d", 2);
        let v = Variant::identity(&task);
        let attempts = vec![
            attempt(&task, &v, 0, true, &["a", "b"]),
            attempt(&task, &v, 1, false, &["x"]),
            attempt(&task, &v, 2, false, &["y"]),
        ];
        let ep = episode(&task, vec![v], attempts, 3);
        let p = assemble_profile(&ep, &VarianceBands::default()).unwrap();
        assert_eq!(p.behavioral_consistency, 1.0);
    }

    #[test]
    fn test_consistency_only_pairs_same_variant() {
        let task = Task::new("t", "d", 2);
        let base = Variant::identity(&task);
        let para = Variant::perturbed(&task, "paraphrase", "d, reworded");
        let attempts = vec![
            attempt(&task, &base, 0, true, &["a", "b"]),
            attempt(&task, &base, 1, true, &["a", "b"]),
            attempt(&task, &para, 0, true, &["x", "y"]),
            attempt(&task, &para, 1, true, &["x", "y"]),
        ];
        let ep = episode(&task, vec![base, para], attempts, 2);
        let p = assemble_profile(&ep, &VarianceBands::default()).unwrap();
        assert_eq!(p.behavioral_consistency, 1.0);
    }

    #[test]
    fn test_robustness_and_degradation() {
        let task = Task::new("t", "d", 1);
        let base = Variant::identity(&task);
        let fmt = Variant::perturbed(&task, "format", "- d");
        let attempts = vec![
            attempt(&task, &base, 0, true, &["a"]),
            attempt(&task, &base, 1, true, &["a"]),
            attempt(&task, &fmt, 0, true, &["a"]),
            attempt(&task, &fmt, 1, false, &["a"]),
        ];
        let ep = episode(&task, vec![base, fmt], attempts, 2);
        let p = assemble_profile(&ep, &VarianceBands::default()).unwrap();
        assert!((p.perturbation_robustness - 0.5).abs() < 1e-12);
        assert!((p.breakdown.degradations["format"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_same_named_variants_each_count() {
        let task = Task::new("t", "d", 1);
        let base = Variant::identity(&task);
        let kept = Variant::perturbed(&task, "paraphrase", "d, reworded");
        let lost = Variant::perturbed(&task, "paraphrase", "d, phrased otherwise");
        let attempts = vec![
            attempt(&task, &base, 0, true, &["a"]),
            attempt(&task, &base, 1, true, &["a"]),
            attempt(&task, &kept, 0, true, &["a"]),
            attempt(&task, &kept, 1, true, &["a"]),
            attempt(&task, &lost, 0, false, &["a"]),
            attempt(&task, &lost, 1, false, &["a"]),
        ];
        let ep = episode(&task, vec![base, kept, lost], attempts, 2);
        let p = assemble_profile(&ep, &VarianceBands::default()).unwrap();
        assert_eq!(p.breakdown.variant_success_rates.len(), 3);
        assert!((p.perturbation_robustness - 0.5).abs() < 1e-12);
        assert_eq!(p.breakdown.degradations.len(), 1);
        assert!((p.breakdown.degradations["paraphrase"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_robustness_zero_baseline() {
        let task = Task::new("t", "d", 1);
        let base = Variant::identity(&task);
        let fmt = Variant::perturbed(&task, "format", "- d");
        let attempts = vec![
            attempt(&task, &base, 0, false, &["a"]),
            attempt(&task, &fmt, 0, false, &["a"]),
        ];
        let ep = episode(&task, vec![base, fmt], attempts, 1);
        let p = assemble_profile(&ep, &VarianceBands::default()).unwrap();
        assert_eq!(p.perturbation_robustness, 1.0);
        assert_eq!(p.behavioral_consistency, 1.0);
    }

    #[test]
    fn test_failure_clustering() {
        let task = Task::new("t", "d", 1);
        let v = Variant::identity(&task);
        let mk = |rep, cat: FailureCategory| {
            Attempt::failed(&task, &v, rep, cat, Vec::new(), 1)
        };
        let uniform = vec![mk(0, FailureCategory::Timeout), mk(1, FailureCategory::NoAction)];
        let c = failure_clustering(&uniform);
        assert!((c.clustering - 1.0).abs() < 1e-12);
        assert_eq!(c.top_categories.len(), 1);
        assert!((c.concentration - 0.5).abs() < 1e-12);

        let single = vec![mk(0, FailureCategory::Timeout), mk(1, FailureCategory::Timeout)];
        let c = failure_clustering(&single);
        assert_eq!(c.clustering, 0.0);
        assert_eq!(c.concentration, 1.0);
        assert_eq!(c.top_categories, vec!["timeout".to_string()]);

        assert_eq!(failure_clustering(&[]).clustering, 0.0);
    }

    #[test]
    fn test_action_entropy() {
        assert_eq!(action_entropy(&[]), 0.0);
        assert_eq!(action_entropy(&["a", "a"]), 0.0);
        assert!((action_entropy(&["a", "b"]) - 1.0).abs() < 1e-12);
    }
}
