//! Property tests for the statistical and memory invariants.

use proptest::prelude::*;

use hbeval_core::domain::{MemoryConfig, VarianceBands};
use hbeval_core::evaluator::aggregate::{population_variance, sample_variance, success_rate};
use hbeval_core::evaluator::assemble_profile;
use hbeval_core::fakes::walk;
use hbeval_core::memory::{check_certification, CertificationStats};
use hbeval_core::{
    compute_pei, Attempt, AttemptReport, CertifiedMemory, Episode, EpisodicStore, FailureCategory,
    ReliabilityProfile, Step, Task, Variant,
};

const VOCABULARY: &[&str] = &[
    "book", "table", "flight", "hotel", "cheap", "two", "garden", "order", "cancel", "find",
];

fn episode_from(task: &Task, outcomes: &[(bool, bool)]) -> Episode {
    let variant = Variant::identity(task);
    let attempts = outcomes
        .iter()
        .enumerate()
        .map(|(rep, &(success, alternate))| {
            let report = match (success, alternate) {
                (true, false) => AttemptReport::success(walk(&["s1", "s2", "s3"])),
                (true, true) => AttemptReport::success(vec![
                    Step::new("search", "s1"),
                    Step::new("pick", "s3"),
                ]),
                (false, _) => AttemptReport::failure(
                    walk(&["s1"]),
                    Some(FailureCategory::IncorrectOutput),
                ),
            };
            Attempt::from_report(task, &variant, rep, report, 1)
        })
        .collect();
    Episode {
        agent_id: "prop-agent".into(),
        task: task.clone(),
        variants: vec![variant],
        repetitions: outcomes.len(),
        attempts,
        partial: false,
    }
}

fn certified_pair(task: &Task) -> (Episode, ReliabilityProfile) {
    let episode = episode_from(task, &[(true, false), (true, false), (true, false)]);
    let profile = assemble_profile(&episode, &VarianceBands::default()).unwrap();
    (episode, profile)
}

fn description() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCABULARY), 1..6).prop_map(|w| w.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn variance_stays_within_bernoulli_bounds(outcomes in prop::collection::vec(any::<bool>(), 2..60)) {
        let values: Vec<f64> = outcomes.iter().map(|&s| if s { 1.0 } else { 0.0 }).collect();
        let n = values.len() as f64;
        let sample = sample_variance(&values).unwrap();
        let population = population_variance(&values);

        prop_assert!(sample >= 0.0);
        prop_assert!(sample <= 0.25 * n / (n - 1.0) + 1e-12);
        prop_assert!(population >= 0.0);
        prop_assert!(population <= 0.25 + 1e-12);
        prop_assert!((sample * (n - 1.0) / n - population).abs() < 1e-9);
    }

    #[test]
    fn profile_scores_are_normalised(
        outcomes in prop::collection::vec((any::<bool>(), any::<bool>()), 2..40),
    ) {
        let task = Task::new("t", "find a cheap hotel", 3);
        let episode = episode_from(&task, &outcomes);
        let profile = assemble_profile(&episode, &VarianceBands::default()).unwrap();
        let refs: Vec<&Attempt> = episode.attempts.iter().collect();

        prop_assert_eq!(profile.success_rate, success_rate(&refs));
        for score in [
            profile.success_rate,
            profile.behavioral_consistency,
            profile.perturbation_robustness,
            profile.failure_clustering,
        ] {
            prop_assert!((0.0..=1.0).contains(&score));
        }
        prop_assert_eq!(profile.successes + profile.failures(), outcomes.len());
    }

    #[test]
    fn certified_iff_bars_met(
        outcomes in prop::collection::vec((any::<bool>(), any::<bool>()), 2..30),
        success_bar in 0.0f64..=1.0,
        consistency_bar in 0.0f64..=1.0,
    ) {
        let task = Task::new("t", "book a table", 3);
        let episode = episode_from(&task, &outcomes);
        let profile = assemble_profile(&episode, &VarianceBands::default()).unwrap();
        let config = MemoryConfig {
            success_bar,
            consistency_bar,
            ..Default::default()
        };

        // Bars met and at least one successful trajectory to keep.
        let expected = profile.success_rate >= success_bar
            && profile.behavioral_consistency >= consistency_bar
            && profile.successes > 0;
        let result = check_certification(&episode, &profile, &config);
        prop_assert_eq!(result.is_ok(), expected);
        if let Ok(reference) = result {
            prop_assert!(!reference.is_empty());
        }
    }

    #[test]
    fn pei_is_bounded(
        states in prop::collection::vec(0u8..6, 0..40),
        optimal in 1usize..10,
    ) {
        let task = Task::new("t", "d", optimal);
        let prefix: Vec<Step> = states.iter().map(|s| Step::new("act", format!("s{s}"))).collect();
        let pei = compute_pei(&prefix, &task);
        prop_assert!((0.0..=1.0).contains(&pei));
    }

    #[test]
    fn pei_is_one_on_efficient_paths(length in 0usize..10, slack in 0usize..5) {
        let task = Task::new("t", "d", length + slack);
        let prefix: Vec<Step> = (0..length).map(|i| Step::new("act", format!("s{i}"))).collect();
        prop_assert_eq!(compute_pei(&prefix, &task), 1.0);
    }

    #[test]
    fn pei_is_one_ahead_of_reference(
        states in prop::collection::vec(0u8..3, 0..10),
        slack in 1usize..5,
    ) {
        let task = Task::new("t", "d", states.len() + slack);
        let prefix: Vec<Step> = states.iter().map(|s| Step::new("act", format!("s{s}"))).collect();
        prop_assert_eq!(compute_pei(&prefix, &task), 1.0);
    }

    #[test]
    fn stats_ratios_bounded_and_counters_monotonic(
        ops in prop::collection::vec((0u8..4, 0u64..20), 0..50),
    ) {
        let stats = CertificationStats::new();
        let mut previous = stats.snapshot("a");
        for (op, n) in ops {
            match op {
                0 => stats.record_failure(),
                1 => stats.record_recovery(),
                2 => stats.record_actions_executed(n),
                _ => stats.record_actions_logged(n),
            }
            let snap = stats.snapshot("a");
            prop_assert!((0.0..=1.0).contains(&snap.failure_resilience_rate));
            prop_assert!((0.0..=1.0).contains(&snap.traceability_index));
            prop_assert!(snap.failures_observed >= previous.failures_observed);
            prop_assert!(snap.recoveries >= previous.recoveries);
            prop_assert!(snap.actions_executed >= previous.actions_executed);
            prop_assert!(snap.actions_logged >= previous.actions_logged);
            previous = snap;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn retrieval_bounded_floored_and_ranked(
        stored in prop::collection::vec(description(), 1..8),
        query in description(),
        k in 0usize..6,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let config = MemoryConfig::default();
        let floor = config.min_similarity;

        let similarities: Vec<f64> = rt.block_on(async {
            let memory = CertifiedMemory::new(config);
            for (i, text) in stored.iter().enumerate() {
                let task = Task::new(format!("t{i}"), text.clone(), 3);
                let (episode, profile) = certified_pair(&task);
                memory.certify_and_store(&episode, &profile).await.unwrap();
            }
            let query = Task::new("q", query, 3);
            memory
                .retrieve_similar(&query, k)
                .await
                .unwrap()
                .iter()
                .map(|hit| hit.similarity)
                .collect()
        });

        prop_assert!(similarities.len() <= k);
        prop_assert!(similarities.iter().all(|s| *s >= floor && *s <= 1.0 + 1e-12));
        prop_assert!(similarities.windows(2).all(|w| w[0] >= w[1]));
    }
}
