//! Per-agent certification statistics.
//!
//! Counters only increase. Failure Resilience Rate and Traceability Index
//! are derived from them on read, so every update is a single atomic add.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Running counters for one agent identity.
#[derive(Debug, Default)]
pub struct CertificationStats {
    failures_observed: AtomicU64,
    recoveries: AtomicU64,
    actions_executed: AtomicU64,
    actions_logged: AtomicU64,
}

impl CertificationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// An attempt ended in failure.
    pub fn record_failure(&self) {
        self.failures_observed.fetch_add(1, Ordering::SeqCst);
    }

    /// A replanned attempt succeeded. It counts as an observed failure
    /// that was recovered, which keeps FRR within `[0, 1]`.
    pub fn record_recovery(&self) {
        self.failures_observed.fetch_add(1, Ordering::SeqCst);
        self.recoveries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_actions_executed(&self, n: u64) {
        self.actions_executed.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_actions_logged(&self, n: u64) {
        self.actions_logged.fetch_add(n, Ordering::SeqCst);
    }

    /// Consistent-enough view of the counters with both ratios clamped.
    pub fn snapshot(&self, agent_id: &str) -> StatsSnapshot {
        let failures_observed = self.failures_observed.load(Ordering::SeqCst);
        let recoveries = self.recoveries.load(Ordering::SeqCst);
        let actions_executed = self.actions_executed.load(Ordering::SeqCst);
        let actions_logged = self.actions_logged.load(Ordering::SeqCst);

        let frr = if failures_observed == 0 {
            0.0
        } else {
            recoveries.min(failures_observed) as f64 / failures_observed as f64
        };
        let ti = if actions_executed == 0 {
            1.0
        } else {
            actions_logged.min(actions_executed) as f64 / actions_executed as f64
        };

        StatsSnapshot {
            agent_id: agent_id.to_string(),
            failures_observed,
            recoveries,
            actions_executed,
            actions_logged,
            failure_resilience_rate: frr,
            traceability_index: ti,
        }
    }
}

/// Read-only view of one agent's counters and derived ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub agent_id: String,
    pub failures_observed: u64,
    pub recoveries: u64,
    pub actions_executed: u64,
    pub actions_logged: u64,
    /// Recoveries over observed failures; 0 before any failure.
    pub failure_resilience_rate: f64,
    /// Logged over executed actions; 1 before any action.
    pub traceability_index: f64,
}

/// Process-wide registry. Entries are created zeroed on first use of an
/// agent id and are never reset by the core.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    agents: RwLock<HashMap<String, Arc<CertificationStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `agent_id`, created on first access.
    pub fn for_agent(&self, agent_id: &str) -> Arc<CertificationStats> {
        {
            let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
            if let Some(stats) = agents.get(agent_id) {
                return Arc::clone(stats);
            }
        }
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            agents
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(CertificationStats::new())),
        )
    }

    pub fn snapshot(&self, agent_id: &str) -> StatsSnapshot {
        self.for_agent(agent_id).snapshot(agent_id)
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = agents.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let s = CertificationStats::new().snapshot("a");
        assert_eq!(s.failures_observed, 0);
        assert_eq!(s.failure_resilience_rate, 0.0);
        assert_eq!(s.traceability_index, 1.0);
    }

    #[test]
    fn test_ratios() {
        let stats = CertificationStats::new();
        stats.record_failure();
        stats.record_failure();
        stats.record_recovery();
        stats.record_actions_executed(10);
        stats.record_actions_logged(4);
        let s = stats.snapshot("a");
        assert_eq!(s.failures_observed, 3);
        assert_eq!(s.recoveries, 1);
        assert!((s.failure_resilience_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((s.traceability_index - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_ti_clamped_when_logged_exceeds_executed() {
        let stats = CertificationStats::new();
        stats.record_actions_executed(2);
        stats.record_actions_logged(5);
        assert_eq!(stats.snapshot("a").traceability_index, 1.0);
    }

    #[test]
    fn test_registry_isolates_agents() {
        let reg = StatsRegistry::new();
        reg.for_agent("a").record_failure();
        assert_eq!(reg.snapshot("a").failures_observed, 1);
        assert_eq!(reg.snapshot("b").failures_observed, 0);
        assert!(Arc::ptr_eq(&reg.for_agent("a"), &reg.for_agent("a")));
        assert_eq!(reg.agent_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_increments() {
        let reg = Arc::new(StatsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        reg.for_agent("a").record_actions_executed(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.snapshot("a").actions_executed, 800);
    }
}
