use crate::error::CoreError;
use crate::model::{ClusterId, DestinationId, HealthVerdict};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

pub const DEFAULT_ACTIVE_POLICY: &str = "ConsecutiveFailures";
pub const DEFAULT_PASSIVE_POLICY: &str = "TransportFailureRate";

/// Outcome of probing one destination, fed to the active policy as a batch
/// (spec §4.4). `error` is set for construction failures, transport errors,
/// and timeouts alike — the policy does not need to distinguish them.
#[derive(Debug, Clone)]
pub struct DestinationProbingResult {
    pub destination_id: DestinationId,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl DestinationProbingResult {
    pub fn is_healthy(&self, healthy_statuses: &[u16]) -> bool {
        self.error.is_none()
            && self
                .status
                .map(|s| healthy_statuses.contains(&s))
                .unwrap_or(false)
    }
}

/// Named active-health policy: consumes one probe batch for a cluster and
/// returns a verdict per destination that actually changed state. Mirrors
/// the teacher's per-node consecutive-count bookkeeping in
/// `upstream::cluster::Cluster::record_health_check`, generalized into a
/// standalone, swappable policy object.
pub trait ActivePolicy: Send + Sync {
    fn evaluate(
        &self,
        cluster_id: &ClusterId,
        results: &[DestinationProbingResult],
        healthy_statuses: &[u16],
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Vec<(DestinationId, HealthVerdict)>;
}

/// Named passive-health policy: turns a windowed failure rate into a
/// verdict (spec §4.2's "Verdict" paragraph).
pub trait PassivePolicy: Send + Sync {
    fn evaluate(&self, rate: f64, rate_limit: f64) -> HealthVerdict;
}

/// Default active policy — counts consecutive probe successes/failures per
/// destination and flips a verdict once either streak crosses its threshold.
/// The stored value is signed: positive is a success streak, negative a
/// failure streak, so a single field captures "which way, how long" without
/// a separate flag.
#[derive(Default)]
pub struct ConsecutiveFailuresPolicy {
    streaks: DashMap<(ClusterId, DestinationId), Mutex<i64>>,
}

impl ConsecutiveFailuresPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the streak for `key` in the direction of `healthy`, flipping
    /// and resetting to +-1 if the outcome changed sign. Returns the streak
    /// length after the update.
    fn advance(&self, key: (ClusterId, DestinationId), healthy: bool) -> i64 {
        let entry = self.streaks.entry(key).or_insert_with(|| Mutex::new(0));
        let mut streak = entry.value().lock().unwrap();
        *streak = match (*streak >= 0, healthy) {
            (true, true) => *streak + 1,
            (false, false) => *streak - 1,
            (true, false) => -1,
            (false, true) => 1,
        };
        *streak
    }
}

impl ActivePolicy for ConsecutiveFailuresPolicy {
    fn evaluate(
        &self,
        cluster_id: &ClusterId,
        results: &[DestinationProbingResult],
        healthy_statuses: &[u16],
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Vec<(DestinationId, HealthVerdict)> {
        let mut verdicts = Vec::new();
        for result in results {
            let key = (cluster_id.clone(), result.destination_id.clone());
            let healthy = result.is_healthy(healthy_statuses);
            let streak = self.advance(key, healthy);
            if healthy && streak >= healthy_threshold as i64 {
                verdicts.push((result.destination_id.clone(), HealthVerdict::Healthy));
            } else if !healthy && -streak >= unhealthy_threshold as i64 {
                verdicts.push((result.destination_id.clone(), HealthVerdict::Unhealthy));
            }
        }
        verdicts
    }
}

/// Default passive policy — the sliding-window failure rate vs. a threshold,
/// spec §4.2.
pub struct TransportFailureRatePolicy;

impl PassivePolicy for TransportFailureRatePolicy {
    fn evaluate(&self, rate: f64, rate_limit: f64) -> HealthVerdict {
        if rate >= rate_limit {
            HealthVerdict::Unhealthy
        } else {
            HealthVerdict::Healthy
        }
    }
}

/// Name → policy object registry, built once at startup from an injected
/// collection (spec §9 "Policy registry"). Default names are resolved by
/// fallback when a cluster doesn't specify one.
pub struct PolicyRegistry {
    active: HashMap<String, Arc<dyn ActivePolicy>>,
    passive: HashMap<String, Arc<dyn PassivePolicy>>,
}

impl PolicyRegistry {
    pub fn new(
        active: HashMap<String, Arc<dyn ActivePolicy>>,
        passive: HashMap<String, Arc<dyn PassivePolicy>>,
    ) -> Self {
        Self { active, passive }
    }

    /// The registry any fresh deployment starts with: the two named
    /// defaults, nothing more.
    pub fn with_defaults() -> Self {
        let mut active: HashMap<String, Arc<dyn ActivePolicy>> = HashMap::new();
        active.insert(
            DEFAULT_ACTIVE_POLICY.to_string(),
            Arc::new(ConsecutiveFailuresPolicy::new()),
        );
        let mut passive: HashMap<String, Arc<dyn PassivePolicy>> = HashMap::new();
        passive.insert(
            DEFAULT_PASSIVE_POLICY.to_string(),
            Arc::new(TransportFailureRatePolicy),
        );
        Self::new(active, passive)
    }

    /// §4.4 policy dispatch: a missing named policy is fatal for the batch.
    pub fn active_or_error(&self, name: Option<&str>) -> Result<Arc<dyn ActivePolicy>, CoreError> {
        let name = name.unwrap_or(DEFAULT_ACTIVE_POLICY);
        self.active
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownPolicy(name.to_string()))
    }

    /// §4.2: the passive side always resolves, falling back to the default.
    pub fn passive_or_default(&self, name: &str) -> Arc<dyn PassivePolicy> {
        self.passive
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.passive[DEFAULT_PASSIVE_POLICY].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, status: Option<u16>, error: Option<&str>) -> DestinationProbingResult {
        DestinationProbingResult {
            destination_id: DestinationId::new(id.to_string()),
            status,
            error: error.map(|s| s.to_string()),
        }
    }

    #[test]
    fn consecutive_failures_trips_at_threshold() {
        let policy = ConsecutiveFailuresPolicy::new();
        let cluster = ClusterId::new("c1".to_string());
        let healthy = [200u16];

        for _ in 0..2 {
            let v = policy.evaluate(&cluster, &[result("d1", None, Some("timeout"))], &healthy, 2, 3);
            assert!(v.is_empty());
        }
        let v = policy.evaluate(&cluster, &[result("d1", None, Some("timeout"))], &healthy, 2, 3);
        assert_eq!(v, vec![(DestinationId::new("d1".to_string()), HealthVerdict::Unhealthy)]);
    }

    #[test]
    fn consecutive_successes_flip_back_to_healthy() {
        let policy = ConsecutiveFailuresPolicy::new();
        let cluster = ClusterId::new("c1".to_string());
        let healthy = [200u16];

        // Trip unhealthy first.
        for _ in 0..3 {
            policy.evaluate(&cluster, &[result("d1", None, Some("timeout"))], &healthy, 2, 3);
        }
        // A single success doesn't cross healthy_threshold=2 yet.
        let v = policy.evaluate(&cluster, &[result("d1", Some(200), None)], &healthy, 2, 3);
        assert!(v.is_empty());
        let v = policy.evaluate(&cluster, &[result("d1", Some(200), None)], &healthy, 2, 3);
        assert_eq!(v, vec![(DestinationId::new("d1".to_string()), HealthVerdict::Healthy)]);
    }

    #[test]
    fn unknown_active_policy_is_an_error() {
        let registry = PolicyRegistry::with_defaults();
        assert!(registry.active_or_error(Some("NoSuchPolicy")).is_err());
        assert!(registry.active_or_error(None).is_ok());
    }

    #[test]
    fn transport_failure_rate_trips_at_boundary() {
        let policy = TransportFailureRatePolicy;
        assert_eq!(policy.evaluate(0.49, 0.5), HealthVerdict::Healthy);
        assert_eq!(policy.evaluate(0.5, 0.5), HealthVerdict::Unhealthy);
    }
}
