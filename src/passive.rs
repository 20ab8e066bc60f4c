use crate::config::parse_rate_limit_override;
use crate::context::ProxyContext;
use crate::error::ForwarderErrorFeature;
use crate::health_updater::HealthUpdater;
use crate::model::Destination;
use crate::policy::PolicyRegistry;
use crate::time::Clock;
use std::sync::Arc;
use tracing::debug;

const RATE_LIMIT_METADATA_KEY: &str = "TransportFailureRateHealthPolicy.RateLimit";

/// Turns one completed request into a windowed failure-rate observation and,
/// if the policy trips, an Unhealthy verdict (spec §4.2). Stateless itself —
/// all the counters live on the `Destination` the request was proxied to.
pub struct PassiveEvaluator {
    clock: Arc<dyn Clock>,
    policies: Arc<PolicyRegistry>,
    health_updater: HealthUpdater,
}

impl PassiveEvaluator {
    pub fn new(clock: Arc<dyn Clock>, policies: Arc<PolicyRegistry>, health_updater: HealthUpdater) -> Self {
        Self {
            clock,
            policies,
            health_updater,
        }
    }

    /// Call once per completed request. A client-aborted request still
    /// counts toward the window's `total` — it dilutes the rate rather than
    /// being excluded — but never counts toward `failed`, since it says
    /// nothing about the destination's health (spec §4.2's
    /// failure-determination list; SPEC_FULL.md §4.2's `classify(feature,
    /// canceled) -> Outcome` is recorded, not dropped).
    pub fn request_proxied(&self, ctx: &ProxyContext, destination: &Arc<Destination>) {
        let canceled = ctx.request_aborted.is_cancelled();
        let failed = classify_failure(ctx.error_feature.as_ref()) && !canceled;
        if canceled {
            debug!(destination = %destination.id, "passive: request was client-aborted, recorded as a non-failure");
        }
        let passive = &ctx.cluster.health_check.passive;

        let rate = {
            let mut sliding = destination.sliding.lock().unwrap();
            sliding.add_new(
                &*self.clock,
                failed,
                passive.detection_window,
                passive.minimal_total_count_threshold,
            )
        };

        let rate_limit = ctx
            .cluster
            .metadata
            .get(RATE_LIMIT_METADATA_KEY)
            .and_then(|s| parse_rate_limit_override(s))
            .unwrap_or(passive.default_rate_limit);

        let policy = self.policies.passive_or_default(&ctx.cluster.passive_policy);
        let verdict = policy.evaluate(rate, rate_limit);

        debug!(
            destination = %destination.id,
            failed,
            rate,
            rate_limit,
            "passive: recorded request outcome"
        );

        self.health_updater.set_passive(
            destination,
            verdict,
            passive.reactivation_period,
            passive.detection_window,
        );
    }
}

/// The destination-attributed half of spec §4.2's failure-determination
/// list. Everything else (client errors, ambiguous cancellation) is not a
/// failure from the destination's point of view.
fn classify_failure(error_feature: Option<&ForwarderErrorFeature>) -> bool {
    match error_feature {
        None => false,
        Some(feature) => feature.is_destination_failure(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForwarderError;
    use crate::http_client::{HyperProxyHttpClient, PoolSettings};
    use crate::model::{ClusterConfigSnapshot, DestinationId, HealthCheckSettings, PassiveHealthCheckSettings};
    use crate::policy::PolicyRegistry;
    use crate::time::ManualClock;
    use std::collections::HashMap;
    use std::time::Duration;

    fn cluster(rate_limit: Option<&str>) -> Arc<ClusterConfigSnapshot> {
        let mut metadata = HashMap::new();
        if let Some(v) = rate_limit {
            metadata.insert(RATE_LIMIT_METADATA_KEY.to_string(), v.to_string());
        }
        Arc::new(ClusterConfigSnapshot {
            cluster_id: crate::model::ClusterId::new("c1".to_string()),
            http_client: Arc::new(HyperProxyHttpClient::new(&PoolSettings::default())),
            metadata,
            health_check: HealthCheckSettings {
                active: None,
                passive: PassiveHealthCheckSettings {
                    detection_window: Duration::from_secs(10),
                    minimal_total_count_threshold: 2,
                    default_rate_limit: 0.5,
                    reactivation_period: Duration::from_secs(30),
                },
            },
            active_policy: "ConsecutiveFailures".to_string(),
            passive_policy: "TransportFailureRate".to_string(),
            request_config: Default::default(),
        })
    }

    fn destination() -> Arc<Destination> {
        Arc::new(Destination::new(
            DestinationId::new("d1".to_string()),
            "http://h1".to_string(),
            HashMap::new(),
        ))
    }

    #[test]
    fn repeated_destination_failures_trip_unhealthy() {
        let clock = ManualClock::new(1);
        let updater = HealthUpdater::new(clock.clone());
        let evaluator = PassiveEvaluator::new(clock.clone(), Arc::new(PolicyRegistry::with_defaults()), updater);
        let dest = destination();

        for _ in 0..3 {
            let mut ctx = ProxyContext::new("route1".to_string(), cluster(None));
            ctx.error_feature = Some(ForwarderErrorFeature::new(ForwarderError::Request));
            evaluator.request_proxied(&ctx, &dest);
        }

        assert_eq!(dest.health(), crate::model::Health::Unhealthy);
    }

    #[test]
    fn client_aborted_requests_count_toward_total_but_never_failed() {
        let clock = ManualClock::new(1);
        let updater = HealthUpdater::new(clock.clone());
        let evaluator = PassiveEvaluator::new(clock.clone(), Arc::new(PolicyRegistry::with_defaults()), updater);
        let dest = destination();

        let mut ctx = ProxyContext::new("route1".to_string(), cluster(None));
        ctx.error_feature = Some(ForwarderErrorFeature::new(ForwarderError::RequestBodyDestination));
        ctx.request_aborted.cancel();
        evaluator.request_proxied(&ctx, &dest);

        let sliding = dest.sliding.lock().unwrap();
        assert_eq!(sliding.aggregate_total(), 1, "a canceled request still dilutes the window");
        assert_eq!(sliding.aggregate_failed(), 0, "but never as a failure");
    }

    #[test]
    fn custom_rate_limit_metadata_overrides_default() {
        let clock = ManualClock::new(1);
        let updater = HealthUpdater::new(clock.clone());
        let evaluator = PassiveEvaluator::new(clock.clone(), Arc::new(PolicyRegistry::with_defaults()), updater);
        let dest = destination();

        // threshold=2, low custom rate_limit of 0.1 trips after just 2 failures.
        for _ in 0..2 {
            let mut ctx = ProxyContext::new("route1".to_string(), cluster(Some("0.1")));
            ctx.error_feature = Some(ForwarderErrorFeature::new(ForwarderError::RequestTimedOut));
            evaluator.request_proxied(&ctx, &dest);
        }

        assert_eq!(dest.health(), crate::model::Health::Unhealthy);
    }
}
