//! End-to-end active-probing scenarios exercised against the public API:
//! a cluster's destinations are probed in one batch, and the resulting
//! verdicts reach each destination's health state.

use async_trait::async_trait;
use proxy_core::http_client::{empty_body, BoxBody, ProbingRequestFactory, ProxyHttpClient};
use proxy_core::{
    ActiveHealthCheckMonitor, ActiveHealthCheckSettings, ClusterConfigSnapshot, ClusterId,
    Destination, DestinationId, DestinationRegistry, ForwarderError, ForwarderErrorFeature, Health,
    HealthCheckSettings, HealthUpdater, PassiveHealthCheckSettings, PolicyRegistry, Scheduler,
};
use proxy_core::active::ActiveProber;
use proxy_core::time::SystemClock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fails exactly the destinations named in `fail_for` with a transport
/// error; every other destination gets a 200.
struct PerDestinationClient {
    fail_for: Vec<String>,
}

#[async_trait]
impl ProxyHttpClient for PerDestinationClient {
    async fn send(
        &self,
        request: http::Request<BoxBody>,
        _timeout: Option<Duration>,
    ) -> Result<http::Response<BoxBody>, ForwarderErrorFeature> {
        let uri = request.uri().to_string();
        if self.fail_for.iter().any(|addr| uri.contains(addr)) {
            return Err(ForwarderErrorFeature::new(ForwarderError::RequestTimedOut));
        }
        Ok(http::Response::builder().status(200).body(empty_body()).unwrap())
    }
}

struct PathRequestFactory;
impl ProbingRequestFactory for PathRequestFactory {
    fn build(&self, address: &str) -> http::Request<BoxBody> {
        http::Request::builder()
            .uri(format!("{address}/health"))
            .body(empty_body())
            .unwrap()
    }
}

fn health_check(policy: Option<&str>) -> HealthCheckSettings {
    HealthCheckSettings {
        active: Some(ActiveHealthCheckSettings {
            interval: Duration::from_secs(30),
            timeout: Some(Duration::from_secs(1)),
            policy: policy.map(str::to_string),
            concurrency: 8,
            healthy_statuses: vec![200],
            healthy_threshold: 1,
            unhealthy_threshold: 1,
            path: "/health".to_string(),
        }),
        passive: PassiveHealthCheckSettings::default(),
    }
}

/// S6: one destination's connection fails during a batched probe round; the
/// other two still get a real response, and every destination still
/// receives a verdict (the failing one does not block the batch).
#[tokio::test]
async fn one_destination_failing_does_not_block_the_batch() {
    let client: Arc<dyn ProxyHttpClient> = Arc::new(PerDestinationClient {
        fail_for: vec!["d2".to_string()],
    });
    let updater = HealthUpdater::new(Arc::new(SystemClock::new()));
    let prober = ActiveProber::new(
        Arc::new(PolicyRegistry::with_defaults()),
        updater,
        Arc::new(PathRequestFactory),
    );

    let d1 = Arc::new(Destination::new(DestinationId::new("d1".to_string()), "http://d1".to_string(), HashMap::new()));
    let d2 = Arc::new(Destination::new(DestinationId::new("d2".to_string()), "http://d2".to_string(), HashMap::new()));
    let d3 = Arc::new(Destination::new(DestinationId::new("d3".to_string()), "http://d3".to_string(), HashMap::new()));

    prober
        .probe_cluster(
            &ClusterId::new("c1".to_string()),
            &client,
            &health_check(None),
            vec![d1.clone(), d2.clone(), d3.clone()],
        )
        .await
        .unwrap();

    assert_eq!(d1.health(), Health::Healthy);
    assert_eq!(d2.health(), Health::Unhealthy, "the failing probe still produces a verdict");
    assert_eq!(d3.health(), Health::Healthy);
}

/// An unknown active policy aborts the whole round before any probe traffic
/// is sent — none of the destinations observe a connection attempt.
#[tokio::test]
async fn unknown_active_policy_sends_no_probe_traffic() {
    let client: Arc<dyn ProxyHttpClient> = Arc::new(PerDestinationClient { fail_for: vec![] });
    let updater = HealthUpdater::new(Arc::new(SystemClock::new()));
    let prober = ActiveProber::new(
        Arc::new(PolicyRegistry::with_defaults()),
        updater,
        Arc::new(PathRequestFactory),
    );
    let d1 = Arc::new(Destination::new(DestinationId::new("d1".to_string()), "http://d1".to_string(), HashMap::new()));

    let result = prober
        .probe_cluster(&ClusterId::new("c1".to_string()), &client, &health_check(Some("NoSuchPolicy")), vec![d1.clone()])
        .await;

    assert!(result.is_err());
    assert_eq!(d1.health(), Health::Unknown, "no verdict was ever applied");
}

/// The monitor's startup sweep probes every active-enabled cluster once and
/// then latches the scheduler; probing a cluster with no active config is a
/// no-op throughout.
#[tokio::test]
async fn startup_sweep_probes_active_clusters_and_latches_scheduler() {
    let registry = Arc::new(DestinationRegistry::new());

    let probed_client: Arc<dyn ProxyHttpClient> = Arc::new(PerDestinationClient { fail_for: vec![] });
    registry.upsert_cluster(ClusterConfigSnapshot {
        cluster_id: ClusterId::new("active-cluster".to_string()),
        http_client: probed_client,
        metadata: HashMap::new(),
        health_check: health_check(None),
        active_policy: "ConsecutiveFailures".to_string(),
        passive_policy: "TransportFailureRate".to_string(),
        request_config: Default::default(),
    });
    registry.upsert_destination(
        &ClusterId::new("active-cluster".to_string()),
        Destination::new(DestinationId::new("d1".to_string()), "http://d1".to_string(), HashMap::new()),
    );

    let passive_only_client: Arc<dyn ProxyHttpClient> = Arc::new(PerDestinationClient { fail_for: vec![] });
    registry.upsert_cluster(ClusterConfigSnapshot {
        cluster_id: ClusterId::new("passive-cluster".to_string()),
        http_client: passive_only_client,
        metadata: HashMap::new(),
        health_check: HealthCheckSettings { active: None, passive: PassiveHealthCheckSettings::default() },
        active_policy: "ConsecutiveFailures".to_string(),
        passive_policy: "TransportFailureRate".to_string(),
        request_config: Default::default(),
    });

    let updater = HealthUpdater::new(Arc::new(SystemClock::new()));
    let prober = Arc::new(ActiveProber::new(
        Arc::new(PolicyRegistry::with_defaults()),
        updater,
        Arc::new(PathRequestFactory),
    ));
    let scheduler = Arc::new(Scheduler::new(registry.clone(), prober.clone()));
    let monitor = ActiveHealthCheckMonitor::new(registry.clone(), prober, scheduler);

    monitor.check_health_all().await;

    let active_destination = registry
        .cluster(&ClusterId::new("active-cluster".to_string()))
        .unwrap()
        .destination(&DestinationId::new("d1".to_string()))
        .unwrap();
    assert_eq!(active_destination.health(), Health::Healthy);
}
