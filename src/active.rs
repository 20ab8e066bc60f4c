use crate::error::CoreError;
use crate::health_updater::HealthUpdater;
use crate::http_client::{ProbingRequestFactory, ProxyHttpClient};
use crate::model::{ActiveHealthCheckSettings, ClusterId, Destination, HealthCheckSettings};
use crate::policy::{DestinationProbingResult, PolicyRegistry};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Runs one round of active probing across a cluster's destinations
/// (spec §4.4). Owns no per-destination state itself — probe results feed
/// the cluster's active policy, whose own bookkeeping lives inside the
/// policy object, and verdicts are applied through `HealthUpdater`.
pub struct ActiveProber {
    policies: Arc<PolicyRegistry>,
    health_updater: HealthUpdater,
    request_factory: Arc<dyn ProbingRequestFactory>,
}

impl ActiveProber {
    pub fn new(
        policies: Arc<PolicyRegistry>,
        health_updater: HealthUpdater,
        request_factory: Arc<dyn ProbingRequestFactory>,
    ) -> Self {
        Self {
            policies,
            health_updater,
            request_factory,
        }
    }

    /// Probes every destination in `destinations`, batched at
    /// `settings.concurrency`, then hands the whole batch to the named
    /// active policy in one call so the policy can reason about the
    /// cluster as a whole. A missing named policy is fatal for the round
    /// (spec §4.4) — every destination in the batch is left untouched
    /// rather than guessing at a fallback.
    pub async fn probe_cluster(
        &self,
        cluster_id: &ClusterId,
        http_client: &Arc<dyn ProxyHttpClient>,
        health_check: &HealthCheckSettings,
        destinations: Vec<Arc<Destination>>,
    ) -> Result<(), CoreError> {
        let active = match &health_check.active {
            Some(a) => a,
            None => return Ok(()),
        };
        if destinations.is_empty() {
            return Ok(());
        }

        // Resolved first: a missing policy must abort before any probe
        // traffic is sent, not after.
        let policy = self.policies.active_or_error(active.policy.as_deref())?;

        let results = self.run_probes(active, http_client, &destinations).await;

        let verdicts = policy.evaluate(
            cluster_id,
            &results,
            &active.healthy_statuses,
            active.healthy_threshold,
            active.unhealthy_threshold,
        );

        for (destination_id, verdict) in verdicts {
            if let Some(destination) = destinations.iter().find(|d| d.id == destination_id) {
                self.health_updater.set_active(
                    destination,
                    verdict,
                    health_check.passive.reactivation_period,
                    health_check.passive.detection_window,
                );
            }
        }

        Ok(())
    }

    async fn run_probes(
        &self,
        active: &ActiveHealthCheckSettings,
        http_client: &Arc<dyn ProxyHttpClient>,
        destinations: &[Arc<Destination>],
    ) -> Vec<DestinationProbingResult> {
        stream::iter(destinations.iter().cloned())
            .map(|destination| {
                let factory = self.request_factory.clone();
                let client = http_client.clone();
                let timeout = active.timeout;
                async move {
                    let request = factory.build(&destination.address);
                    match client.send(request, timeout).await {
                        Ok(resp) => {
                            metrics::counter!(
                                "proxy_core_active_probe_total",
                                "destination" => destination.id.to_string(),
                                "result" => "response",
                            )
                            .increment(1);
                            DestinationProbingResult {
                                destination_id: destination.id.clone(),
                                status: Some(resp.status().as_u16()),
                                error: None,
                            }
                        }
                        Err(feature) => {
                            debug!(destination = %destination.id, error = %feature.error, "active: probe failed");
                            metrics::counter!(
                                "proxy_core_active_probe_total",
                                "destination" => destination.id.to_string(),
                                "result" => "transport_error",
                            )
                            .increment(1);
                            DestinationProbingResult {
                                destination_id: destination.id.clone(),
                                status: None,
                                error: Some(feature.error.to_string()),
                            }
                        }
                    }
                }
            })
            .buffer_unordered(active.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }
}
