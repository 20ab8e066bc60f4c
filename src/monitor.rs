use crate::active::ActiveProber;
use crate::model::ClusterId;
use crate::registry::DestinationRegistry;
use crate::scheduler::Scheduler;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

/// Top-level orchestrator tying cluster lifecycle events to the
/// `Scheduler`'s per-cluster tasks (spec §4.6). Discovery/config-reload
/// machinery outside this crate's scope (spec §1) calls these hooks; this
/// module owns none of that wiring itself.
pub struct ActiveHealthCheckMonitor {
    registry: Arc<DestinationRegistry>,
    prober: Arc<ActiveProber>,
    scheduler: Arc<Scheduler>,
    /// Bound on how many clusters are probed concurrently during the
    /// startup sweep (`check_health_all`), independent of any one
    /// cluster's own per-destination concurrency.
    startup_fanout: usize,
}

impl ActiveHealthCheckMonitor {
    pub fn new(registry: Arc<DestinationRegistry>, prober: Arc<ActiveProber>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            registry,
            prober,
            scheduler,
            startup_fanout: 8,
        }
    }

    /// A cluster just appeared. If it carries active health-check config,
    /// run one immediate probe round so newly discovered destinations don't
    /// sit at `Unknown` for a full interval, then hand it to the scheduler.
    pub async fn on_cluster_added(&self, cluster_id: &ClusterId) {
        let Some(entry) = self.registry.cluster(cluster_id) else {
            return;
        };
        let config = entry.config();
        let Some(active) = &config.health_check.active else {
            return;
        };

        info!(cluster = %cluster_id, "monitor: cluster added, running initial probe");
        if let Err(err) = self
            .prober
            .probe_cluster(cluster_id, &config.http_client, &config.health_check, entry.all_destinations())
            .await
        {
            tracing::warn!(cluster = %cluster_id, error = %err, "monitor: initial probe failed");
        }
        self.scheduler.schedule(cluster_id.clone(), active.interval);
    }

    /// A cluster's config snapshot was replaced. Active health-check
    /// presence/absence and interval are the only things the scheduler
    /// cares about — destination membership changes are picked up by the
    /// next tick via the registry, not by this hook.
    pub async fn on_cluster_changed(&self, cluster_id: &ClusterId, previous_interval: Option<std::time::Duration>) {
        let Some(entry) = self.registry.cluster(cluster_id) else {
            return;
        };
        let config = entry.config();
        match (&config.health_check.active, previous_interval) {
            (Some(active), Some(prev)) if prev != active.interval => {
                info!(cluster = %cluster_id, "monitor: active interval changed");
                self.scheduler.change_period(cluster_id.clone(), active.interval);
            }
            (Some(active), None) => {
                info!(cluster = %cluster_id, "monitor: active health-check enabled");
                self.scheduler.schedule(cluster_id.clone(), active.interval);
            }
            (None, Some(_)) => {
                info!(cluster = %cluster_id, "monitor: active health-check disabled");
                self.scheduler.unschedule(cluster_id);
            }
            _ => {}
        }
    }

    pub fn on_cluster_removed(&self, cluster_id: &ClusterId) {
        info!(cluster = %cluster_id, "monitor: cluster removed");
        self.scheduler.unschedule(cluster_id);
    }

    /// Runs one probe round across every cluster that carries active
    /// health-check config, concurrently bounded by `startup_fanout`. Used
    /// once at process startup before `Scheduler::start()` latches the
    /// recurring tasks in (spec §4.6's "InitialProbeCompleted" gate).
    pub async fn check_health_all(&self) {
        let mut clusters = Vec::new();
        self.registry.for_each_cluster(|id, entry| {
            clusters.push((id.clone(), entry.clone()));
        });

        stream::iter(clusters)
            .map(|(cluster_id, entry)| {
                let prober = self.prober.clone();
                async move {
                    let config = entry.config();
                    if config.health_check.active.is_none() {
                        return;
                    }
                    if let Err(err) = prober
                        .probe_cluster(&cluster_id, &config.http_client, &config.health_check, entry.all_destinations())
                        .await
                    {
                        tracing::warn!(cluster = %cluster_id, error = %err, "monitor: startup probe failed");
                    }
                }
            })
            .buffer_unordered(self.startup_fanout)
            .collect::<()>()
            .await;

        self.scheduler.start();
    }
}
