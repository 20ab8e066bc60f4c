use crate::model::{ClusterConfigSnapshot, ClusterId, Destination, DestinationId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Runtime state for one cluster: its current config snapshot plus the
/// destinations discovered for it. The counterpart of the teacher's
/// `Cluster` struct, minus the load-balancer/circuit-breaker fields this
/// spec doesn't own (spec §1 scopes those to external collaborators).
pub struct ClusterEntry {
    config: arc_swap::ArcSwap<ClusterConfigSnapshot>,
    destinations: DashMap<DestinationId, Arc<Destination>>,
    concurrency: AtomicI64,
}

impl ClusterEntry {
    fn new(config: ClusterConfigSnapshot) -> Self {
        Self {
            config: arc_swap::ArcSwap::from_pointee(config),
            destinations: DashMap::new(),
            concurrency: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> Arc<ClusterConfigSnapshot> {
        self.config.load_full()
    }

    pub fn concurrency(&self) -> i64 {
        self.concurrency.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_concurrency(&self) {
        self.concurrency.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_concurrency(&self) {
        self.concurrency.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn destination(&self, id: &DestinationId) -> Option<Arc<Destination>> {
        self.destinations.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of every destination currently registered, in no particular
    /// order (spec §3's "discovered set" is unordered until the Forwarder's
    /// candidate filter runs).
    pub fn all_destinations(&self) -> Vec<Arc<Destination>> {
        self.destinations.iter().map(|e| e.value().clone()).collect()
    }

    /// Destinations eligible as forwarding candidates: not actively marked
    /// Unhealthy (spec §4.1 step 1).
    pub fn candidate_destinations(&self) -> Vec<Arc<Destination>> {
        self.destinations
            .iter()
            .filter(|e| e.value().is_candidate_eligible())
            .map(|e| e.value().clone())
            .collect()
    }
}

/// Process-wide map of cluster id to runtime state (spec §3 "Ownership").
/// `DestinationRegistry` is the single source of truth `Forwarder`,
/// `PassiveEvaluator`, `ActiveProber` and `Scheduler` all read through —
/// none of them own destinations directly. Grounded in the teacher's
/// `ClusterStore`.
#[derive(Clone, Default)]
pub struct DestinationRegistry {
    clusters: Arc<DashMap<ClusterId, Arc<ClusterEntry>>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster(&self, id: &ClusterId) -> Option<Arc<ClusterEntry>> {
        self.clusters.get(id).map(|e| e.value().clone())
    }

    /// Insert or replace a cluster's config snapshot. Existing destinations
    /// (and their health/concurrency state) are preserved — only the
    /// config-level fields move, matching the teacher's
    /// `Cluster::update_config` "preserves runtime state" contract.
    pub fn upsert_cluster(&self, config: ClusterConfigSnapshot) -> Arc<ClusterEntry> {
        if let Some(entry) = self.clusters.get(&config.cluster_id) {
            entry.config.store(Arc::new(config));
            return entry.value().clone();
        }
        let entry = Arc::new(ClusterEntry::new(config.clone()));
        self.clusters.insert(config.cluster_id.clone(), entry.clone());
        entry
    }

    pub fn remove_cluster(&self, id: &ClusterId) -> bool {
        self.clusters.remove(id).is_some()
    }

    pub fn upsert_destination(&self, cluster_id: &ClusterId, destination: Destination) {
        if let Some(entry) = self.clusters.get(cluster_id) {
            entry
                .value()
                .destinations
                .insert(destination.id.clone(), Arc::new(destination));
        }
    }

    pub fn remove_destination(&self, cluster_id: &ClusterId, destination_id: &DestinationId) {
        if let Some(entry) = self.clusters.get(cluster_id) {
            entry.value().destinations.remove(destination_id);
        }
    }

    /// Drop destinations no longer present in `live_ids`, preventing
    /// unbounded DashMap growth across discovery churn (teacher's
    /// `Cluster::purge_stale_nodes`).
    pub fn prune_destinations(&self, cluster_id: &ClusterId, live_ids: &[DestinationId]) {
        if let Some(entry) = self.clusters.get(cluster_id) {
            let live: std::collections::HashSet<&DestinationId> = live_ids.iter().collect();
            entry.value().destinations.retain(|id, _| live.contains(id));
        }
    }

    pub fn for_each_cluster(&self, mut f: impl FnMut(&ClusterId, &Arc<ClusterEntry>)) {
        for entry in self.clusters.iter() {
            f(entry.key(), entry.value());
        }
    }
}
