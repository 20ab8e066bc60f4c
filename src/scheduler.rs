use crate::active::ActiveProber;
use crate::model::ClusterId;
use crate::registry::DestinationRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns exactly one periodic probing task per cluster (spec §4.5). A
/// cluster's interval can change at runtime without disturbing any other
/// cluster's task — `changePeriod` simply replaces the one entry.
/// Grounded in the teacher's health-check loop
/// (`upstream::health::run_health_checks`), generalized from "one loop over
/// all clusters" to "one task per cluster" so each can run its own cadence.
pub struct Scheduler {
    registry: Arc<DestinationRegistry>,
    prober: Arc<ActiveProber>,
    /// Each entry's `CancellationToken` is only ever watched while its task
    /// is waiting on the next tick — once a probe round is underway it runs
    /// to completion regardless of cancellation, per spec §4.5
    /// "unscheduling during a running callback must not cancel that
    /// callback; it only removes future fires". The task itself keeps
    /// running detached from this map; removing an entry here just tells it
    /// to stop, it does not abort it.
    tasks: Mutex<HashMap<ClusterId, CancellationToken>>,
    /// Shared with every spawned task: a cluster can be `schedule()`d before
    /// `start()` latches (the monitor calls `on_cluster_added` as clusters
    /// are discovered, ahead of the one `check_health_all` sweep), so the
    /// ticker itself must not fire its first probe until this flips (spec
    /// §4.5 "before start(), no callbacks fire").
    started: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(registry: Arc<DestinationRegistry>, prober: Arc<ActiveProber>) -> Self {
        Self {
            registry,
            prober,
            tasks: Mutex::new(HashMap::new()),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers a cluster's recurring probe task. A cluster with no active
    /// health-check config configured is simply never scheduled — its probe
    /// body is a no-op on every tick until reconfigured with one.
    pub fn schedule(&self, cluster_id: ClusterId, interval: std::time::Duration) {
        self.spawn(cluster_id, interval);
    }

    /// Replaces a cluster's task with one running at the new period. The
    /// in-flight tick (if any) is allowed to finish; only the *next*
    /// scheduling decision changes.
    pub fn change_period(&self, cluster_id: ClusterId, new_interval: std::time::Duration) {
        self.abort(&cluster_id);
        self.spawn(cluster_id, new_interval);
    }

    pub fn unschedule(&self, cluster_id: &ClusterId) {
        self.abort(cluster_id);
    }

    /// Latched: only the first call actually starts anything. Spec §4.5/§4.6
    /// ties the scheduler's first tick to "initial probe round completed" —
    /// calling `start()` again is a harmless no-op, not a double-schedule.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("scheduler: start() called more than once, ignoring");
            return;
        }
        info!("scheduler: started");
    }

    /// Signals the task to stop firing. This never aborts the task — a
    /// probe round in flight runs to completion; the task only notices
    /// `stop` the next time it would otherwise wait for a tick.
    fn abort(&self, cluster_id: &ClusterId) {
        if let Some(stop) = self.tasks.lock().unwrap().remove(cluster_id) {
            stop.cancel();
        }
    }

    fn spawn(&self, cluster_id: ClusterId, interval: std::time::Duration) {
        self.abort(&cluster_id);
        let registry = self.registry.clone();
        let prober = self.prober.clone();
        let started = self.started.clone();
        let task_cluster_id = cluster_id.clone();
        let stop = CancellationToken::new();
        let task_stop = stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !started.load(Ordering::SeqCst) {
                    // The initial synchronous sweep hasn't completed yet;
                    // this tick is discarded rather than probing early.
                    continue;
                }
                let Some(entry) = registry.cluster(&task_cluster_id) else {
                    // Cluster was removed from the registry; this task has
                    // nothing left to probe and will be stopped by the
                    // caller's unschedule, but exit early regardless.
                    break;
                };
                let config = entry.config();
                let destinations = entry.all_destinations();
                // Once a round starts it is not part of the `select!` above
                // and so cannot be interrupted by a concurrent `stop` — it
                // always runs to completion (spec §4.5).
                if let Err(err) = prober
                    .probe_cluster(&task_cluster_id, &config.http_client, &config.health_check, destinations)
                    .await
                {
                    warn!(cluster = %task_cluster_id, error = %err, "scheduler: probe round aborted");
                }
            }
        });
        self.tasks.lock().unwrap().insert(cluster_id, stop);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Whole-scheduler teardown: signal every task to stop rather than
        // aborting mid-round, same discipline as a single `unschedule`.
        for (_, stop) in self.tasks.lock().unwrap().drain() {
            stop.cancel();
        }
    }
}
