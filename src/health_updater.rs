use crate::model::{Destination, Health, HealthState, HealthVerdict};
use crate::time::Clock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Serializes health-state transitions for every destination, whether the
/// verdict came from passive observation or an active probe (spec §4.3).
/// Holds only a clock — all mutable state lives on the `Destination` itself,
/// so `HealthUpdater` is cheap to share (`Clone`) across `PassiveEvaluator`
/// and `ActiveProber`.
#[derive(Clone)]
pub struct HealthUpdater {
    clock: Arc<dyn Clock>,
}

impl HealthUpdater {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Passive health only ever pushes a destination *down*: a low failure
    /// rate is silence, not a healthy verdict (spec §4.2 — recovery is
    /// always via the reactivation timer or an active probe).
    pub fn set_passive(
        &self,
        destination: &Arc<Destination>,
        verdict: HealthVerdict,
        reactivation_period: Duration,
        detection_window: Duration,
    ) {
        if verdict == HealthVerdict::Unhealthy {
            self.transition_to_unhealthy(
                destination,
                reactivation_period.max(detection_window),
            );
        }
    }

    /// Active probing can move a destination either way.
    pub fn set_active(
        &self,
        destination: &Arc<Destination>,
        verdict: HealthVerdict,
        reactivation_period: Duration,
        detection_window: Duration,
    ) {
        match verdict {
            HealthVerdict::Unhealthy => self.transition_to_unhealthy(
                destination,
                reactivation_period.max(detection_window),
            ),
            HealthVerdict::Healthy => self.transition_to_healthy(destination),
        }
    }

    fn transition_to_unhealthy(&self, destination: &Arc<Destination>, reactivation_after: Duration) {
        let now = self.clock.now();
        let deadline = now + self.clock.duration_to_ticks(reactivation_after);
        destination.health.store(Arc::new(HealthState {
            health: Health::Unhealthy,
            reactivation_deadline: Some(deadline),
        }));
        // Bump first: any in-flight timer for a prior Unhealthy transition
        // reads a stale generation and becomes a no-op instead of
        // cumulatively stacking with this one (spec §4.3).
        let generation = destination.reactivation_generation.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            destination = %destination.id,
            reactivation_after_secs = reactivation_after.as_secs_f64(),
            "health_updater: destination marked unhealthy"
        );
        metrics::gauge!(
            "proxy_core_destination_health_status",
            "destination" => destination.id.to_string(),
        )
        .set(0.0);
        self.spawn_reactivation_timer(destination.clone(), generation, reactivation_after);
    }

    fn transition_to_healthy(&self, destination: &Arc<Destination>) {
        // Supersede any pending reactivation timer — an active probe has
        // already settled the question it was waiting to answer.
        destination.reactivation_generation.fetch_add(1, Ordering::SeqCst);
        destination.health.store(Arc::new(HealthState {
            health: Health::Healthy,
            reactivation_deadline: None,
        }));
        metrics::gauge!(
            "proxy_core_destination_health_status",
            "destination" => destination.id.to_string(),
        )
        .set(1.0);
        info!(destination = %destination.id, "health_updater: destination marked healthy");
    }

    fn spawn_reactivation_timer(&self, destination: Arc<Destination>, generation: u64, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // Only fire if nothing superseded this transition in the
            // meantime — an idempotent re-mark-unhealthy does NOT restart
            // the clock, but it does invalidate this stale timer.
            if destination.reactivation_generation.load(Ordering::SeqCst) == generation {
                destination.health.store(Arc::new(HealthState {
                    health: Health::Unknown,
                    reactivation_deadline: None,
                }));
                metrics::gauge!(
                    "proxy_core_destination_health_status",
                    "destination" => destination.id.to_string(),
                )
                .set(0.5);
                info!(destination = %destination.id, "health_updater: reactivation timer fired, destination is a candidate again");
            }
        });
    }
}
