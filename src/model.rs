use crate::http_client::ProxyHttpClient;
use crate::sliding_counter::SlidingCounter;
use crate::time::Tick;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stable identifier for a cluster, interned as `Arc<str>` so cloning it for
/// log fields / span tags is an atomic refcount bump rather than a heap
/// allocation — the same trick `Cluster`'s `scheme`/`pass_host` use in the
/// teacher's `upstream::cluster` module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterId(pub Arc<str>);

impl ClusterId {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a destination, unique within its cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationId(pub Arc<str>);

impl DestinationId {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable health of a destination, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A verdict a policy hands back to `HealthUpdater`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
}

/// Snapshot of (health, reactivation deadline) — stored behind an
/// `ArcSwap` so readers never observe a torn pair (spec §4.3).
#[derive(Debug, Clone)]
pub(crate) struct HealthState {
    pub health: Health,
    pub reactivation_deadline: Option<Tick>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            health: Health::Unknown,
            reactivation_deadline: None,
        }
    }
}

/// One concrete backend endpoint. Owned by its `Cluster` entry in the
/// `DestinationRegistry`; `PassiveEvaluator`, `ActiveProber` and
/// `HealthUpdater` all hold non-owning `Arc<Destination>` handles, per
/// spec §3 "Ownership" and §9's note on avoiding cyclic ownership.
pub struct Destination {
    pub id: DestinationId,
    pub address: String,
    pub metadata: HashMap<String, String>,
    concurrency: AtomicI64,
    pub(crate) health: ArcSwap<HealthState>,
    /// Bumped on every `HealthUpdater` transition to Unhealthy so a stale
    /// reactivation timer can recognize it has been superseded instead of
    /// cumulatively stacking with a newer one (spec §4.3 "reset, not
    /// cumulative").
    pub(crate) reactivation_generation: AtomicU64,
    pub(crate) sliding: Mutex<SlidingCounter>,
}

impl Destination {
    pub fn new(id: DestinationId, address: String, metadata: HashMap<String, String>) -> Self {
        Self {
            id,
            address,
            metadata,
            concurrency: AtomicI64::new(0),
            health: ArcSwap::from_pointee(HealthState::default()),
            reactivation_generation: AtomicU64::new(0),
            sliding: Mutex::new(SlidingCounter::new()),
        }
    }

    pub fn health(&self) -> Health {
        self.health.load().health
    }

    /// Candidate-eligible iff not currently Unhealthy. `Unknown` and
    /// `Healthy` both count as eligible, matching spec §4 — only an active
    /// Unhealthy verdict excludes a destination from candidate sets.
    pub fn is_candidate_eligible(&self) -> bool {
        !matches!(self.health(), Health::Unhealthy)
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
}

/// Transforms applied to the outbound request before it is handed to the
/// HTTP client. The transform's own internals are out of scope (§1) — only
/// the seam the Forwarder calls through is specified here.
pub trait RequestTransform: Send + Sync {
    fn apply(&self, parts: &mut http::request::Parts);
}

/// No-op transform, used where a route carries none.
pub struct IdentityTransform;

impl RequestTransform for IdentityTransform {
    fn apply(&self, _parts: &mut http::request::Parts) {}
}

/// Request-scoped settings the Forwarder threads through to the HTTP client,
/// standing in for the route's `config.httpRequest?` in spec §6.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub version: Option<http::Version>,
    pub timeout: Option<Duration>,
}

/// Active health-check tunables, per spec §4.4 / §4.6.
#[derive(Debug, Clone)]
pub struct ActiveHealthCheckSettings {
    pub interval: Duration,
    pub timeout: Option<Duration>,
    /// Resolved via `PolicyRegistry::active_or_error(..., "ConsecutiveFailures")`.
    pub policy: Option<String>,
    /// How many destinations this cluster probes concurrently per round
    /// (teacher's `ActiveHealthCheck::concurrency`, fed straight into
    /// `buffer_unordered`).
    pub concurrency: usize,
    pub healthy_statuses: Vec<u16>,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub path: String,
}

impl Default for ActiveHealthCheckSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Some(Duration::from_secs(5)),
            policy: None,
            concurrency: 8,
            healthy_statuses: vec![200],
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            path: "/health".to_string(),
        }
    }
}

/// Passive health-check tunables, per spec §4.2.
#[derive(Debug, Clone)]
pub struct PassiveHealthCheckSettings {
    pub detection_window: Duration,
    pub minimal_total_count_threshold: u32,
    /// Policy default, overridden per-cluster by the
    /// `TransportFailureRateHealthPolicy.RateLimit` metadata entry.
    pub default_rate_limit: f64,
    pub reactivation_period: Duration,
}

impl Default for PassiveHealthCheckSettings {
    fn default() -> Self {
        Self {
            detection_window: Duration::from_secs(60),
            minimal_total_count_threshold: 10,
            default_rate_limit: 0.3,
            reactivation_period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthCheckSettings {
    pub active: Option<ActiveHealthCheckSettings>,
    pub passive: PassiveHealthCheckSettings,
}

/// Immutable-per-request snapshot of a cluster's configuration, the runtime
/// analogue of the teacher's `ClusterConfig` + `Cluster` split — config is a
/// cheap `Arc` clone, state (destinations, health) lives in the registry.
#[derive(Clone)]
pub struct ClusterConfigSnapshot {
    pub cluster_id: ClusterId,
    pub http_client: Arc<dyn ProxyHttpClient>,
    /// Free-form per-cluster metadata, e.g.
    /// `TransportFailureRateHealthPolicy.RateLimit` (spec §6).
    pub metadata: HashMap<String, String>,
    pub health_check: HealthCheckSettings,
    pub active_policy: String,
    pub passive_policy: String,
    pub request_config: RequestConfig,
}
