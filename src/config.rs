//! Deserializable wire shape for the per-cluster health-check knobs named in
//! spec §4 and §6 — `detection_window_size`, `minimal_total_count_threshold`,
//! `rate_limit`, reactivation period, and the active-check interval/timeout/
//! policy name. Loading these from a file or control plane is the host's job
//! (spec §1 Non-goals); this module only specifies the shape the host hands
//! us and how it becomes the runtime settings `model.rs` already defines.
//! Mirrors the teacher's `config::types::{HealthCheckConfig, ActiveHealthCheck}`.

use crate::model::{ActiveHealthCheckSettings, HealthCheckSettings, PassiveHealthCheckSettings};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub active: Option<ActiveHealthCheckConfig>,

    #[serde(default)]
    pub passive: PassiveHealthCheckConfig,
}

impl From<HealthCheckConfig> for HealthCheckSettings {
    fn from(cfg: HealthCheckConfig) -> Self {
        Self {
            active: cfg.active.map(Into::into),
            passive: cfg.passive.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveHealthCheckConfig {
    #[serde(default = "default_hc_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_hc_timeout_secs")]
    pub timeout_secs: u64,

    /// Named active policy to dispatch to (spec §4.4); `None` resolves to
    /// the registry's `ConsecutiveFailures` default.
    #[serde(default)]
    pub policy: Option<String>,

    /// How many destinations this cluster probes concurrently per round.
    #[serde(default = "default_hc_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_healthy_statuses")]
    pub healthy_statuses: Vec<u16>,

    #[serde(default = "default_hc_threshold")]
    pub healthy_threshold: u32,

    #[serde(default = "default_hc_threshold")]
    pub unhealthy_threshold: u32,

    #[serde(default = "default_hc_path")]
    pub path: String,
}

impl Default for ActiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_hc_interval_secs(),
            timeout_secs: default_hc_timeout_secs(),
            policy: None,
            concurrency: default_hc_concurrency(),
            healthy_statuses: default_healthy_statuses(),
            healthy_threshold: default_hc_threshold(),
            unhealthy_threshold: default_hc_threshold(),
            path: default_hc_path(),
        }
    }
}

impl From<ActiveHealthCheckConfig> for ActiveHealthCheckSettings {
    fn from(cfg: ActiveHealthCheckConfig) -> Self {
        Self {
            interval: Duration::from_secs(cfg.interval_secs),
            timeout: Some(Duration::from_secs(cfg.timeout_secs)),
            policy: cfg.policy,
            concurrency: cfg.concurrency,
            healthy_statuses: cfg.healthy_statuses,
            healthy_threshold: cfg.healthy_threshold,
            unhealthy_threshold: cfg.unhealthy_threshold,
            path: cfg.path,
        }
    }
}

fn default_hc_interval_secs() -> u64 {
    10
}

fn default_hc_timeout_secs() -> u64 {
    5
}

fn default_hc_concurrency() -> usize {
    8
}

fn default_healthy_statuses() -> Vec<u16> {
    vec![200]
}

fn default_hc_threshold() -> u32 {
    2
}

fn default_hc_path() -> String {
    "/health".to_string()
}

/// Wire shape for spec §4.2's passive tunables: `detectionWindowSize`,
/// `minimalTotalCountThreshold`, the default `rateLimit`, and the
/// reactivation period. The per-cluster `TransportFailureRateHealthPolicy.
/// RateLimit` metadata override (spec §6) lives in free-form cluster
/// metadata, not here — it can override this default per cluster without a
/// schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassiveHealthCheckConfig {
    #[serde(default = "default_detection_window_secs")]
    pub detection_window_secs: u64,

    #[serde(default = "default_minimal_total_count_threshold")]
    pub minimal_total_count_threshold: u32,

    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,

    #[serde(default = "default_reactivation_period_secs")]
    pub reactivation_period_secs: u64,
}

impl Default for PassiveHealthCheckConfig {
    fn default() -> Self {
        Self {
            detection_window_secs: default_detection_window_secs(),
            minimal_total_count_threshold: default_minimal_total_count_threshold(),
            rate_limit: default_rate_limit(),
            reactivation_period_secs: default_reactivation_period_secs(),
        }
    }
}

impl From<PassiveHealthCheckConfig> for PassiveHealthCheckSettings {
    fn from(cfg: PassiveHealthCheckConfig) -> Self {
        Self {
            detection_window: Duration::from_secs(cfg.detection_window_secs),
            minimal_total_count_threshold: cfg.minimal_total_count_threshold,
            default_rate_limit: cfg.rate_limit,
            reactivation_period: Duration::from_secs(cfg.reactivation_period_secs),
        }
    }
}

fn default_detection_window_secs() -> u64 {
    60
}

fn default_minimal_total_count_threshold() -> u32 {
    10
}

fn default_rate_limit() -> f64 {
    0.3
}

fn default_reactivation_period_secs() -> u64 {
    60
}

/// Parses the `TransportFailureRateHealthPolicy.RateLimit` cluster metadata
/// entry (spec §6), invariant-locale: always `.` as the decimal separator
/// regardless of host locale, same as the teacher's numeric config fields
/// which never run through locale-sensitive parsing.
pub fn parse_rate_limit_override(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if (0.0..=1.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}
