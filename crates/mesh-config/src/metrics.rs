//! Reload health gauges.

use std::sync::atomic::AtomicU64;

use chrono::{DateTime, Utc};
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Gauges describing the outcome of configuration reloads.
#[derive(Clone, Default)]
pub struct ReloadMetrics {
    /// Hash of the last successfully applied configuration.
    config_hash: Gauge<f64, AtomicU64>,
    /// 1 if the last reload succeeded, 0 otherwise.
    last_reload_successful: Gauge,
    /// Unix time of the last successful reload.
    last_reload_success_timestamp_seconds: Gauge<f64, AtomicU64>,
}

impl std::fmt::Debug for ReloadMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadMetrics")
            .field("config_hash", &self.config_hash.get())
            .field("last_reload_successful", &self.last_reload_successful.get())
            .finish_non_exhaustive()
    }
}

impl ReloadMetrics {
    /// Creates the gauges and registers them.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "eventmesh_config_hash",
            "Hash of the currently loaded routing configuration",
            metrics.config_hash.clone(),
        );
        registry.register(
            "eventmesh_config_last_reload_successful",
            "Whether the last configuration reload attempt was successful",
            metrics.last_reload_successful.clone(),
        );
        registry.register(
            "eventmesh_config_last_reload_success_timestamp_seconds",
            "Timestamp of the last successful configuration reload",
            metrics.last_reload_success_timestamp_seconds.clone(),
        );
        metrics
    }

    /// Records a successful reload.
    pub fn record_success(&self, hash: f64, at: DateTime<Utc>) {
        self.config_hash.set(hash);
        self.last_reload_successful.set(1);
        self.last_reload_success_timestamp_seconds
            .set(at.timestamp_millis() as f64 / 1000.0);
    }

    /// Records a failed reload. The hash and timestamp keep their last
    /// successful values.
    pub fn record_failure(&self) {
        self.last_reload_successful.set(0);
    }

    /// Current value of the success gauge.
    #[must_use]
    pub fn last_reload_successful(&self) -> i64 {
        self.last_reload_successful.get()
    }

    /// Current value of the hash gauge.
    #[must_use]
    pub fn config_hash(&self) -> f64 {
        self.config_hash.get()
    }

    /// Current value of the success timestamp gauge.
    #[must_use]
    pub fn last_reload_success_timestamp(&self) -> f64 {
        self.last_reload_success_timestamp_seconds.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn success_then_failure() {
        let metrics = ReloadMetrics::default();
        metrics.record_success(42.0, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        assert_eq!(metrics.last_reload_successful(), 1);
        assert!((metrics.config_hash() - 42.0).abs() < f64::EPSILON);

        metrics.record_failure();
        assert_eq!(metrics.last_reload_successful(), 0);
        assert!((metrics.config_hash() - 42.0).abs() < f64::EPSILON);
        assert!((metrics.last_reload_success_timestamp() - 1_700_000_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn registered_names_encode() {
        let mut registry = Registry::default();
        let metrics = ReloadMetrics::new(&mut registry);
        metrics.record_success(1.0, Utc::now());

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();
        assert!(out.contains("eventmesh_config_hash"));
        assert!(out.contains("eventmesh_config_last_reload_successful 1"));
        assert!(out.contains("eventmesh_config_last_reload_success_timestamp_seconds"));
    }
}
