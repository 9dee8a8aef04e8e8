//! Alert marker that exports the number of stored alerts.

use mesh_alerts::{Fingerprint, Marker, MemMarker};
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// [`MemMarker`] that mirrors its size into `eventmesh_alerts`.
#[derive(Debug, Default)]
pub struct GaugeMarker {
    inner: MemMarker,
    stored: Gauge,
}

impl GaugeMarker {
    /// Creates the marker and registers its gauge.
    pub fn new(registry: &mut Registry) -> Self {
        let marker = Self::default();
        registry.register("eventmesh_alerts", "Alerts held by the alert store", marker.stored.clone());
        marker
    }

    fn refresh(&self) {
        self.stored.set(i64::try_from(self.inner.count()).unwrap_or(i64::MAX));
    }
}

impl Marker for GaugeMarker {
    fn set_active(&self, fingerprint: Fingerprint) {
        self.inner.set_active(fingerprint);
        self.refresh();
    }

    fn delete(&self, fingerprint: Fingerprint) {
        self.inner.delete(fingerprint);
        self.refresh();
    }

    fn count(&self) -> usize {
        self.inner.count()
    }
}
