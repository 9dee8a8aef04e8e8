//! Event history recording.
//!
//! History is kept outside the alert pipeline; a failing recorder never holds
//! up or fails delivery.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use mesh_kube::RawEvent;
use tracing::info;

use crate::error::{DaemonError, Result};

/// Persists admitted events.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    /// Records one event and returns its record id.
    async fn record(&self, event: &RawEvent) -> Result<u64>;
}

/// Writes each event as a JSON log line under the `meshd::history` target.
#[derive(Debug, Default)]
pub struct LogRecorder {
    next_id: AtomicU64,
}

impl LogRecorder {
    /// Creates a recorder numbering records from 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryRecorder for LogRecorder {
    async fn record(&self, event: &RawEvent) -> Result<u64> {
        let record = serde_json::to_string(event).map_err(|e| DaemonError::History(e.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(target: "meshd::history", id, cluster = %event.cluster, %record, "event recorded");
        Ok(id)
    }
}
