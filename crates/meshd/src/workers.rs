//! Bounded pool turning admitted events into stored alerts.

use std::sync::Arc;

use mesh_alerts::AlertStore;
use mesh_kube::{Enrichment, RawEvent};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::history::HistoryRecorder;

/// Handles one event: normalize, store, record.
#[derive(Clone)]
pub struct EventHandler {
    store: Arc<AlertStore>,
    enrichment: Arc<Enrichment>,
    history: Arc<dyn HistoryRecorder>,
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl EventHandler {
    /// Creates a handler writing into `store`.
    #[must_use]
    pub fn new(store: Arc<AlertStore>, enrichment: Arc<Enrichment>, history: Arc<dyn HistoryRecorder>) -> Self {
        Self {
            store,
            enrichment,
            history,
        }
    }

    /// Stores the event's alert, then records the event. A history failure
    /// is logged and does not affect the stored alert.
    pub async fn handle(&self, event: RawEvent) {
        let alert = event.to_alert(&self.enrichment);
        if let Err(e) = self.store.put([alert]) {
            warn!(cluster = %event.cluster, reason = %event.reason, error = %e, "storing alert failed");
        }

        match self.history.record(&event).await {
            Ok(id) => debug!(cluster = %event.cluster, record = id, "event recorded"),
            Err(e) => warn!(cluster = %event.cluster, error = %e, "recording event failed"),
        }
    }
}

/// Runs at most `workers` handlers at once.
///
/// The queue in front of the pool is bounded, so a burst fills it and then
/// holds up the cluster watch loops instead of spawning without limit.
#[derive(Debug)]
pub struct WorkerPool {
    handler: EventHandler,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates a pool of `workers` concurrent handlers.
    #[must_use]
    pub fn new(handler: EventHandler, workers: usize) -> Self {
        Self {
            handler,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Drains `events` until cancelled or every sender is dropped, then waits
    /// for in-flight handlers.
    pub async fn run(self, mut events: mpsc::Receiver<RawEvent>, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();
        info!(workers = self.permits.available_permits(), "event workers started");

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let handler = self.handler.clone();
            tasks.spawn(async move {
                handler.handle(event).await;
                drop(permit);
            });

            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        info!("event workers stopped");
    }
}
