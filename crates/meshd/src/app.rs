//! Daemon wiring.
//!
//! Cluster sources feed the worker pool, workers write alerts into the store,
//! and the current [`Dispatcher`] subscribes to the store. Every applied
//! routing configuration builds a new dispatcher and notification pipeline
//! and swaps them in; the notification log outlives the swap.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use mesh_alerts::{AlertStore, StoreConfig};
use mesh_config::triggers::{ReloadTrigger, apply_trigger, run_reload_loop, watch_file, watch_hand_off};
use mesh_config::{Config, ConfigError, ConfigSource, Coordinator, ReloadMetrics, hand_off};
use mesh_dispatch::{Dispatcher, NotifyLog, Route};
use mesh_kube::{Enrichment, RouteConfigGenerator, SourceMetrics};
use mesh_notify::Pipeline;
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clusters::{ClusterSync, KubeconfigConnector};
use crate::error::{DaemonError, Result};
use crate::history::LogRecorder;
use crate::marker::GaugeMarker;
use crate::metrics_server;
use crate::settings::{RouteSource, Settings};
use crate::workers::{EventHandler, WorkerPool};

const RELOAD_QUEUE: usize = 16;

// ============ Dispatcher Swapping ============

/// Holds the dispatcher built from the active configuration.
pub struct DispatchSlot {
    store: Arc<AlertStore>,
    log: Arc<NotifyLog>,
    current: Mutex<Option<Arc<Dispatcher>>>,
}

impl std::fmt::Debug for DispatchSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSlot")
            .field("current", &self.current.lock())
            .finish_non_exhaustive()
    }
}

impl DispatchSlot {
    /// Creates an empty slot feeding dispatchers from `store`.
    #[must_use]
    pub fn new(store: Arc<AlertStore>, log: Arc<NotifyLog>) -> Self {
        Self {
            store,
            log,
            current: Mutex::new(None),
        }
    }

    /// Builds a dispatcher for `config` and replaces the current one.
    ///
    /// Nothing is swapped if the pipeline cannot be built. Must be called
    /// within a Tokio runtime.
    pub fn apply(&self, config: &Config) -> mesh_config::Result<()> {
        let pipeline = Pipeline::build(config).map_err(|e| ConfigError::Invalid {
            reason: format!("building notification pipeline: {e}"),
        })?;

        let retention = self.store.config().retention;
        let repeat = config.max_repeat_interval();
        if repeat > retention {
            warn!(
                repeat_interval = ?repeat,
                retention = ?retention,
                "repeat interval is longer than alert retention, resolved alerts may be re-sent"
            );
        }

        let dispatcher = Arc::new(Dispatcher::new(
            Route::new(&config.route),
            Arc::new(pipeline),
            Arc::clone(&self.log),
        ));
        tokio::spawn(Arc::clone(&dispatcher).run(self.store.subscribe()));

        if let Some(old) = self.current.lock().replace(dispatcher) {
            old.stop();
        }
        Ok(())
    }

    /// The active dispatcher.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Dispatcher>> {
        self.current.lock().clone()
    }

    /// Stops the active dispatcher.
    pub fn stop(&self) {
        if let Some(dispatcher) = self.current.lock().take() {
            dispatcher.stop();
        }
    }
}

// ============ Offline Checks ============

/// What a routing configuration file contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutesSummary {
    /// Receivers defined.
    pub receivers: usize,
    /// Route nodes, root included.
    pub routes: usize,
    /// Receivers referenced by a route but not defined.
    pub unknown_receivers: Vec<String>,
}

/// Loads a routing configuration file and builds its pipeline without
/// sending anything.
pub fn check_routes(path: &Path) -> Result<RoutesSummary> {
    let config = Config::load_file(path)?;
    Pipeline::build(&config)?;

    let route = Route::new(&config.route);
    let mut routes = 0;
    route.walk(&mut |_| routes += 1);

    Ok(RoutesSummary {
        receivers: config.receivers.len(),
        routes,
        unknown_receivers: config.unknown_receivers().into_iter().map(str::to_string).collect(),
    })
}

// ============ Daemon ============

/// Runs the daemon until `cancel` fires.
///
/// Fails at startup if a cluster client cannot be built, the metrics
/// listener cannot be bound, or a file-based routing configuration cannot be
/// loaded. With `settings_path` set, the cluster table of that file is
/// watched and clusters are added and removed at runtime.
pub async fn run(settings: Settings, settings_path: Option<PathBuf>, cancel: CancellationToken) -> Result<()> {
    let mut registry = Registry::default();
    let reload_metrics = ReloadMetrics::new(&mut registry);
    let source_metrics = SourceMetrics::new(&mut registry);
    let marker = Arc::new(GaugeMarker::new(&mut registry));
    let registry = Arc::new(registry);

    let store = Arc::new(AlertStore::new(
        StoreConfig::default()
            .with_gc_interval(settings.store.gc_interval)
            .with_retention(settings.store.retention),
        marker,
    ));
    let log = Arc::new(NotifyLog::new(settings.store.retention));
    let slot = Arc::new(DispatchSlot::new(Arc::clone(&store), Arc::clone(&log)));

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    handles.push(tokio::spawn(Arc::clone(&store).run_gc()));
    handles.push(tokio::spawn(
        Arc::clone(&log).run_gc(settings.store.gc_interval, cancel.child_token()),
    ));

    // Routing configuration
    let (trigger_tx, trigger_rx) = mpsc::channel(RELOAD_QUEUE);
    let source = match &settings.routes {
        RouteSource::Generated => {
            let client = Client::try_default().await.map_err(|e| DaemonError::Cluster {
                name: "local".to_string(),
                reason: e.to_string(),
            })?;
            let (tx, rx) = hand_off();
            handles.push(watch_hand_off(rx.clone(), trigger_tx.clone(), cancel.child_token()));
            let generator = Arc::new(RouteConfigGenerator::new(settings.global.clone(), tx));
            handles.push(tokio::spawn(mesh_kube::controller::run(
                client,
                generator,
                cancel.child_token(),
            )));
            info!("routing configuration generated from cluster resources");
            ConfigSource::HandOff(rx)
        }
        RouteSource::File { path } => {
            handles.push(watch_file(path.clone(), trigger_tx.clone(), cancel.child_token())?);
            info!(path = %path.display(), "routing configuration read from file");
            ConfigSource::File(path.clone())
        }
    };

    let coordinator = Arc::new(Coordinator::new(source, reload_metrics));
    let subscriber = Arc::clone(&slot);
    coordinator.subscribe(move |config| subscriber.apply(config));
    if matches!(coordinator.source(), ConfigSource::File(_)) {
        apply_trigger(&coordinator, ReloadTrigger::Startup)?;
    }

    #[cfg(unix)]
    handles.push(mesh_config::triggers::watch_signal(trigger_tx.clone(), cancel.child_token())?);
    drop(trigger_tx);
    handles.push(tokio::spawn(run_reload_loop(
        Arc::clone(&coordinator),
        trigger_rx,
        cancel.child_token(),
    )));

    // Event pipeline
    let (event_tx, event_rx) = mpsc::channel(settings.workers.queue_capacity);
    let enrichment = Enrichment::new(settings.reasons.clone(), settings.workcodes.clone());
    let handler = EventHandler::new(Arc::clone(&store), Arc::new(enrichment), Arc::new(LogRecorder::new()));
    let workers = tokio::spawn(WorkerPool::new(handler, settings.workers.workers).run(event_rx, cancel.child_token()));

    let clusters = Arc::new(ClusterSync::new(
        Arc::new(KubeconfigConnector),
        event_tx,
        source_metrics,
        cancel.child_token(),
    ));
    clusters.reconcile(&settings.clusters, true).await?;
    if let Some(path) = settings_path {
        handles.push(Arc::clone(&clusters).watch_settings(path, cancel.child_token())?);
    }

    if settings.metrics.enabled {
        let listener = metrics_server::bind(settings.metrics.listen).await?;
        handles.push(tokio::spawn(metrics_server::serve(
            listener,
            Arc::clone(&registry),
            cancel.child_token(),
        )));
    }

    info!(clusters = ?clusters.clusters(), "meshd started");
    cancel.cancelled().await;
    info!("meshd shutting down");

    clusters.shutdown().await;
    slot.stop();
    store.close();
    let _ = workers.await;
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    info!("meshd stopped");
    Ok(())
}
