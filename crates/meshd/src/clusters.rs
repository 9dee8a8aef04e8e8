//! Cluster watch reconciliation.
//!
//! The `[[clusters]]` table of the settings file is the desired set of
//! watched clusters. [`ClusterSync`] starts a watch for every new entry,
//! stops the watch of every removed one and restarts a watch whose entry
//! changed. The settings file is watched so clusters can be added and removed
//! without restarting the daemon.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::Client;
use kube::config::KubeConfigOptions;
use mesh_config::triggers::watch_file;
use mesh_kube::{AdmissionFilter, ClusterEventSource, ClusterManager, RawEvent, SourceMetrics};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, Result};
use crate::settings::{ClusterSettings, Settings};

/// Builds the API client of a cluster.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `cluster`.
    async fn connect(&self, cluster: &ClusterSettings) -> Result<Client>;
}

/// Connects through the local kubeconfig, or the in-cluster configuration
/// when no context is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeconfigConnector;

#[async_trait]
impl Connector for KubeconfigConnector {
    async fn connect(&self, cluster: &ClusterSettings) -> Result<Client> {
        let failed = |reason: String| DaemonError::Cluster {
            name: cluster.name.clone(),
            reason,
        };

        let config = match &cluster.context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..KubeConfigOptions::default()
                };
                kube::Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| failed(e.to_string()))?
            }
            None => kube::Config::infer().await.map_err(|e| failed(e.to_string()))?,
        };
        Client::try_from(config).map_err(|e| failed(e.to_string()))
    }
}

/// Clusters touched by one reconcile pass, each list sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterChanges {
    /// Watches started for new entries.
    pub added: Vec<String>,
    /// Watches stopped for removed entries.
    pub removed: Vec<String>,
    /// Watches restarted because their entry changed.
    pub restarted: Vec<String>,
    /// Entries that could not be started; retried on the next pass.
    pub failed: Vec<String>,
}

impl ClusterChanges {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.restarted.is_empty() && self.failed.is_empty()
    }
}

/// Keeps one watch loop per configured cluster.
pub struct ClusterSync {
    manager: ClusterManager,
    connector: Arc<dyn Connector>,
    sink: mpsc::Sender<RawEvent>,
    metrics: SourceMetrics,
    applied: Mutex<BTreeMap<String, ClusterSettings>>,
}

impl std::fmt::Debug for ClusterSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSync")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl ClusterSync {
    /// Creates a sync that forwards admitted events into `sink`. Watch loops
    /// stop when `cancel` fires.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        sink: mpsc::Sender<RawEvent>,
        metrics: SourceMetrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager: ClusterManager::new(cancel),
            connector,
            sink,
            metrics,
            applied: Mutex::new(BTreeMap::new()),
        }
    }

    /// Names of the watched clusters, sorted.
    #[must_use]
    pub fn clusters(&self) -> Vec<String> {
        self.manager.clusters()
    }

    /// Brings the watch loops in line with `desired`.
    ///
    /// With `strict` set the first cluster that cannot be started fails the
    /// pass; otherwise it is logged, reported in [`ClusterChanges::failed`]
    /// and left for the next pass.
    pub async fn reconcile(&self, desired: &[ClusterSettings], strict: bool) -> Result<ClusterChanges> {
        let desired: BTreeMap<&str, &ClusterSettings> = desired.iter().map(|c| (c.name.as_str(), c)).collect();
        let mut applied = self.applied.lock().await;
        let mut changes = ClusterChanges::default();

        let stale: Vec<String> = applied
            .keys()
            .filter(|name| !desired.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            self.manager.remove(&name).await;
            applied.remove(&name);
            changes.removed.push(name);
        }

        for (name, cluster) in desired {
            let restart = match applied.get(name) {
                Some(current) if current == cluster => continue,
                Some(_) => {
                    self.manager.remove(name).await;
                    applied.remove(name);
                    true
                }
                None => false,
            };

            match self.start(cluster).await {
                Ok(()) => {
                    applied.insert(name.to_string(), cluster.clone());
                    if restart {
                        changes.restarted.push(name.to_string());
                    } else {
                        changes.added.push(name.to_string());
                    }
                }
                Err(e) if strict => return Err(e),
                Err(e) => {
                    warn!(cluster = name, error = %e, "failed to start cluster watch");
                    changes.failed.push(name.to_string());
                }
            }
        }

        Ok(changes)
    }

    async fn start(&self, cluster: &ClusterSettings) -> Result<()> {
        let client = self.connector.connect(cluster).await?;
        let filter = AdmissionFilter::with_rules(Utc::now(), &cluster.filters, &cluster.not_filters);
        self.manager.add(ClusterEventSource::new(
            &cluster.name,
            client,
            filter,
            self.sink.clone(),
            self.metrics.clone(),
        ))?;
        Ok(())
    }

    /// Reconciles against the settings file at `path` whenever it changes,
    /// until cancelled. An unreadable or invalid file leaves the watches as
    /// they are. Only the cluster table is re-read.
    pub fn watch_settings(self: Arc<Self>, path: PathBuf, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::channel(4);
        let watcher = watch_file(path.clone(), tx, cancel.child_token())?;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    trigger = rx.recv() => if trigger.is_none() {
                        break;
                    },
                }
                while rx.try_recv().is_ok() {}

                let settings = match Settings::from_file(&path) {
                    Ok(settings) => settings,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "ignoring settings change");
                        continue;
                    }
                };
                match self.reconcile(&settings.clusters, false).await {
                    Ok(changes) if changes.is_empty() => debug!("cluster set unchanged"),
                    Ok(changes) => info!(
                        added = ?changes.added,
                        removed = ?changes.removed,
                        restarted = ?changes.restarted,
                        failed = ?changes.failed,
                        "cluster watches reconciled"
                    ),
                    Err(e) => warn!(error = %e, "cluster reconcile failed"),
                }
            }
            let _ = watcher.await;
        }))
    }

    /// Stops every watch loop and waits for them to end.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        self.applied.lock().await.clear();
    }
}
