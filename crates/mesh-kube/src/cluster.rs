//! Runtime registry of cluster watch loops.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{KubeError, Result};
use crate::source::ClusterEventSource;

struct Watch {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Starts and stops one event source per cluster.
pub struct ClusterManager {
    cancel: CancellationToken,
    clusters: Mutex<HashMap<String, Watch>>,
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("clusters", &self.clusters())
            .finish_non_exhaustive()
    }
}

impl ClusterManager {
    /// Creates a manager whose watch loops stop when `cancel` fires.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            clusters: Mutex::new(HashMap::new()),
        }
    }

    /// Starts watching a cluster. Fails if a live watch with the same name
    /// exists; a watch that already ended is replaced.
    pub fn add(&self, source: ClusterEventSource) -> Result<()> {
        let name = source.name().to_string();
        let mut clusters = self.clusters.lock();
        if clusters.get(&name).is_some_and(|w| !w.task.is_finished()) {
            return Err(KubeError::DuplicateCluster { name });
        }

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(source.run(cancel.clone()));
        clusters.insert(name.clone(), Watch { cancel, task });
        info!(cluster = %name, "cluster added");
        Ok(())
    }

    /// Stops watching a cluster and waits for its loop to end. Returns false
    /// if the cluster is unknown.
    pub async fn remove(&self, name: &str) -> bool {
        let Some(watch) = self.clusters.lock().remove(name) else {
            return false;
        };
        watch.cancel.cancel();
        let _ = watch.task.await;
        info!(cluster = name, "cluster removed");
        true
    }

    /// Names of the registered clusters, sorted.
    #[must_use]
    pub fn clusters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops every watch loop and waits for them to end.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let watches: Vec<Watch> = self.clusters.lock().drain().map(|(_, w)| w).collect();
        for watch in watches {
            let _ = watch.task.await;
        }
        info!("all cluster watches stopped");
    }
}
