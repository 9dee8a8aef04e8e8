//! Alert dispatcher.
//!
//! The [`Dispatcher`] consumes an alert store subscription, matches every
//! alert against its route tree and folds it into one aggregation group per
//! matched route and group key. Each group runs as its own task.

use std::collections::HashMap;
use std::sync::Arc;

use mesh_alerts::{Alert, AlertIterator};
use mesh_notify::Stage;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::group::{AggrGroup, GroupMap, GroupSummary};
use crate::nflog::NotifyLog;
use crate::route::Route;

/// Routes alerts into aggregation groups and flushes them through a stage.
///
/// A dispatcher is bound to one route tree and one stage; a reload builds a
/// new dispatcher and stops the old one.
pub struct Dispatcher {
    route: Arc<Route>,
    stage: Arc<dyn Stage>,
    log: Arc<NotifyLog>,
    groups: GroupMap,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("route", &self.route.key())
            .field("groups", &self.groups.lock().len())
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher. `log` is shared across dispatchers so a rebuild
    /// does not re-send what was already delivered.
    #[must_use]
    pub fn new(route: Route, stage: Arc<dyn Stage>, log: Arc<NotifyLog>) -> Self {
        Self {
            route: Arc::new(route),
            stage,
            log,
            groups: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// The route tree.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Consumes `alerts` until the subscription ends or the dispatcher is
    /// stopped.
    pub async fn run(self: Arc<Self>, mut alerts: AlertIterator) {
        info!(route = %self.route.key(), "dispatcher started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = alerts.next() => match next {
                    Some(alert) => self.process(&alert),
                    None => break,
                },
            }
        }
        alerts.close();
        self.cancel.cancel();
        info!("dispatcher stopped");
    }

    /// Folds one alert into the groups of every matching route.
    ///
    /// Must be called within a Tokio runtime; new groups spawn their task.
    pub fn process(&self, alert: &Alert) {
        for route in self.route.matches(&alert.labels) {
            let labels = route.group_labels(&alert.labels);
            let key = route.group_key(&labels);

            let mut groups = self.groups.lock();
            if groups.get(&key).is_some_and(|g| g.insert(alert.clone())) {
                continue;
            }

            let group = Arc::new(AggrGroup::new(key.clone(), labels, route.opts().clone()));
            group.insert(alert.clone());
            groups.insert(key.clone(), Arc::clone(&group));
            drop(groups);

            debug!(group = %key, receiver = %route.opts().receiver, "aggregation group created");
            tokio::spawn(group.run(
                Arc::clone(&self.stage),
                Arc::clone(&self.log),
                Arc::clone(&self.groups),
                self.cancel.child_token(),
            ));
        }
    }

    /// Current aggregation groups, sorted by key.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupSummary> {
        let mut out: Vec<GroupSummary> = self.groups.lock().values().map(|g| g.summary()).collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Stops the dispatcher and every group task. Pending batches are
    /// dropped.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.groups.lock().clear();
    }

    /// Whether [`stop`](Self::stop) was called or the subscription ended.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
