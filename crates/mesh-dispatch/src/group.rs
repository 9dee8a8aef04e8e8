//! Aggregation groups.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mesh_alerts::{Alert, Fingerprint, LabelSet};
use mesh_notify::{NotifyContext, Stage};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::nflog::{BatchState, NotifyLog};
use crate::route::RouteOpts;

pub(crate) type GroupMap = Arc<Mutex<HashMap<String, Arc<AggrGroup>>>>;

/// Snapshot of an aggregation group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    /// Group key.
    pub key: String,
    /// Receiver the group is delivered to.
    pub receiver: String,
    /// Labels the group is keyed on.
    pub labels: LabelSet,
    /// Alerts currently in the group, by fingerprint.
    pub alerts: Vec<Fingerprint>,
}

#[derive(Debug, Default)]
struct GroupState {
    alerts: BTreeMap<Fingerprint, Alert>,
    done: bool,
}

/// Alerts batched under one route and group key.
#[derive(Debug)]
pub(crate) struct AggrGroup {
    key: String,
    labels: LabelSet,
    opts: RouteOpts,
    state: Mutex<GroupState>,
}

impl AggrGroup {
    pub(crate) fn new(key: String, labels: LabelSet, opts: RouteOpts) -> Self {
        Self {
            key,
            labels,
            opts,
            state: Mutex::new(GroupState::default()),
        }
    }

    /// Adds or replaces an alert. Returns false once the group has been torn
    /// down; the caller must start a new group.
    pub(crate) fn insert(&self, alert: Alert) -> bool {
        let mut state = self.state.lock();
        if state.done {
            return false;
        }
        state.alerts.insert(alert.fingerprint(), alert);
        true
    }

    pub(crate) fn summary(&self) -> GroupSummary {
        GroupSummary {
            key: self.key.clone(),
            receiver: self.opts.receiver.clone(),
            labels: self.labels.clone(),
            alerts: self.state.lock().alerts.keys().copied().collect(),
        }
    }

    /// Drives the group: waits `group_wait`, then flushes every
    /// `group_interval` until no alert is left.
    pub(crate) async fn run(
        self: Arc<Self>,
        stage: Arc<dyn Stage>,
        log: Arc<NotifyLog>,
        groups: GroupMap,
        cancel: CancellationToken,
    ) {
        if !sleep(self.opts.group_wait, &cancel).await {
            return;
        }
        loop {
            self.flush(stage.as_ref(), &log).await;

            if self.finish_if_empty() {
                let mut groups = groups.lock();
                if groups.get(&self.key).is_some_and(|g| Arc::ptr_eq(g, &self)) {
                    groups.remove(&self.key);
                }
                debug!(group = %self.key, "aggregation group finished");
                return;
            }
            if !sleep(self.opts.group_interval, &cancel).await {
                return;
            }
        }
    }

    fn finish_if_empty(&self) -> bool {
        let mut state = self.state.lock();
        if state.alerts.is_empty() {
            state.done = true;
        }
        state.done
    }

    /// Delivers the current batch if the notification log says it is due,
    /// then drops resolved alerts that did not change meanwhile.
    pub(crate) async fn flush(&self, stage: &dyn Stage, log: &NotifyLog) {
        let batch: Vec<Alert> = self.state.lock().alerts.values().cloned().collect();
        if batch.is_empty() {
            return;
        }

        let ctx = NotifyContext::new(self.opts.receiver.clone(), self.key.clone(), self.labels.clone());
        let mut sent = BatchState::default();
        for alert in &batch {
            match alert.ends_at.filter(|_| alert.resolved_at(ctx.now)) {
                Some(ends_at) => {
                    sent.resolved.insert(alert.fingerprint(), ends_at);
                }
                None => {
                    sent.firing.insert(alert.fingerprint());
                }
            }
        }

        if log.needs_update(&ctx.receiver, &self.key, &sent, self.opts.repeat_interval) {
            let timeout = self.opts.group_interval;
            match tokio::time::timeout(timeout, stage.exec(&ctx, &batch)).await {
                Ok(Ok(())) => {
                    debug!(group = %self.key, receiver = %ctx.receiver, alerts = batch.len(), "flushed aggregation group");
                    log.record(&ctx.receiver, &self.key, sent);
                }
                Ok(Err(e)) => {
                    warn!(group = %self.key, receiver = %ctx.receiver, error = %e, "notify for aggregation group failed");
                    return;
                }
                Err(_) => {
                    warn!(
                        group = %self.key,
                        receiver = %ctx.receiver,
                        timeout_ms = timeout.as_millis() as u64,
                        "notify for aggregation group timed out"
                    );
                    return;
                }
            }
        }

        let now = Utc::now();
        let mut state = self.state.lock();
        for alert in &batch {
            if !alert.resolved_at(now) {
                continue;
            }
            let fp = alert.fingerprint();
            if state.alerts.get(&fp) == Some(alert) {
                state.alerts.remove(&fp);
            }
        }
    }
}

async fn sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
