//! Notifier and stage seams.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_alerts::{Alert, AlertStatus, LabelSet};
use tracing::{error, info};

use crate::error::Result;

/// Per-flush context handed to every integration.
#[derive(Debug, Clone)]
pub struct NotifyContext {
    /// Receiver the batch is addressed to.
    pub receiver: String,
    /// Aggregation group the batch comes from.
    pub group_key: String,
    /// Labels the group is keyed on.
    pub group_labels: LabelSet,
    /// Time the flush started; resolved status is evaluated against it.
    pub now: DateTime<Utc>,
}

impl NotifyContext {
    /// Creates a context stamped with the current time.
    #[must_use]
    pub fn new(receiver: impl Into<String>, group_key: impl Into<String>, group_labels: LabelSet) -> Self {
        Self {
            receiver: receiver.into(),
            group_key: group_key.into(),
            group_labels,
            now: Utc::now(),
        }
    }

    /// Status of the batch as a whole: firing if any alert is still firing.
    #[must_use]
    pub fn status(&self, alerts: &[Alert]) -> AlertStatus {
        if alerts.iter().any(|a| !a.resolved_at(self.now)) {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        }
    }
}

/// A single delivery target.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Delivers one batch. The error says whether a retry may succeed.
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()>;
}

/// Executes a batch for a receiver; implemented by the pipeline and by test
/// doubles.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Delivers the batch to every integration of `ctx.receiver`.
    async fn exec(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()>;
}

/// One configured notifier within a receiver.
#[derive(Debug, Clone)]
pub struct Integration {
    kind: &'static str,
    index: usize,
    send_resolved: bool,
    notifier: Arc<dyn Notifier>,
}

impl Integration {
    /// Wraps a notifier; `kind` and `index` identify it in logs.
    #[must_use]
    pub fn new(kind: &'static str, index: usize, send_resolved: bool, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            kind,
            index,
            send_resolved,
            notifier,
        }
    }

    /// Integration kind, e.g. `webhook`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Position within the receiver's entries of the same kind.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Whether resolved alerts are delivered.
    #[must_use]
    pub const fn send_resolved(&self) -> bool {
        self.send_resolved
    }

    /// Delivers a batch, dropping resolved alerts unless `send_resolved` is
    /// set. An empty remainder is not sent.
    pub async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()> {
        if self.send_resolved {
            return self.notifier.notify(ctx, alerts).await;
        }
        let firing: Vec<Alert> = alerts
            .iter()
            .filter(|a| !a.resolved_at(ctx.now))
            .cloned()
            .collect();
        if firing.is_empty() {
            return Ok(());
        }
        self.notifier.notify(ctx, &firing).await
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.index)
    }
}

/// Writes batches to the log. Used for receivers without integrations.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()> {
        for alert in alerts {
            match alert.status_at(ctx.now) {
                AlertStatus::Firing => {
                    error!(
                        receiver = %ctx.receiver,
                        group = %ctx.group_key,
                        fingerprint = %alert.fingerprint(),
                        labels = ?alert.labels,
                        "ALERT"
                    );
                }
                AlertStatus::Resolved => {
                    info!(
                        receiver = %ctx.receiver,
                        group = %ctx.group_key,
                        fingerprint = %alert.fingerprint(),
                        labels = ?alert.labels,
                        "RESOLVED"
                    );
                }
            }
        }
        Ok(())
    }
}
