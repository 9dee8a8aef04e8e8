//! Webhook integration.
//!
//! Posts Alertmanager-compatible JSON (payload version 4) so existing webhook
//! receivers work unchanged.

use std::time::Duration;

use async_trait::async_trait;
use mesh_alerts::{Alert, AlertStatus, LabelSet};
use mesh_config::WebhookConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::http;
use crate::notifier::{Notifier, NotifyContext};

/// Delivers batches to a generic webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: reqwest::Url,
    max_alerts: usize,
    external_url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Builds the notifier from its configuration.
    pub fn new(config: &WebhookConfig, timeout: Duration, external_url: Option<&str>) -> Result<Self> {
        Ok(Self {
            url: http::parse_url("webhook", &config.url)?,
            max_alerts: config.max_alerts,
            external_url: external_url.unwrap_or_default().to_string(),
            client: http::client(timeout)?,
        })
    }

    /// The target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()> {
        let payload = WebhookPayload::new(ctx, alerts, self.max_alerts, &self.external_url);
        debug!(
            receiver = %ctx.receiver,
            alerts = payload.alerts.len(),
            truncated = payload.truncated_alerts,
            "sending webhook notification"
        );
        http::post_json(&self.client, self.url.clone(), &payload, http::Expect::Success).await?;
        Ok(())
    }
}

/// The payload format for webhook notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// The payload version.
    pub version: String,
    /// Group key identifying this alert group.
    pub group_key: String,
    /// Number of alerts left out because of `max_alerts`.
    pub truncated_alerts: usize,
    /// Status of the batch.
    pub status: AlertStatus,
    /// Receiver handling this notification.
    pub receiver: String,
    /// Labels the group is keyed on.
    pub group_labels: LabelSet,
    /// Labels common to all alerts.
    pub common_labels: LabelSet,
    /// Annotations common to all alerts.
    pub common_annotations: LabelSet,
    /// Link back to the sender.
    #[serde(rename = "externalURL")]
    pub external_url: String,
    /// The alerts in this notification.
    pub alerts: Vec<WebhookAlert>,
}

impl WebhookPayload {
    /// Renders a batch, keeping at most `max_alerts` alerts (0 keeps all).
    #[must_use]
    pub fn new(ctx: &NotifyContext, alerts: &[Alert], max_alerts: usize, external_url: &str) -> Self {
        let kept = if max_alerts == 0 {
            alerts
        } else {
            &alerts[..alerts.len().min(max_alerts)]
        };

        Self {
            version: "4".to_string(),
            group_key: ctx.group_key.clone(),
            truncated_alerts: alerts.len() - kept.len(),
            status: ctx.status(alerts),
            receiver: ctx.receiver.clone(),
            group_labels: ctx.group_labels.clone(),
            common_labels: common(alerts.iter().map(|a| &a.labels)),
            common_annotations: common(alerts.iter().map(|a| &a.annotations)),
            external_url: external_url.to_string(),
            alerts: kept.iter().map(|a| WebhookAlert::new(a, ctx)).collect(),
        }
    }
}

/// Pairs shared by every set.
fn common<'a>(mut sets: impl Iterator<Item = &'a LabelSet>) -> LabelSet {
    let Some(first) = sets.next() else {
        return LabelSet::new();
    };
    let mut out = first.clone();
    for set in sets {
        out.retain(|k, v| set.get(k) == Some(v));
    }
    out
}

/// Alert format in webhook payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    /// `firing` or `resolved`.
    pub status: AlertStatus,
    /// Labels attached to the alert.
    pub labels: LabelSet,
    /// Annotations for the alert.
    pub annotations: LabelSet,
    /// Start of the window, RFC 3339.
    pub starts_at: String,
    /// End of the window, RFC 3339; the zero time while open.
    pub ends_at: String,
    /// URL of the alert source.
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    /// Fingerprint of the label set.
    pub fingerprint: String,
}

impl WebhookAlert {
    pub(crate) fn new(alert: &Alert, ctx: &NotifyContext) -> Self {
        Self {
            status: alert.status_at(ctx.now),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at.to_rfc3339(),
            ends_at: alert
                .ends_at
                .map_or_else(|| "0001-01-01T00:00:00Z".to_string(), |t| t.to_rfc3339()),
            generator_url: String::new(),
            fingerprint: alert.fingerprint().to_string(),
        }
    }
}
