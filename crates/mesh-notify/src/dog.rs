//! Dog robot integration.
//!
//! The dog gateway fans a message out to the chat task identified by
//! `taskId`. Alerts use the webhook alert format.

use std::time::Duration;

use async_trait::async_trait;
use mesh_alerts::{Alert, AlertStatus};
use mesh_config::DogConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::http;
use crate::notifier::{Notifier, NotifyContext};
use crate::webhook::WebhookAlert;

/// Request body posted to the dog gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DogPayload {
    /// Target chat task.
    pub task_id: i64,
    /// Status of the batch.
    pub status: AlertStatus,
    /// At most `max_alerts` alerts.
    pub alerts: Vec<WebhookAlert>,
}

/// Delivers batches to a dog chat task.
#[derive(Debug, Clone)]
pub struct DogNotifier {
    url: reqwest::Url,
    task_id: i64,
    max_alerts: usize,
    client: reqwest::Client,
}

impl DogNotifier {
    /// Builds the notifier against the gateway at `api_url`.
    pub fn new(config: &DogConfig, api_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: http::parse_url("dog", api_url)?,
            task_id: config.task_id,
            max_alerts: config.max_alerts,
            client: http::client(timeout)?,
        })
    }

    fn payload(&self, ctx: &NotifyContext, alerts: &[Alert]) -> DogPayload {
        let limit = if self.max_alerts == 0 {
            alerts.len()
        } else {
            self.max_alerts
        };
        DogPayload {
            task_id: self.task_id,
            status: ctx.status(alerts),
            alerts: alerts
                .iter()
                .take(limit)
                .map(|a| WebhookAlert::new(a, ctx))
                .collect(),
        }
    }
}

#[async_trait]
impl Notifier for DogNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()> {
        let payload = self.payload(ctx, alerts);
        debug!(task_id = self.task_id, alerts = payload.alerts.len(), "sending dog notification");
        http::post_json(&self.client, self.url.clone(), &payload, http::Expect::Success).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_alerts::LabelSet;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(max_alerts: usize) -> DogConfig {
        DogConfig {
            task_id: 77,
            max_alerts,
            send_resolved: true,
        }
    }

    fn alerts(n: usize) -> Vec<Alert> {
        (0..n)
            .map(|i| Alert::builder().label("pod", format!("p{i}")).build())
            .collect()
    }

    fn ctx() -> NotifyContext {
        NotifyContext::new("dog", "{}:{}", LabelSet::new())
    }

    #[test]
    fn truncates_to_max_alerts() {
        let n = DogNotifier::new(&config(2), "http://dog/api", Duration::from_secs(1)).unwrap();
        assert_eq!(n.payload(&ctx(), &alerts(5)).alerts.len(), 2);

        let unlimited = DogNotifier::new(&config(0), "http://dog/api", Duration::from_secs(1)).unwrap();
        assert_eq!(unlimited.payload(&ctx(), &alerts(5)).alerts.len(), 5);
    }

    #[tokio::test]
    async fn posts_task_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"taskId": 77, "status": "firing"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let n = DogNotifier::new(&config(0), &server.uri(), Duration::from_secs(5)).unwrap();
        n.notify(&ctx(), &alerts(1)).await.unwrap();
    }
}
