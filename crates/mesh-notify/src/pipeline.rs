//! Per-configuration notification pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use mesh_alerts::Alert;
use mesh_config::{Config, ReceiverConfig};
use tracing::{debug, error, info, warn};

use crate::dog::DogNotifier;
use crate::error::{NotifyError, Result};
use crate::notifier::{Integration, LogNotifier, NotifyContext, Stage};
use crate::retry::RetryPolicy;
use crate::webhook::WebhookNotifier;
use crate::yach::YachNotifier;

/// Integrations for every receiver referenced by a routing tree.
///
/// Built eagerly from one configuration snapshot and never mutated; a reload
/// builds a new pipeline and swaps it in.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    receivers: HashMap<String, Vec<Integration>>,
    retry: RetryPolicy,
}

impl Pipeline {
    /// Builds integrations for every receiver the route tree references.
    ///
    /// Unreferenced receivers are skipped. A referenced receiver without any
    /// integration logs its batches. An integration that cannot be built
    /// fails the whole pipeline so the previous one stays in place.
    pub fn build(config: &Config) -> Result<Self> {
        let referenced = config.referenced_receivers();
        let mut receivers = HashMap::new();

        for receiver in &config.receivers {
            if !referenced.contains(receiver.name.as_str()) {
                info!(receiver = %receiver.name, "skipping creation of receiver not referenced by any route");
                continue;
            }
            let integrations = build_receiver(config, receiver)?;
            debug!(
                receiver = %receiver.name,
                integrations = integrations.len(),
                "built receiver"
            );
            receivers.insert(receiver.name.clone(), integrations);
        }

        Ok(Self {
            receivers,
            retry: RetryPolicy::default(),
        })
    }

    /// Creates a pipeline from prebuilt integrations.
    #[must_use]
    pub fn from_integrations(receivers: HashMap<String, Vec<Integration>>) -> Self {
        Self {
            receivers,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy applied to every integration.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Integrations of a receiver.
    #[must_use]
    pub fn integrations(&self, receiver: &str) -> Option<&[Integration]> {
        self.receivers.get(receiver).map(Vec::as_slice)
    }

    /// Names of the built receivers, sorted.
    #[must_use]
    pub fn receiver_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.receivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn build_receiver(config: &Config, receiver: &ReceiverConfig) -> Result<Vec<Integration>> {
    let global = &config.global;
    let mut integrations = Vec::with_capacity(receiver.integration_count());

    for (i, webhook) in receiver.webhook_configs.iter().enumerate() {
        let notifier = WebhookNotifier::new(webhook, global.http_timeout, global.console_url.as_deref())?;
        integrations.push(Integration::new("webhook", i, webhook.send_resolved, Arc::new(notifier)));
    }

    for (i, dog) in receiver.dog_configs.iter().enumerate() {
        let Some(api_url) = global.dog_api_url.as_deref() else {
            warn!(receiver = %receiver.name, "dog_api_url is not set, skipping dog integration");
            continue;
        };
        let notifier = DogNotifier::new(dog, api_url, global.http_timeout)?;
        integrations.push(Integration::new("dog", i, dog.send_resolved, Arc::new(notifier)));
    }

    for (i, yach) in receiver.yach_configs.iter().enumerate() {
        let notifier = YachNotifier::new(
            yach,
            &global.yach_api_url,
            global.console_url.as_deref(),
            global.http_timeout,
        )?;
        integrations.push(Integration::new("yach", i, yach.send_resolved, Arc::new(notifier)));
    }

    if integrations.is_empty() {
        integrations.push(Integration::new("log", 0, true, Arc::new(LogNotifier)));
    }
    Ok(integrations)
}

#[async_trait]
impl Stage for Pipeline {
    async fn exec(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()> {
        let integrations = self
            .receivers
            .get(&ctx.receiver)
            .ok_or_else(|| NotifyError::ReceiverNotFound {
                name: ctx.receiver.clone(),
            })?;

        let results = join_all(integrations.iter().map(|integration| async move {
            let target = integration.to_string();
            let res = self
                .retry
                .run(&target, || integration.notify(ctx, alerts))
                .await;
            (target, res)
        }))
        .await;

        let mut errors = Vec::new();
        let mut retryable = false;
        for (target, res) in results {
            if let Err(e) = res {
                error!(
                    receiver = %ctx.receiver,
                    integration = %target,
                    group = %ctx.group_key,
                    error = %e,
                    "notify failed"
                );
                retryable |= e.retryable();
                errors.push(format!("{target}: {e}"));
            }
        }

        if errors.is_empty() {
            debug!(receiver = %ctx.receiver, alerts = alerts.len(), "notify succeeded");
            Ok(())
        } else {
            Err(NotifyError::Multiple { errors, retryable })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Notifier;
    use mesh_alerts::LabelSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Counting {
        async fn notify(&self, _ctx: &NotifyContext, _alerts: &[Alert]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Status { status: 500 })
            } else {
                Ok(())
            }
        }
    }

    fn ctx(receiver: &str) -> NotifyContext {
        NotifyContext::new(receiver, "{}:{}", LabelSet::new())
    }

    fn alert() -> Alert {
        Alert::builder().label("namespace", "ns-a").build()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_min_backoff(Duration::from_millis(1))
            .with_max_backoff(Duration::from_millis(2))
    }

    mod build_tests {
        use super::*;

        const CONFIG: &str = r"
global:
  dog_api_url: http://dog.example/api
route:
  receiver: default
  routes:
    - receiver: bot1
      matchers:
        - name: namespace
          value: ns-a
    - receiver: chat
receivers:
  - name: default
  - name: bot1
    webhook_configs:
      - url: http://example/hook
      - url: http://example/hook2
        send_resolved: false
  - name: chat
    dog_configs:
      - task_id: 5
    yach_configs:
      - access_token: t
        secret: s
  - name: unused
    webhook_configs:
      - url: http://example/unused
";

        #[test]
        fn builds_referenced_receivers_only() {
            let config = Config::load(CONFIG).unwrap();
            let pipeline = Pipeline::build(&config).unwrap();
            assert_eq!(pipeline.receiver_names(), vec!["bot1", "chat", "default"]);
            assert!(pipeline.integrations("unused").is_none());
        }

        #[test]
        fn integration_kinds_and_flags() {
            let config = Config::load(CONFIG).unwrap();
            let pipeline = Pipeline::build(&config).unwrap();

            let bot1 = pipeline.integrations("bot1").unwrap();
            assert_eq!(bot1.len(), 2);
            assert!(bot1[0].send_resolved());
            assert!(!bot1[1].send_resolved());
            assert_eq!(bot1[1].to_string(), "webhook[1]");

            let chat: Vec<&str> = pipeline
                .integrations("chat")
                .unwrap()
                .iter()
                .map(Integration::kind)
                .collect();
            assert_eq!(chat, vec!["dog", "yach"]);

            let default: Vec<&str> = pipeline
                .integrations("default")
                .unwrap()
                .iter()
                .map(Integration::kind)
                .collect();
            assert_eq!(default, vec!["log"]);
        }

        #[test]
        fn dog_skipped_without_api_url() {
            let text = CONFIG.replace("  dog_api_url: http://dog.example/api\n", "  http_timeout: 5s\n");
            let config = Config::load(&text).unwrap();
            let pipeline = Pipeline::build(&config).unwrap();
            let chat = pipeline.integrations("chat").unwrap();
            assert_eq!(chat.len(), 1);
            assert_eq!(chat[0].kind(), "yach");
        }

        #[test]
        fn invalid_integration_fails_build() {
            let text = CONFIG.replace("http://example/hook2", "not a url");
            let config = Config::load(&text).unwrap();
            assert!(matches!(
                Pipeline::build(&config),
                Err(NotifyError::InvalidIntegration { .. })
            ));
        }
    }

    mod exec_tests {
        use super::*;

        #[tokio::test]
        async fn unknown_receiver() {
            let pipeline = Pipeline::default();
            let err = pipeline.exec(&ctx("nobody"), &[alert()]).await.unwrap_err();
            assert!(matches!(err, NotifyError::ReceiverNotFound { .. }));
        }

        #[tokio::test]
        async fn failing_integration_does_not_block_others() {
            let ok = Arc::new(Counting::default());
            let bad = Arc::new(Counting {
                fail: true,
                ..Counting::default()
            });
            let mut receivers = HashMap::new();
            receivers.insert(
                "bot1".to_string(),
                vec![
                    Integration::new("webhook", 0, true, bad.clone()),
                    Integration::new("webhook", 1, true, ok.clone()),
                ],
            );
            let pipeline = Pipeline::from_integrations(receivers).with_retry(fast_retry());

            let err = pipeline.exec(&ctx("bot1"), &[alert()]).await.unwrap_err();
            match err {
                NotifyError::Multiple { errors, retryable } => {
                    assert_eq!(errors.len(), 1);
                    assert!(errors[0].starts_with("webhook[0]"));
                    assert!(retryable);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(bad.calls.load(Ordering::SeqCst), 3);
            assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn delivers_to_webhook() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;

            let text = format!(
                "route:\n  receiver: bot1\nreceivers:\n  - name: bot1\n    webhook_configs:\n      - url: {}/hook\n",
                server.uri()
            );
            let pipeline = Pipeline::build(&Config::load(&text).unwrap()).unwrap();
            pipeline.exec(&ctx("bot1"), &[alert()]).await.unwrap();
        }
    }
}
