//! Yach robot integration.
//!
//! Every request is signed: `sign = base64(HMAC-SHA256(secret, "<ts>\n<secret>"))`
//! where `ts` is the current epoch time in milliseconds. The signature,
//! timestamp and access token travel as query parameters. The robot answers
//! HTTP 200 with `{code, msg}` even for rejected messages, so delivery only
//! succeeds when `code == 200`.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use mesh_alerts::Alert;
use mesh_config::YachConfig;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::error::{NotifyError, Result};
use crate::http;
use crate::notifier::{Notifier, NotifyContext};

type HmacSha256 = Hmac<Sha256>;

/// Application-level success code.
const SUCCESS_CODE: i64 = 200;
const TITLE: &str = "Cluster alert";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Computes the request signature for `timestamp_ms`.
pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        NotifyError::InvalidIntegration {
            integration: "yach".to_string(),
            reason: e.to_string(),
        }
    })?;
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Message body accepted by the robot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YachMessage {
    /// Always `markdown`.
    pub msgtype: String,
    /// Rendered content.
    pub markdown: Markdown,
    /// Mentions.
    pub at: At,
}

/// Markdown content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markdown {
    /// Message title.
    pub title: String,
    /// Message body.
    pub text: String,
}

/// Mentions attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct At {
    /// Mobile numbers to mention.
    pub at_mobiles: Vec<String>,
    /// Owner work codes to mention.
    pub at_work_codes: Vec<String>,
    /// Mention everyone.
    pub is_at_all: bool,
}

#[derive(Debug, Deserialize)]
struct YachResponse {
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Delivers batches to a yach robot.
#[derive(Debug, Clone)]
pub struct YachNotifier {
    url: reqwest::Url,
    access_token: String,
    secret: String,
    keyword: String,
    console_url: Option<reqwest::Url>,
    client: reqwest::Client,
}

impl YachNotifier {
    /// Builds the notifier.
    ///
    /// `api_url` is the robot endpoint; `console_url`, when set, adds a
    /// detail link to every alert.
    pub fn new(
        config: &YachConfig,
        api_url: &str,
        console_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        if config.access_token.is_empty() {
            return Err(NotifyError::InvalidIntegration {
                integration: "yach".to_string(),
                reason: "access token is empty".to_string(),
            });
        }
        Ok(Self {
            url: http::parse_url("yach", api_url)?,
            access_token: config.access_token.clone(),
            secret: config.secret.clone(),
            keyword: config.keyword.clone(),
            console_url: console_url.map(|u| http::parse_url("yach", u)).transpose()?,
            client: http::client(timeout)?,
        })
    }

    fn signed_url(&self, timestamp_ms: i64) -> Result<reqwest::Url> {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            if !self.secret.is_empty() {
                let signature = sign(&self.secret, timestamp_ms)?;
                query
                    .append_pair("timestamp", &timestamp_ms.to_string())
                    .append_pair("sign", &signature);
            }
            query.append_pair("access_token", &self.access_token);
        }
        Ok(url)
    }

    /// Renders a batch into a robot message.
    #[must_use]
    pub fn render(&self, alerts: &[Alert]) -> YachMessage {
        let mut text = String::new();
        let mut work_codes = BTreeSet::new();

        for (index, alert) in alerts.iter().enumerate() {
            render_alert(&mut text, index, alert, self.console_url.as_ref());
            let code = alert.label("workcode");
            if !code.is_empty() {
                work_codes.insert(code.to_string());
            }
        }

        if !self.keyword.is_empty() && !text.contains(&self.keyword) {
            let _ = write!(text, "\n\n{}", self.keyword);
        }

        YachMessage {
            msgtype: "markdown".to_string(),
            markdown: Markdown {
                title: TITLE.to_string(),
                text,
            },
            at: At {
                at_work_codes: work_codes.into_iter().collect(),
                ..At::default()
            },
        }
    }
}

fn render_alert(out: &mut String, index: usize, alert: &Alert, console_url: Option<&reqwest::Url>) {
    let reason = alert.label("event_reason");
    let is_event = !reason.is_empty();

    if is_event {
        let _ = writeln!(out, "\n## Event notification\n\n### Event {index}: {reason}");
    } else {
        let heading = if alert.ends_at.is_some() {
            "Alert resolved"
        } else {
            "Alert firing"
        };
        let _ = writeln!(out, "\n## {heading}\n\n### Alert {index}: {}", alert.label("alertname"));
    }

    let reason_text = alert.label("reason_text");
    if !reason_text.is_empty() {
        let _ = writeln!(out, "\n### Reason: {reason_text}");
    }
    let _ = writeln!(out, "### Severity: {}", alert.label("severity"));
    let _ = writeln!(out, "### Kind: {}", alert.label("obj_kind"));

    if let Some(message) = alert.annotations.get("message").filter(|m| !m.is_empty()) {
        let _ = writeln!(out, "### Message:\n> {message}");
    }

    let _ = writeln!(out, "### Labels:\n> cluster: {}", alert.label("cluster"));
    let node = match alert.label("node") {
        "" => match alert.label("source_host") {
            "eci" => "",
            host => host,
        },
        node => node,
    };
    for (name, value) in [
        ("node", node),
        ("namespace", alert.label("namespace")),
        ("pod", alert.label("pod")),
        ("obj_name", alert.label("obj_name")),
        ("deployment", alert.label("deployment")),
    ] {
        if !value.is_empty() {
            let _ = writeln!(out, "> {name}: {value}");
        }
    }

    let started = format_time(alert.starts_at);
    let _ = writeln!(out, "\n### Started: {started}");
    if let Some(ends_at) = alert.ends_at.filter(|_| !is_event) {
        let _ = writeln!(out, "\n### Resolved: {}", format_time(ends_at));
    }

    if let Some(base) = console_url {
        let mut link = base.clone();
        link.query_pairs_mut()
            .append_pair("reason", reason)
            .append_pair("severity", &alert.label("severity").to_lowercase())
            .append_pair("cluster", alert.label("cluster"))
            .append_pair("namespace", alert.label("namespace"))
            .append_pair("obj_kind", alert.label("obj_kind"))
            .append_pair("source_host", alert.label("node"))
            .append_pair("datetime", &started);
        let _ = writeln!(out, "\n### Details: {link}");
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

#[async_trait]
impl Notifier for YachNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<()> {
        let message = self.render(alerts);
        let url = self.signed_url(Utc::now().timestamp_millis())?;

        let body = http::post_json(&self.client, url, &message, http::Expect::Ok).await?;
        let response: YachResponse = serde_json::from_str(&body)?;
        if response.code != SUCCESS_CODE {
            return Err(NotifyError::Rejected {
                code: response.code,
                message: response.msg,
            });
        }

        debug!(receiver = %ctx.receiver, group = %ctx.group_key, alerts = alerts.len(), "yach message delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_alerts::LabelSet;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(keyword: &str) -> YachConfig {
        YachConfig {
            access_token: "token-1".to_string(),
            secret: "s3cret".to_string(),
            keyword: keyword.to_string(),
            send_resolved: true,
        }
    }

    fn notifier(api_url: &str, keyword: &str, console: Option<&str>) -> YachNotifier {
        YachNotifier::new(&config(keyword), api_url, console, Duration::from_secs(5)).unwrap()
    }

    fn event(reason: &str) -> Alert {
        let t = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Alert::builder()
            .label("cluster", "prod")
            .label("namespace", "ns-a")
            .label("obj_kind", "Pod")
            .label("pod", "web-7f9c6d5b4-abcde")
            .label("severity", "Warning")
            .label("event_reason", reason)
            .label("source_host", "node-1")
            .label("workcode", "w001")
            .annotation("message", "Back-off restarting failed container")
            .starts_at(t)
            .ends_at(t)
            .build()
    }

    fn ctx() -> NotifyContext {
        NotifyContext::new("pager", "{}:{}", LabelSet::new())
    }

    mod sign_tests {
        use super::*;

        #[test]
        fn deterministic_for_same_inputs() {
            assert_eq!(sign("s3cret", 1000).unwrap(), sign("s3cret", 1000).unwrap());
            assert_ne!(sign("s3cret", 1000).unwrap(), sign("s3cret", 1001).unwrap());
        }

        #[test]
        fn base64_of_sha256_mac() {
            let signature = sign("s3cret", 1_700_000_000_000).unwrap();
            let raw = STANDARD.decode(signature).unwrap();
            assert_eq!(raw.len(), 32);
        }

        #[test]
        fn query_carries_signature() {
            let n = notifier("http://robot/send", "", None);
            let url = n.signed_url(42).unwrap();
            let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
            assert_eq!(pairs[0], ("timestamp".to_string(), "42".to_string()));
            assert_eq!(pairs[1], ("sign".to_string(), sign("s3cret", 42).unwrap()));
            assert_eq!(pairs[2], ("access_token".to_string(), "token-1".to_string()));
        }

        #[test]
        fn empty_secret_sends_token_only() {
            let mut cfg = config("");
            cfg.secret.clear();
            let n = YachNotifier::new(&cfg, "http://robot/send", None, Duration::from_secs(1)).unwrap();
            let url = n.signed_url(42).unwrap();
            assert_eq!(url.query(), Some("access_token=token-1"));
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn event_heading_and_fields() {
            let msg = notifier("http://robot/send", "", None).render(&[event("BackOff")]);
            let text = &msg.markdown.text;
            assert_eq!(msg.msgtype, "markdown");
            assert!(text.contains("## Event notification"));
            assert!(text.contains("### Event 0: BackOff"));
            assert!(text.contains("> Back-off restarting failed container"));
            assert!(text.contains("> node: node-1"));
            assert!(text.contains("> pod: web-7f9c6d5b4-abcde"));
            assert!(text.contains("### Started: 2024-05-01 10:00:00"));
            assert!(!text.contains("### Resolved"));
            assert_eq!(msg.at.at_work_codes, vec!["w001".to_string()]);
            assert!(!msg.at.is_at_all);
        }

        #[test]
        fn firing_and_resolved_headings() {
            let n = notifier("http://robot/send", "", None);
            let firing = Alert::builder().label("alertname", "HighLoad").build();
            assert!(n.render(&[firing.clone()]).markdown.text.contains("## Alert firing"));

            let mut resolved = firing;
            resolved.ends_at = Some(resolved.starts_at);
            let text = n.render(&[resolved]).markdown.text;
            assert!(text.contains("## Alert resolved"));
            assert!(text.contains("### Resolved:"));
        }

        #[test]
        fn eci_source_host_hidden() {
            let mut alert = event("BackOff");
            alert.labels.insert("source_host".to_string(), "eci".to_string());
            let text = notifier("http://robot/send", "", None).render(&[alert]).markdown.text;
            assert!(!text.contains("> node:"));
        }

        #[test]
        fn keyword_appended_once() {
            let n = notifier("http://robot/send", "[k8s]", None);
            let text = n.render(&[event("BackOff")]).markdown.text;
            assert!(text.ends_with("[k8s]"));
            assert_eq!(text.matches("[k8s]").count(), 1);
        }

        #[test]
        fn detail_link_from_console() {
            let n = notifier("http://robot/send", "", Some("https://console.example/events"));
            let text = n.render(&[event("BackOff")]).markdown.text;
            assert!(text.contains("### Details: https://console.example/events?reason=BackOff&severity=warning"));
            assert!(text.contains("datetime=2024-05-01+10%3A00%3A00"));
        }
    }

    mod delivery_tests {
        use super::*;

        #[tokio::test]
        async fn success_requires_code_200() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/robot/send"))
                .and(query_param("access_token", "token-1"))
                .and(body_partial_json(serde_json::json!({"msgtype": "markdown"})))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 200, "msg": "ok"})))
                .expect(1)
                .mount(&server)
                .await;

            let n = notifier(&format!("{}/robot/send", server.uri()), "", None);
            n.notify(&ctx(), &[event("BackOff")]).await.unwrap();
        }

        #[tokio::test]
        async fn application_error_is_rejected() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 310000, "msg": "keywords not in content"})),
                )
                .mount(&server)
                .await;

            let n = notifier(&server.uri(), "", None);
            let err = n.notify(&ctx(), &[event("BackOff")]).await.unwrap_err();
            assert!(matches!(err, NotifyError::Rejected { code: 310_000, .. }));
            assert!(err.retryable());
        }

        #[tokio::test]
        async fn http_error_status() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(502))
                .mount(&server)
                .await;

            let n = notifier(&server.uri(), "", None);
            let err = n.notify(&ctx(), &[event("BackOff")]).await.unwrap_err();
            assert!(matches!(err, NotifyError::Status { status: 502 }));
        }

        #[tokio::test]
        async fn non_200_success_status_is_rejected() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({"code": 200, "msg": "ok"})))
                .mount(&server)
                .await;

            let n = notifier(&server.uri(), "", None);
            let err = n.notify(&ctx(), &[event("BackOff")]).await.unwrap_err();
            assert!(matches!(err, NotifyError::Status { status: 202 }));
        }

        #[test]
        fn empty_token_rejected() {
            let mut cfg = config("");
            cfg.access_token.clear();
            let res = YachNotifier::new(&cfg, "http://robot/send", None, Duration::from_secs(1));
            assert!(matches!(res, Err(NotifyError::InvalidIntegration { .. })));
        }
    }
}
