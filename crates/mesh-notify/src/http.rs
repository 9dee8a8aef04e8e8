//! Shared HTTP plumbing for integrations.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::{NotifyError, Result};

/// Builds a client with a bounded request timeout.
pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NotifyError::InvalidIntegration {
            integration: "http".to_string(),
            reason: e.to_string(),
        })
}

/// Statuses a target answers with on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    /// Any 2xx status.
    Success,
    /// Exactly `200 OK`.
    Ok,
}

impl Expect {
    fn accepts(self, status: reqwest::StatusCode) -> bool {
        match self {
            Self::Success => status.is_success(),
            Self::Ok => status == reqwest::StatusCode::OK,
        }
    }
}

/// Posts a JSON body and returns the response text of an accepted answer.
///
/// The body is read to completion on every path so the connection can be
/// reused; any other status is a retryable error.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: reqwest::Url,
    body: &T,
    expect: Expect,
) -> Result<String> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if !expect.accepts(status) {
        debug!(status = status.as_u16(), response = %text, "notification rejected");
        return Err(NotifyError::Status {
            status: status.as_u16(),
        });
    }
    Ok(text)
}

/// Parses a URL from configuration.
pub(crate) fn parse_url(integration: &str, raw: &str) -> Result<reqwest::Url> {
    reqwest::Url::parse(raw).map_err(|e| NotifyError::InvalidIntegration {
        integration: integration.to_string(),
        reason: format!("invalid url: {e}"),
    })
}
