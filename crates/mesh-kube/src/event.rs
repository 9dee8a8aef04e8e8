//! Cluster events and their conversion to alerts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use mesh_alerts::Alert;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{error, info, warn};

/// Pod names created through a replica set: `<workload>-<hash>-<suffix>`.
static POD_WORKLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)-[a-fA-F0-9]{1,28}-\w{5}$").unwrap_or_else(|_| unreachable!()));

/// A cluster event as observed by a watch loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawEvent {
    /// Name of the cluster the event came from.
    pub cluster: String,
    /// Machine-readable reason, e.g. `BackOff`.
    pub reason: String,
    /// `Normal`, `Warning` or `Error`.
    pub event_type: String,
    /// Kind of the involved object.
    pub kind: String,
    /// Name of the involved object.
    pub name: String,
    /// Namespace of the involved object.
    pub namespace: String,
    /// Reporting component.
    pub component: String,
    /// Reporting host.
    pub host: String,
    /// First occurrence.
    pub first_timestamp: Option<DateTime<Utc>>,
    /// Most recent occurrence.
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Occurrence time of events without first/last timestamps.
    pub event_time: Option<DateTime<Utc>>,
    /// Human-readable description.
    pub message: String,
    /// Number of occurrences.
    pub count: i32,
}

impl RawEvent {
    /// Extracts the fields of a core `Event`.
    #[must_use]
    pub fn from_event(cluster: &str, event: &Event) -> Self {
        let object = &event.involved_object;
        let source = event.source.as_ref();
        Self {
            cluster: cluster.to_string(),
            reason: event.reason.clone().unwrap_or_default(),
            event_type: event.type_.clone().unwrap_or_default(),
            kind: object.kind.clone().unwrap_or_default(),
            name: object.name.clone().unwrap_or_default(),
            namespace: object
                .namespace
                .clone()
                .or_else(|| event.metadata.namespace.clone())
                .unwrap_or_default(),
            component: source
                .and_then(|s| s.component.clone())
                .or_else(|| event.reporting_component.clone())
                .unwrap_or_default(),
            host: source.and_then(|s| s.host.clone()).unwrap_or_default(),
            first_timestamp: event.first_timestamp.as_ref().map(|t| t.0),
            last_timestamp: event.last_timestamp.as_ref().map(|t| t.0),
            event_time: event.event_time.as_ref().map(|t| t.0),
            message: event.message.clone().unwrap_or_default(),
            count: event.count.unwrap_or(1),
        }
    }

    /// When the event last happened, if it says.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp.or(self.event_time)
    }

    /// Logs the event at a level matching its type.
    pub fn log(&self) {
        match self.event_type.as_str() {
            "Warning" => warn!(
                cluster = %self.cluster,
                namespace = %self.namespace,
                kind = %self.kind,
                name = %self.name,
                reason = %self.reason,
                message = %self.message,
                "cluster event"
            ),
            "Error" => error!(
                cluster = %self.cluster,
                namespace = %self.namespace,
                kind = %self.kind,
                name = %self.name,
                reason = %self.reason,
                message = %self.message,
                "cluster event"
            ),
            _ => info!(
                cluster = %self.cluster,
                namespace = %self.namespace,
                kind = %self.kind,
                name = %self.name,
                reason = %self.reason,
                message = %self.message,
                "cluster event"
            ),
        }
    }

    /// Converts the event into an instant alert.
    ///
    /// The alert starts and ends at the event's timestamp, so it is resolved
    /// as soon as it is stored.
    #[must_use]
    pub fn to_alert(&self, enrichment: &Enrichment) -> Alert {
        let at = self.timestamp().unwrap_or_else(Utc::now);
        let mut labels = vec![
            ("cluster", self.cluster.as_str()),
            ("namespace", self.namespace.as_str()),
            ("obj_kind", self.kind.as_str()),
            ("obj_name", self.name.as_str()),
            ("severity", self.event_type.as_str()),
            ("event_reason", self.reason.as_str()),
            ("source_host", self.host.as_str()),
        ];
        if let Some(text) = enrichment.reason_text(&self.reason) {
            labels.push(("reason_text", text));
        }

        let workload = match self.kind.as_str() {
            "Pod" => {
                labels.push(("pod", self.name.as_str()));
                workload_of_pod(&self.name)
            }
            "Node" => {
                labels.push(("node", self.name.as_str()));
                None
            }
            "Deployment" => {
                labels.push(("deployment", self.name.as_str()));
                Some(self.name.as_str())
            }
            "ReplicaSet" => {
                labels.push(("replicaset", self.name.as_str()));
                None
            }
            "HorizontalPodAutoscaler" => Some(self.name.strip_suffix("-hpa").unwrap_or(&self.name)),
            _ => None,
        };
        if let Some(code) = workload.and_then(|w| enrichment.workcode(&self.namespace, w)) {
            labels.push(("workcode", code));
        }

        let mut builder = Alert::builder();
        for (name, value) in labels {
            if !value.is_empty() {
                builder = builder.label(name, value);
            }
        }
        if !self.message.is_empty() {
            builder = builder.annotation("message", &self.message);
        }
        builder.starts_at(at).ends_at(at).build()
    }
}

/// Workload name of a pod created through a replica set.
#[must_use]
pub fn workload_of_pod(pod: &str) -> Option<&str> {
    POD_WORKLOAD
        .captures(pod)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Lookup tables that add human-facing labels to alerts.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    reasons: HashMap<String, String>,
    workcodes: HashMap<String, String>,
}

impl Enrichment {
    /// Creates the tables. `workcodes` is keyed by `namespace|workload`.
    #[must_use]
    pub const fn new(reasons: HashMap<String, String>, workcodes: HashMap<String, String>) -> Self {
        Self { reasons, workcodes }
    }

    /// Human-readable text for an event reason.
    #[must_use]
    pub fn reason_text(&self, reason: &str) -> Option<&str> {
        self.reasons.get(reason).map(String::as_str)
    }

    /// Owner work code of a workload.
    #[must_use]
    pub fn workcode(&self, namespace: &str, workload: &str) -> Option<&str> {
        self.workcodes
            .get(&format!("{namespace}|{workload}"))
            .map(String::as_str)
    }
}
