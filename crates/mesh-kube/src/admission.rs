//! Event admission.
//!
//! Noisy reasons and components go into a cuckoo filter; significant reasons
//! go into an exact allow set that is consulted first and always wins. Rules
//! are layered in order (defaults, then per-cluster blocks, then per-cluster
//! exceptions) and a later rule for the same key replaces an earlier one.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::cuckoo::CuckooFilter;
use crate::event::RawEvent;

/// Reasons and components dropped unless explicitly allowed.
pub const DEFAULT_BLOCKED: &[&str] = &[
    // Normal
    "SuccessfulCreate",
    "Pulled",
    "Created",
    "Started",
    "Scheduled",
    "Pulling",
    "SuccessfulDelete",
    "SawCompletedJob",
    "SandboxChanged",
    "Provisioning",
    "SuccessfulAttachVolume",
    "ProvisioningSucceeded",
    "ExternalProvisioning",
    "NodeReady",
    // Warning
    "PipelineRunFailed",
    // Components
    "pipeline-controller",
    "taskrun-controller",
];

/// Reasons always admitted.
pub const DEFAULT_ALLOWED: &[&str] = &[
    // Normal
    "TaintManagerEviction",
    "ScalingReplicaSet",
    "Killing",
    "BackOff",
    "NodeNotReady",
    // Warning
    "FailedScheduling",
    "FailedMount",
    "FailedCreatePodSandBox",
    "DeadlineExceeded",
    "Failed",
    "BackoffLimitExceeded",
    "Unhealthy",
    "FailedComputeMetricsReplicas",
    "FailedGetResourceMetric",
    "FailedCreatePodContainer",
    "FailedGetScale",
    "FailedSync",
    "FailedToUpdateEndpoint",
];

const FILTER_CAPACITY: usize = 1024;

/// Decides which events enter the pipeline.
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    blocked: CuckooFilter,
    allowed: HashSet<String>,
    start: DateTime<Utc>,
}

impl AdmissionFilter {
    /// Creates a filter with the default rules that treats events from
    /// before `start` as replays.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        let mut filter = Self {
            blocked: CuckooFilter::with_capacity(FILTER_CAPACITY),
            allowed: HashSet::new(),
            start,
        };
        for key in DEFAULT_BLOCKED {
            filter.block(key);
        }
        for key in DEFAULT_ALLOWED {
            filter.allow(key);
        }
        filter
    }

    /// Creates a filter with the defaults plus per-cluster rules.
    #[must_use]
    pub fn with_rules(start: DateTime<Utc>, filters: &[String], not_filters: &[String]) -> Self {
        let mut filter = Self::new(start);
        for key in filters {
            filter.block(key);
        }
        for key in not_filters {
            filter.allow(key);
        }
        filter
    }

    /// Drops events with this reason or component.
    pub fn block(&mut self, key: &str) {
        self.allowed.remove(key);
        if !self.blocked.insert(key) {
            tracing::warn!(key, "admission block list is full");
        }
    }

    /// Admits events with this reason or component regardless of blocks.
    pub fn allow(&mut self, key: &str) {
        self.allowed.insert(key.to_string());
    }

    /// Start of the watch; earlier events are replays.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Whether `key` is currently blocked.
    #[must_use]
    pub fn is_blocked(&self, key: &str) -> bool {
        !key.is_empty() && !self.allowed.contains(key) && self.blocked.contains(key)
    }

    /// Whether the event happened before the watch started.
    #[must_use]
    pub fn is_stale(&self, event: &RawEvent) -> bool {
        let before = |t: Option<DateTime<Utc>>| t.is_some_and(|t| t < self.start);
        before(event.last_timestamp) || before(event.event_time)
    }

    /// Returns true if the event must be dropped.
    #[must_use]
    pub fn filter(&self, event: &RawEvent) -> bool {
        self.is_stale(event) || self.is_blocked(&event.component) || self.is_blocked(&event.reason)
    }
}
