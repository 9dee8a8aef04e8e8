//! Core alert types.
//!
//! - [`LabelSet`]: ordered label map identifying an alert
//! - [`Fingerprint`]: stable hash of a label set, the store key
//! - [`Alert`]: labels, annotations and the active window of one alert

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// An ordered set of label name/value pairs.
///
/// Ordered so that iteration, hashing and rendering are deterministic.
pub type LabelSet = BTreeMap<String, String>;

/// Stable 64-bit hash of an alert's label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Computes the fingerprint of a label set.
    ///
    /// Names and values are fed to blake3 in label order, each terminated by
    /// `0xff`, a byte that never occurs in UTF-8 text.
    #[must_use]
    pub fn from_labels(labels: &LabelSet) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (name, value) in labels {
            hasher.update(name.as_bytes());
            hasher.update(&[0xff]);
            hasher.update(value.as_bytes());
            hasher.update(&[0xff]);
        }
        let digest = hasher.finalize();
        let mut head = [0_u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        Self(u64::from_be_bytes(head))
    }

    /// Wraps a raw value.
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| AlertError::SerializationError(format!("fingerprint {s:?}: {e}")))
    }
}

/// Whether an alert is still firing at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// The alert window is open or ends in the future.
    Firing,
    /// The alert window has ended.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Free-form context, not part of the identity.
    #[serde(default)]
    pub annotations: LabelSet,
    /// Start of the active window.
    pub starts_at: DateTime<Utc>,
    /// End of the active window; `None` while the alert is open-ended.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Last time the alert was written.
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Creates a builder for an alert starting now.
    #[must_use]
    pub fn builder() -> AlertBuilder {
        AlertBuilder::new()
    }

    /// Returns the fingerprint of the label set.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_labels(&self.labels)
    }

    /// Returns true if the window has ended at `now`.
    #[must_use]
    pub fn resolved_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|ends| ends <= now)
    }

    /// Returns true if the window has ended.
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.resolved_at(Utc::now())
    }

    /// Returns the status at `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> AlertStatus {
        if self.resolved_at(now) {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        }
    }

    /// Returns the label value, or the empty string when absent.
    #[must_use]
    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map_or("", String::as_str)
    }

    /// Returns true if `incoming` should be merged into `self` rather than
    /// replacing it: its start or its end lies within this alert's window.
    ///
    /// Window bounds are inclusive and an open window extends forever.
    #[must_use]
    pub fn overlaps(&self, incoming: &Self) -> bool {
        let within = |t: DateTime<Utc>| {
            t >= self.starts_at && self.ends_at.is_none_or(|ends| t <= ends)
        };
        within(incoming.starts_at) || incoming.ends_at.is_some_and(within)
    }

    /// Merges an incoming alert with the same fingerprint into this one.
    ///
    /// Labels and annotations come from `incoming`. The window is the union
    /// of both, except that an open-ended incoming alert reopens the window.
    #[must_use]
    pub fn merge(&self, incoming: &Self) -> Self {
        let starts_at = self.starts_at.min(incoming.starts_at);
        let ends_at = incoming
            .ends_at
            .map(|new| self.ends_at.map_or(new, |old| old.max(new)));
        Self {
            labels: incoming.labels.clone(),
            annotations: incoming.annotations.clone(),
            starts_at,
            ends_at,
            updated_at: self.updated_at.max(incoming.updated_at),
        }
    }

    /// Checks the alert is storable.
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(AlertError::InvalidAlert {
                reason: "at least one label is required".to_string(),
            });
        }
        if let Some(ends) = self.ends_at {
            if ends < self.starts_at {
                return Err(AlertError::InvalidAlert {
                    reason: format!("ends_at {ends} is before starts_at {}", self.starts_at),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`Alert`].
#[derive(Debug, Clone)]
pub struct AlertBuilder {
    labels: LabelSet,
    annotations: LabelSet,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
}

impl AlertBuilder {
    fn new() -> Self {
        Self {
            labels: LabelSet::new(),
            annotations: LabelSet::new(),
            starts_at: Utc::now(),
            ends_at: None,
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Replaces all labels.
    #[must_use]
    pub fn labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name.into(), value.into());
        self
    }

    /// Sets the window start.
    #[must_use]
    pub const fn starts_at(mut self, at: DateTime<Utc>) -> Self {
        self.starts_at = at;
        self
    }

    /// Sets the window end.
    #[must_use]
    pub const fn ends_at(mut self, at: DateTime<Utc>) -> Self {
        self.ends_at = Some(at);
        self
    }

    /// Builds the alert.
    #[must_use]
    pub fn build(self) -> Alert {
        Alert {
            labels: self.labels,
            annotations: self.annotations,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            updated_at: Utc::now(),
        }
    }
}
