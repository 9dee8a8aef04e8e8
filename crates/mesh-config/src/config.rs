//! The routing configuration document.
//!
//! This is the hand-off artifact produced from `Receiver` and `EventRoute`
//! resources and consumed by the reload coordinator. It serializes to YAML:
//!
//! ```yaml
//! global:
//!   http_timeout: 10s
//! route:
//!   receiver: default
//!   routes:
//!     - receiver: bot1
//!       matchers:
//!         - name: namespace
//!           value: ns-a
//! receivers:
//!   - name: default
//!   - name: bot1
//!     webhook_configs:
//!       - url: http://example/hook
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use mesh_alerts::{Matchers, is_valid_label_name};
use serde::{Deserialize, Serialize};

use crate::duration;
use crate::error::{ConfigError, Result};

/// Name of the fallback receiver at the root of every generated tree.
pub const DEFAULT_RECEIVER: &str = "default";
/// Group wait used when a route and its ancestors leave it unset.
pub const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);
/// Group interval used when a route and its ancestors leave it unset.
pub const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Repeat interval used when a route and its ancestors leave it unset.
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

const DEFAULT_YACH_API_URL: &str = "https://yach-oapi.zhiyinlou.com/robot/send";

/// A complete routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Settings shared by every integration.
    #[serde(default)]
    pub global: GlobalConfig,
    /// The root of the route tree.
    pub route: RouteConfig,
    /// The receiver table.
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
    /// The text this configuration was parsed from.
    #[serde(skip)]
    original: String,
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.global == other.global && self.route == other.route && self.receivers == other.receivers
    }
}

impl Config {
    /// Builds a configuration from parts, rendering its text form.
    pub fn new(global: GlobalConfig, route: RouteConfig, receivers: Vec<ReceiverConfig>) -> Result<Self> {
        let mut config = Self {
            global,
            route,
            receivers,
            original: String::new(),
        };
        config.validate()?;
        config.original = serde_yaml::to_string(&config)?;
        Ok(config)
    }

    /// Parses and validates a YAML document.
    pub fn load(text: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        config.original = text.to_string();
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::load(&text)
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The text this configuration was parsed from.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// 48 bits of a blake3 digest of the original text, as a gauge value.
    #[must_use]
    pub fn hash(&self) -> f64 {
        let digest = blake3::hash(self.original.as_bytes());
        let b = digest.as_bytes();
        let value = b[..6].iter().fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte));
        value as f64
    }

    /// Looks up a receiver by name.
    #[must_use]
    pub fn receiver(&self, name: &str) -> Option<&ReceiverConfig> {
        self.receivers.iter().find(|r| r.name == name)
    }

    /// Names of the receivers referenced by at least one route.
    #[must_use]
    pub fn referenced_receivers(&self) -> BTreeSet<&str> {
        fn walk<'a>(route: &'a RouteConfig, out: &mut BTreeSet<&'a str>) {
            if !route.receiver.is_empty() {
                out.insert(route.receiver.as_str());
            }
            for child in &route.routes {
                walk(child, out);
            }
        }
        let mut out = BTreeSet::new();
        walk(&self.route, &mut out);
        out
    }

    /// Names referenced by routes that have no receiver entry.
    ///
    /// Alerts routed to them are undeliverable.
    #[must_use]
    pub fn unknown_receivers(&self) -> Vec<&str> {
        self.referenced_receivers()
            .into_iter()
            .filter(|name| self.receiver(name).is_none())
            .collect()
    }

    /// The longest repeat interval anywhere in the tree.
    #[must_use]
    pub fn max_repeat_interval(&self) -> Duration {
        fn walk(route: &RouteConfig, inherited: Duration) -> Duration {
            let own = route.repeat_interval.unwrap_or(inherited);
            route.routes.iter().map(|c| walk(c, own)).fold(own, Duration::max)
        }
        walk(&self.route, DEFAULT_REPEAT_INTERVAL)
    }

    fn validate(&self) -> Result<()> {
        if self.route.receiver.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "root route must specify a receiver".to_string(),
            });
        }
        if !self.route.matchers.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "root route must not have matchers".to_string(),
            });
        }

        let mut names = HashSet::new();
        for receiver in &self.receivers {
            if receiver.name.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "receiver name must not be empty".to_string(),
                });
            }
            if !names.insert(receiver.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate receiver name {:?}", receiver.name),
                });
            }
            for webhook in &receiver.webhook_configs {
                if webhook.url.is_empty() {
                    return Err(ConfigError::Invalid {
                        reason: format!("receiver {:?}: webhook url must not be empty", receiver.name),
                    });
                }
            }
        }

        self.route.validate()
    }
}

/// Settings shared by every integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Endpoint of the yach robot API.
    pub yach_api_url: String,
    /// Endpoint of the dog robot API; dog integrations are skipped if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dog_api_url: Option<String>,
    /// Base URL linked from chat messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_url: Option<String>,
    /// Timeout of every outbound notification request.
    #[serde(with = "duration::required")]
    pub http_timeout: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            yach_api_url: DEFAULT_YACH_API_URL.to_string(),
            dog_api_url: None,
            console_url: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Labels an aggregation group is keyed on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GroupBy {
    /// Group by the full label set.
    #[default]
    All,
    /// Group by the listed labels only.
    Labels(Vec<String>),
}

/// One node of the route tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Stable identity among siblings. Group keys of this subtree are derived
    /// from it; an empty id falls back to the node's position.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Receiver for alerts ending at this node; empty inherits the parent's.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub receiver: String,
    /// Labels to group by. Empty groups by the full label set; `...` also
    /// groups by every label.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Initial delay before the first notification of a group.
    #[serde(with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<Duration>,
    /// Delay between notifications of a changed group.
    #[serde(with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<Duration>,
    /// Delay before re-sending an unchanged group.
    #[serde(with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<Duration>,
    /// Conjunctive label matchers.
    #[serde(skip_serializing_if = "Matchers::is_empty")]
    pub matchers: Matchers,
    /// Whether later siblings are still evaluated after this node matches.
    #[serde(
        rename = "continue",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub continue_matching: bool,
    /// Child routes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

impl RouteConfig {
    /// Creates a route delivering to `receiver`.
    #[must_use]
    pub fn new(receiver: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            ..Self::default()
        }
    }

    /// The parsed group-by setting.
    #[must_use]
    pub fn group_by(&self) -> GroupBy {
        if self.group_by.is_empty() || self.group_by.iter().any(|l| l == "...") {
            GroupBy::All
        } else {
            GroupBy::Labels(self.group_by.clone())
        }
    }

    fn validate(&self) -> Result<()> {
        for label in &self.group_by {
            if label != "..." && !is_valid_label_name(label) {
                return Err(ConfigError::Invalid {
                    reason: format!("invalid group_by label {label:?}"),
                });
            }
        }
        if self.group_by.iter().any(|l| l == "...") && self.group_by.len() > 1 {
            return Err(ConfigError::Invalid {
                reason: "group_by '...' must be the only entry".to_string(),
            });
        }
        if self.group_interval == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                reason: "group_interval must be positive".to_string(),
            });
        }
        if self.repeat_interval == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                reason: "repeat_interval must be positive".to_string(),
            });
        }
        let mut ids = HashSet::new();
        for child in &self.routes {
            if !child.id.is_empty() && !ids.insert(child.id.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate route id {:?}", child.id),
                });
            }
        }
        self.routes.iter().try_for_each(Self::validate)
    }
}

/// A named notification target with its integrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Unique receiver name.
    pub name: String,
    /// Generic webhook integrations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_configs: Vec<WebhookConfig>,
    /// Dog robot integrations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dog_configs: Vec<DogConfig>,
    /// Yach robot integrations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub yach_configs: Vec<YachConfig>,
}

impl ReceiverConfig {
    /// Creates a receiver with no integrations.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of configured integrations.
    #[must_use]
    pub fn integration_count(&self) -> usize {
        self.webhook_configs.len() + self.dog_configs.len() + self.yach_configs.len()
    }
}

/// A webhook integration posting Alertmanager-compatible JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL.
    pub url: String,
    /// Maximum alerts per message; 0 sends all.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_alerts: usize,
    /// Whether resolved-only batches are sent.
    #[serde(default = "default_true")]
    pub send_resolved: bool,
}

/// A dog robot integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DogConfig {
    /// Robot task identifier.
    pub task_id: i64,
    /// Maximum alerts per message; 0 sends all.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_alerts: usize,
    /// Whether resolved-only batches are sent.
    #[serde(default = "default_true")]
    pub send_resolved: bool,
}

/// A yach robot integration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YachConfig {
    /// Robot access token.
    pub access_token: String,
    /// Signing secret; requests are unsigned when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
    /// Keyword the robot requires in every message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyword: String,
    /// Whether resolved-only batches are sent.
    #[serde(default = "default_true")]
    pub send_resolved: bool,
}

impl std::fmt::Debug for YachConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YachConfig")
            .field("access_token", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("keyword", &self.keyword)
            .field("send_resolved", &self.send_resolved)
            .finish()
    }
}

const fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &usize) -> bool {
    *n == 0
}
