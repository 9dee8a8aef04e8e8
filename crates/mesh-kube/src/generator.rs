//! Routing configuration generated from `Receiver` and `EventRoute`
//! resources.
//!
//! The generator keeps the receiver table and one subtree per event route.
//! After every change, and once both resource kinds have completed their
//! initial listing, it renders the whole configuration and hands it off to
//! the reload coordinator. Unchanged renders are not handed off again.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use mesh_alerts::{Matcher, MatcherSpec, is_valid_label_name};
use mesh_config::{
    Config, DEFAULT_RECEIVER, DogConfig, GlobalConfig, HandOffSender, ReceiverConfig, RouteConfig,
    WebhookConfig, YachConfig, parse_duration,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::crds::{EventRouteSpec, ReceiverSpec, RouteSpec};
use crate::error::{KubeError, Result};

#[derive(Debug, Default)]
struct State {
    receivers: BTreeMap<String, ReceiverConfig>,
    /// Subtrees keyed by `namespace/name`.
    routes: BTreeMap<String, RouteConfig>,
    receivers_synced: bool,
    routes_synced: bool,
}

/// Builds the routing configuration from resource events.
#[derive(Debug)]
pub struct RouteConfigGenerator {
    global: GlobalConfig,
    state: RwLock<State>,
    hand_off: HandOffSender,
}

impl RouteConfigGenerator {
    /// Creates a generator publishing to `hand_off`.
    #[must_use]
    pub fn new(global: GlobalConfig, hand_off: HandOffSender) -> Self {
        Self {
            global,
            state: RwLock::new(State::default()),
            hand_off,
        }
    }

    // ============ Receivers ============

    /// Adds or updates a receiver. A receiver without a usable integration is
    /// removed instead. Returns true if the table changed.
    pub fn append_receiver(&self, name: &str, spec: &ReceiverSpec) -> bool {
        let Some(receiver) = receiver_config(name, spec) else {
            debug!(receiver = name, "receiver has no configured integration, skipping");
            return self.remove_receiver(name);
        };

        {
            let mut state = self.state.write();
            if state.receivers.get(name) == Some(&receiver) {
                return false;
            }
            info!(receiver = name, integrations = receiver.integration_count(), "receiver updated");
            state.receivers.insert(name.to_string(), receiver);
        }
        self.publish();
        true
    }

    /// Removes a receiver. Returns true if it was present.
    pub fn remove_receiver(&self, name: &str) -> bool {
        if self.state.write().receivers.remove(name).is_none() {
            return false;
        }
        info!(receiver = name, "receiver removed");
        self.publish();
        true
    }

    /// Drops every receiver not in `names`, after a relist.
    pub fn retain_receivers(&self, names: &HashSet<String>) -> usize {
        let removed = {
            let mut state = self.state.write();
            let before = state.receivers.len();
            state.receivers.retain(|name, _| names.contains(name));
            before - state.receivers.len()
        };
        if removed > 0 {
            info!(removed, "stale receivers removed");
            self.publish();
        }
        removed
    }

    /// Records that the initial receiver listing is complete.
    pub fn mark_receivers_synced(&self) {
        self.state.write().receivers_synced = true;
        debug!("receivers synced");
        self.publish();
    }

    // ============ Event routes ============

    /// Adds or updates the subtree of an event route. An invalid resource
    /// leaves the previous subtree in place. Returns true if the tree changed.
    pub fn append_event_route(&self, key: &str, spec: &EventRouteSpec) -> Result<bool> {
        let route = route_config(&spec.route).map_err(|reason| KubeError::InvalidRoute {
            key: key.to_string(),
            reason,
        })?;

        {
            let mut state = self.state.write();
            if state.routes.get(key) == Some(&route) {
                return Ok(false);
            }
            info!(route = key, receiver = %route.receiver, "event route updated");
            state.routes.insert(key.to_string(), route);
        }
        self.publish();
        Ok(true)
    }

    /// Removes the subtree of an event route. Returns true if it was present.
    pub fn remove_event_route(&self, key: &str) -> bool {
        if self.state.write().routes.remove(key).is_none() {
            return false;
        }
        info!(route = key, "event route removed");
        self.publish();
        true
    }

    /// Drops every event route not in `keys`, after a relist.
    pub fn retain_event_routes(&self, keys: &HashSet<String>) -> usize {
        let removed = {
            let mut state = self.state.write();
            let before = state.routes.len();
            state.routes.retain(|key, _| keys.contains(key));
            before - state.routes.len()
        };
        if removed > 0 {
            info!(removed, "stale event routes removed");
            self.publish();
        }
        removed
    }

    /// Records that the initial event route listing is complete.
    pub fn mark_event_routes_synced(&self) {
        self.state.write().routes_synced = true;
        debug!("event routes synced");
        self.publish();
    }

    // ============ Output ============

    /// Whether both resource kinds completed their initial listing.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        let state = self.state.read();
        state.receivers_synced && state.routes_synced
    }

    /// Renders the current configuration.
    pub fn snapshot(&self) -> Result<Config> {
        self.build(&self.state.read())
    }

    fn build(&self, state: &State) -> Result<Config> {
        let mut receivers = state.receivers.clone();
        receivers
            .entry(DEFAULT_RECEIVER.to_string())
            .or_insert_with(|| ReceiverConfig::new(DEFAULT_RECEIVER));

        let mut root = RouteConfig::new(DEFAULT_RECEIVER);
        root.routes = state
            .routes
            .iter()
            .map(|(key, route)| RouteConfig {
                id: key.clone(),
                ..route.clone()
            })
            .collect();

        let config = Config::new(self.global.clone(), root, receivers.into_values().collect())?;
        for name in config.unknown_receivers() {
            warn!(receiver = name, "event route references undefined receiver");
        }
        Ok(config)
    }

    /// Hands off the current configuration if both kinds are synced and the
    /// render differs from the last one. The read lock is held throughout so
    /// hand-offs follow mutation order.
    fn publish(&self) -> bool {
        let state = self.state.read();
        if !(state.receivers_synced && state.routes_synced) {
            debug!("resources not synced yet, deferring generation");
            return false;
        }

        let config = match self.build(&state) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "generating routing configuration failed");
                return false;
            }
        };
        let text: Arc<str> = Arc::from(config.original());
        let sent = self.hand_off.send_if_modified(|current| {
            if current.as_deref() == Some(&*text) {
                return false;
            }
            *current = Some(Arc::clone(&text));
            true
        });
        if sent {
            info!(
                receivers = config.receivers.len(),
                routes = config.route.routes.len(),
                "routing configuration generated"
            );
        }
        sent
    }
}

/// Converts a receiver resource, keeping only configured integrations.
/// Returns `None` if nothing is configured.
#[must_use]
pub fn receiver_config(name: &str, spec: &ReceiverSpec) -> Option<ReceiverConfig> {
    let mut receiver = ReceiverConfig::new(name);

    if let Some(webhook) = spec.webhook_config.as_ref().filter(|w| !w.url.is_empty()) {
        receiver.webhook_configs.push(WebhookConfig {
            url: webhook.url.clone(),
            max_alerts: webhook.max_alerts as usize,
            send_resolved: webhook.send_resolved.unwrap_or(true),
        });
    }
    if let Some(dog) = spec.dog_config.as_ref().filter(|d| d.task_id > 0) {
        receiver.dog_configs.push(DogConfig {
            task_id: dog.task_id,
            max_alerts: dog.max_alerts as usize,
            send_resolved: true,
        });
    }
    if let Some(yach) = spec.yach_config.as_ref().filter(|y| !y.access_token.is_empty()) {
        receiver.yach_configs.push(YachConfig {
            access_token: yach.access_token.clone(),
            secret: yach.secret.clone(),
            keyword: yach.keyword.clone(),
            send_resolved: true,
        });
    }

    (receiver.integration_count() > 0).then_some(receiver)
}

/// Converts a route resource and its nested routes.
///
/// Invalid group-by labels and malformed durations are dropped with a
/// warning; an invalid matcher rejects the route. Invalid nested routes are
/// skipped.
pub fn route_config(spec: &RouteSpec) -> std::result::Result<RouteConfig, String> {
    let mut route = RouteConfig::new(spec.receiver.clone());

    for label in &spec.group_by {
        if label == "..." {
            route.group_by = vec![label.clone()];
            break;
        }
        if is_valid_label_name(label) {
            route.group_by.push(label.clone());
        } else {
            warn!(label = %label, "dropping invalid group_by label");
        }
    }

    route.group_wait = lenient_duration("group_wait", spec.group_wait.as_deref(), false);
    route.group_interval = lenient_duration("group_interval", spec.group_interval.as_deref(), true);
    route.repeat_interval = lenient_duration("repeat_interval", spec.repeat_interval.as_deref(), true);

    for m in &spec.matchers {
        let matcher = Matcher::try_from(MatcherSpec {
            name: m.name.clone(),
            value: m.value.clone(),
            regex: m.regex,
        })
        .map_err(|e| e.to_string())?;
        route.matchers.push(matcher);
    }
    route.continue_matching = spec.continue_matching;

    for (index, child) in spec.routes.iter().enumerate() {
        let parsed = serde_json::from_value::<RouteSpec>(child.clone())
            .map_err(|e| e.to_string())
            .and_then(|child| route_config(&child));
        match parsed {
            Ok(child) => route.routes.push(child),
            Err(reason) => warn!(index, reason = %reason, "skipping invalid nested route"),
        }
    }

    Ok(route)
}

/// Parses an optional duration, falling back to the inherited default when
/// it is missing or malformed.
fn lenient_duration(field: &str, text: Option<&str>, positive: bool) -> Option<Duration> {
    let text = text.filter(|t| !t.is_empty())?;
    match parse_duration(text) {
        Ok(d) if positive && d.is_zero() => {
            warn!(field, value = text, "duration must be positive, using default");
            None
        }
        Ok(d) => Some(d),
        Err(e) => {
            warn!(field, error = %e, "malformed duration, using default");
            None
        }
    }
}
