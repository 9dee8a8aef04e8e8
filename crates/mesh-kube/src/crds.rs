//! `Receiver` and `EventRoute` custom resources.
//!
//! Receivers are cluster-scoped and describe where notifications go.
//! Event routes are namespaced and attach a routing subtree below the
//! generated root route.

use kube::{CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Generic webhook target.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    /// Target URL; the integration is skipped when empty.
    #[serde(default)]
    pub url: String,
    /// Maximum alerts per message, 0 for no limit.
    #[serde(default)]
    pub max_alerts: u32,
    /// Whether resolved-only batches are sent. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_resolved: Option<bool>,
}

/// Dog robot target.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DogSpec {
    /// Robot task id; the integration is skipped unless positive.
    #[serde(default)]
    pub task_id: i64,
    /// Maximum alerts per message, 0 for no limit.
    #[serde(default)]
    pub max_alerts: u32,
}

/// Yach robot target.
#[derive(Deserialize, Serialize, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct YachSpec {
    /// Robot access token; the integration is skipped when empty.
    #[serde(default)]
    pub access_token: String,
    /// Signing secret.
    #[serde(default)]
    pub secret: String,
    /// Keyword the robot requires in every message.
    #[serde(default)]
    pub keyword: String,
}

impl std::fmt::Debug for YachSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YachSpec")
            .field("access_token", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("keyword", &self.keyword)
            .finish()
    }
}

/// A named notification target.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(group = "notification.eventmesh.io", version = "v1", kind = "Receiver")]
#[kube(printcolumn = r#"{"name":"Group","type":"string","jsonPath":".spec.group"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverSpec {
    /// Free-form owner group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Webhook integration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_config: Option<WebhookSpec>,
    /// Dog robot integration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dog_config: Option<DogSpec>,
    /// Yach robot integration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yach_config: Option<YachSpec>,
}

/// A label matcher as written in an event route.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RouteMatcher {
    /// Label name.
    pub name: String,
    /// Value, or pattern when `regex` is set.
    #[serde(default)]
    pub value: String,
    /// Whether `value` is an anchored regular expression.
    #[serde(default)]
    pub regex: bool,
}

/// One node of a routing subtree.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Receiver name; empty inherits the parent's.
    #[serde(default)]
    pub receiver: String,
    /// Labels to group by.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Prometheus-style duration, e.g. `30s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<String>,
    /// Prometheus-style duration, e.g. `5m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<String>,
    /// Prometheus-style duration, e.g. `4h`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<String>,
    /// Conjunctive label matchers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<RouteMatcher>,
    /// Whether later siblings are still evaluated after this node matches.
    #[serde(default, rename = "continue")]
    pub continue_matching: bool,
    /// Child routes, each shaped like this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "nested_routes_schema")]
    pub routes: Vec<serde_json::Value>,
}

/// Attaches a routing subtree below the root route.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "eventmesh.eventmesh.io", version = "v1", kind = "EventRoute")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Receiver","type":"string","jsonPath":".spec.route.receiver"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct EventRouteSpec {
    /// The subtree root.
    pub route: RouteSpec,
}

fn nested_routes_schema(_: &mut schemars::r#gen::SchemaGenerator) -> Schema {
    let mut item = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..SchemaObject::default()
    };
    item.extensions
        .insert("x-kubernetes-preserve-unknown-fields".to_string(), serde_json::Value::Bool(true));

    SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..ArrayValidation::default()
        })),
        ..SchemaObject::default()
    }
    .into()
}

/// Both custom resource definitions as a multi-document YAML stream.
pub fn crd_manifests() -> Result<String> {
    let receiver = serde_yaml::to_string(&Receiver::crd())?;
    let route = serde_yaml::to_string(&EventRoute::crd())?;
    Ok(format!("{receiver}---\n{route}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_spec_from_camel_case() {
        let spec: ReceiverSpec = serde_json::from_value(serde_json::json!({
            "group": "sre",
            "webhookConfig": {"url": "http://example/hook", "maxAlerts": 5},
            "yachConfig": {"accessToken": "t", "secret": "s", "keyword": "k8s"}
        }))
        .unwrap();

        assert_eq!(spec.group, "sre");
        let webhook = spec.webhook_config.unwrap();
        assert_eq!(webhook.url, "http://example/hook");
        assert_eq!(webhook.max_alerts, 5);
        assert_eq!(webhook.send_resolved, None);
        assert!(spec.dog_config.is_none());
        assert_eq!(spec.yach_config.unwrap().keyword, "k8s");
    }

    #[test]
    fn route_spec_keeps_nested_routes_untyped() {
        let spec: EventRouteSpec = serde_json::from_value(serde_json::json!({
            "route": {
                "receiver": "bot1",
                "groupBy": ["namespace"],
                "groupWait": "10s",
                "matchers": [{"name": "namespace", "value": "ns-a"}],
                "continue": true,
                "routes": [{"receiver": "bot2", "matchers": [{"name": "pod", "value": "web-.*", "regex": true}]}]
            }
        }))
        .unwrap();

        assert_eq!(spec.route.receiver, "bot1");
        assert_eq!(spec.route.group_wait.as_deref(), Some("10s"));
        assert!(spec.route.continue_matching);
        assert!(!spec.route.matchers[0].regex);
        assert_eq!(spec.route.routes.len(), 1);
        assert_eq!(spec.route.routes[0]["receiver"], "bot2");
    }

    #[test]
    fn crd_scopes_and_groups() {
        let receiver = Receiver::crd();
        assert_eq!(receiver.spec.group, "notification.eventmesh.io");
        assert_eq!(receiver.spec.scope, "Cluster");

        let route = EventRoute::crd();
        assert_eq!(route.spec.group, "eventmesh.eventmesh.io");
        assert_eq!(route.spec.scope, "Namespaced");
    }

    #[test]
    fn manifests_contain_both_kinds() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("kind: Receiver"));
        assert!(yaml.contains("kind: EventRoute"));
        assert!(yaml.contains("x-kubernetes-preserve-unknown-fields"));
    }
}
