//! Route tree.
//!
//! A [`Route`] is built from a validated [`RouteConfig`]. Every node carries
//! fully resolved options: unset values are inherited from the parent, and
//! the root falls back to the built-in defaults.

use std::fmt::Write as _;
use std::time::Duration;

use mesh_alerts::{LabelSet, Matchers};
use mesh_config::{
    DEFAULT_GROUP_INTERVAL, DEFAULT_GROUP_WAIT, DEFAULT_RECEIVER, DEFAULT_REPEAT_INTERVAL, GroupBy,
    RouteConfig,
};

/// Resolved options of a route node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOpts {
    /// Receiver alerts ending at this node are sent to.
    pub receiver: String,
    /// Labels groups are keyed on.
    pub group_by: GroupBy,
    /// Delay before the first notification of a group.
    pub group_wait: Duration,
    /// Delay between notifications of a changed group.
    pub group_interval: Duration,
    /// Delay before an unchanged group is notified again.
    pub repeat_interval: Duration,
}

impl Default for RouteOpts {
    fn default() -> Self {
        Self {
            receiver: DEFAULT_RECEIVER.to_string(),
            group_by: GroupBy::All,
            group_wait: DEFAULT_GROUP_WAIT,
            group_interval: DEFAULT_GROUP_INTERVAL,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
        }
    }
}

impl RouteOpts {
    fn inherit(parent: &Self, config: &RouteConfig) -> Self {
        let receiver = if config.receiver.is_empty() {
            parent.receiver.clone()
        } else {
            config.receiver.clone()
        };
        let group_by = if config.group_by.is_empty() {
            parent.group_by.clone()
        } else {
            config.group_by()
        };
        Self {
            receiver,
            group_by,
            group_wait: config.group_wait.unwrap_or(parent.group_wait),
            group_interval: config.group_interval.unwrap_or(parent.group_interval),
            repeat_interval: config.repeat_interval.unwrap_or(parent.repeat_interval),
        }
    }
}

/// A node of the route tree.
#[derive(Debug, Clone)]
pub struct Route {
    key: String,
    opts: RouteOpts,
    matchers: Matchers,
    continue_matching: bool,
    routes: Vec<Route>,
}

impl Route {
    /// Builds the tree rooted at `config`.
    #[must_use]
    pub fn new(config: &RouteConfig) -> Self {
        Self::build(config, &RouteOpts::default(), None, 0)
    }

    fn build(config: &RouteConfig, parent_opts: &RouteOpts, parent_key: Option<&str>, index: usize) -> Self {
        let key = match parent_key {
            None => config.matchers.to_string(),
            Some(parent) if config.id.is_empty() => format!("{parent}/{}/{index}", config.matchers),
            Some(parent) => format!("{parent}/{}/{:?}", config.matchers, config.id),
        };
        let opts = RouteOpts::inherit(parent_opts, config);
        let routes = config
            .routes
            .iter()
            .enumerate()
            .map(|(i, child)| Self::build(child, &opts, Some(&key), i))
            .collect();

        Self {
            key,
            opts,
            matchers: config.matchers.clone(),
            continue_matching: config.continue_matching,
            routes,
        }
    }

    /// Identity of the node. Stable for an unchanged tree, and across sibling
    /// insertions for nodes with an id.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resolved options.
    #[must_use]
    pub const fn opts(&self) -> &RouteOpts {
        &self.opts
    }

    /// Child routes.
    #[must_use]
    pub fn routes(&self) -> &[Self] {
        &self.routes
    }

    /// Whether later siblings are evaluated after this node matched.
    #[must_use]
    pub const fn continue_matching(&self) -> bool {
        self.continue_matching
    }

    /// Routes an alert with `labels` is dispatched to.
    ///
    /// Matching is depth-first. A matching node yields its matching
    /// descendants, or itself when no child matched. After a matching child
    /// without `continue`, later siblings are not evaluated. The root always
    /// matches, so the result is never empty.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> Vec<&Self> {
        let mut out = Vec::new();
        self.collect(labels, true, &mut out);
        out
    }

    fn collect<'a>(&'a self, labels: &LabelSet, root: bool, out: &mut Vec<&'a Self>) -> bool {
        if !root && !self.matchers.matches(labels) {
            return false;
        }

        let mut child_matched = false;
        for child in &self.routes {
            if child.collect(labels, false, out) {
                child_matched = true;
                if !child.continue_matching {
                    break;
                }
            }
        }

        if !child_matched {
            out.push(self);
        }
        true
    }

    /// Projects `labels` onto this node's group-by set.
    #[must_use]
    pub fn group_labels(&self, labels: &LabelSet) -> LabelSet {
        match &self.opts.group_by {
            GroupBy::All => labels.clone(),
            GroupBy::Labels(names) => names
                .iter()
                .filter_map(|name| {
                    labels
                        .get(name)
                        .filter(|v| !v.is_empty())
                        .map(|v| (name.clone(), v.clone()))
                })
                .collect(),
        }
    }

    /// Key of the aggregation group an alert with `group_labels` joins.
    #[must_use]
    pub fn group_key(&self, group_labels: &LabelSet) -> String {
        format!("{}:{}", self.key, format_labels(group_labels))
    }

    /// Visits every node depth-first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        for child in &self.routes {
            child.walk(visit);
        }
    }
}

/// Renders a label set as `{a="1",b="2"}`.
#[must_use]
pub fn format_labels(labels: &LabelSet) -> String {
    let mut out = String::from("{");
    for (i, (name, value)) in labels.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{name}={value:?}");
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_config::Config;
    use test_case::test_case;

    const TREE: &str = r#"
route:
  receiver: default
  group_by: [namespace]
  group_wait: 10s
  routes:
    - receiver: team-a
      matchers:
        - name: namespace
          value: ns-a
      routes:
        - receiver: team-a-pods
          group_wait: 1m
          matchers:
            - name: obj_kind
              value: Pod
    - receiver: audit
      continue: true
      matchers:
        - name: severity
          value: Warning
    - receiver: infra
      group_by: ["..."]
      matchers:
        - name: namespace
          value: "kube-.*"
          regex: true
    - receiver: late
      matchers:
        - name: severity
          value: Warning
receivers:
  - name: default
"#;

    fn tree() -> Route {
        Route::new(&Config::load(TREE).unwrap().route)
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn receivers(route: &Route, pairs: &[(&str, &str)]) -> Vec<String> {
        route
            .matches(&labels(pairs))
            .iter()
            .map(|r| r.opts().receiver.clone())
            .collect()
    }

    mod matching_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(&[("namespace", "ns-b")], &["default"]; "falls back to root")]
        #[test_case(&[("namespace", "ns-a")], &["team-a"]; "child without matching grandchild")]
        #[test_case(&[("namespace", "ns-a"), ("obj_kind", "Pod")], &["team-a-pods"]; "deepest match wins")]
        #[test_case(&[("namespace", "kube-system")], &["infra"]; "regex matcher")]
        #[test_case(&[("namespace", "kube-system"), ("severity", "Warning")], &["audit", "infra"]; "continue evaluates later siblings")]
        #[test_case(&[("namespace", "ns-b"), ("severity", "Warning")], &["audit", "late"]; "continue then plain match")]
        #[test_case(&[("namespace", "ns-a"), ("severity", "Warning")], &["team-a"]; "first plain match stops siblings")]
        fn receivers_for(pairs: &[(&str, &str)], expected: &[&str]) {
            assert_eq!(receivers(&tree(), pairs), expected);
        }

        #[test]
        fn empty_labels_match_root() {
            assert_eq!(receivers(&tree(), &[]), vec!["default"]);
        }

        #[test]
        fn root_without_children_always_matches() {
            let route = Route::new(&RouteConfig::new("default"));
            assert_eq!(receivers(&route, &[("anything", "x")]), vec!["default"]);
        }
    }

    mod options_tests {
        use super::*;

        #[test]
        fn children_inherit_unset_options() {
            let root = tree();
            let team_a = &root.routes()[0];
            let pods = &team_a.routes()[0];

            assert_eq!(root.opts().group_wait, Duration::from_secs(10));
            assert_eq!(root.opts().group_interval, DEFAULT_GROUP_INTERVAL);
            assert_eq!(team_a.opts().group_wait, Duration::from_secs(10));
            assert_eq!(pods.opts().group_wait, Duration::from_secs(60));
            assert_eq!(pods.opts().group_by, GroupBy::Labels(vec!["namespace".to_string()]));
            assert_eq!(root.routes()[2].opts().group_by, GroupBy::All);
        }

        #[test]
        fn root_defaults() {
            let route = Route::new(&RouteConfig::new("default"));
            assert_eq!(route.opts(), &RouteOpts::default());
        }

        #[test]
        fn keys_are_unique_and_stable() {
            let mut keys = Vec::new();
            tree().walk(&mut |r| keys.push(r.key().to_string()));
            let mut unique = keys.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(keys.len(), unique.len());

            let mut again = Vec::new();
            tree().walk(&mut |r| again.push(r.key().to_string()));
            assert_eq!(keys, again);
            assert_eq!(keys[0], "{}");
            assert_eq!(keys[1], "{}/{namespace=\"ns-a\"}/0");
        }

        #[test]
        fn keys_with_id_survive_sibling_insertion() {
            let mut config = RouteConfig::new("default");
            let mut later = RouteConfig::new("bot2");
            later.id = "ns-b/r".to_string();
            config.routes.push(later);
            let before = Route::new(&config).routes()[0].key().to_string();

            let mut earlier = RouteConfig::new("bot1");
            earlier.id = "ns-a/r".to_string();
            config.routes.insert(0, earlier);
            let after = Route::new(&config);

            assert_eq!(after.routes()[1].key(), before);
            assert_eq!(before, "{}/{}/\"ns-b/r\"");
            assert_ne!(after.routes()[0].key(), before);
        }
    }

    mod grouping_tests {
        use super::*;

        #[test]
        fn projects_group_by_labels() {
            let root = tree();
            let alert = labels(&[("namespace", "ns-b"), ("pod", "p1")]);
            let group = root.group_labels(&alert);
            assert_eq!(group, labels(&[("namespace", "ns-b")]));
            assert_eq!(root.group_key(&group), "{}:{namespace=\"ns-b\"}");
        }

        #[test]
        fn missing_group_by_label_is_omitted() {
            let root = tree();
            assert!(root.group_labels(&labels(&[("pod", "p1")])).is_empty());
        }

        #[test]
        fn group_all_uses_full_label_set() {
            let route = Route::new(&RouteConfig::new("default"));
            let alert = labels(&[("namespace", "ns-b"), ("pod", "p1")]);
            assert_eq!(route.group_labels(&alert), alert);
        }

        #[test]
        fn format_labels_is_sorted_and_quoted() {
            assert_eq!(format_labels(&labels(&[("b", "2"), ("a", "x\"y")])), r#"{a="x\"y",b="2"}"#);
            assert_eq!(format_labels(&LabelSet::new()), "{}");
        }
    }
}
