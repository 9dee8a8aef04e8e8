//! Daemon settings.
//!
//! Settings are read from a TOML file:
//! - The clusters to watch and their admission rules
//! - Alert store retention and the event worker pool
//! - Where the routing configuration comes from
//! - The `/metrics` listener
//! - Enrichment tables for reason texts and workload owners

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mesh_config::GlobalConfig;
use mesh_config::duration::required;
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

/// One cluster whose events are watched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSettings {
    /// Name stamped on every alert from this cluster as the `cluster` label.
    pub name: String,
    /// Kubeconfig context; the default client configuration when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Extra reasons or components to drop.
    #[serde(default)]
    pub filters: Vec<String>,
    /// Reasons or components to admit even if blocked by default.
    #[serde(default)]
    pub not_filters: Vec<String>,
}

/// Alert store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    /// How often resolved alerts are swept.
    #[serde(with = "required")]
    pub gc_interval: Duration,
    /// How long a resolved alert is kept.
    #[serde(with = "required")]
    pub retention: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(120 * 60 * 60),
        }
    }
}

/// Event worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerSettings {
    /// Events handled concurrently.
    pub workers: usize,
    /// Admitted events buffered before the watch loops are held up.
    pub queue_capacity: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 1024,
        }
    }
}

/// Where the routing configuration comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RouteSource {
    /// Generated from `Receiver` and `EventRoute` resources.
    #[default]
    Generated,
    /// Read from a YAML file, reloaded when it changes.
    File {
        /// Path of the routing configuration.
        path: PathBuf,
    },
}

/// `/metrics` endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsSettings {
    /// Whether the endpoint is served.
    pub enabled: bool,
    /// Listen address.
    pub listen: SocketAddr,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([0, 0, 0, 0], 9095)),
        }
    }
}

/// Top-level daemon settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Clusters to watch.
    #[serde(default)]
    pub clusters: Vec<ClusterSettings>,
    /// Alert store settings.
    #[serde(default)]
    pub store: StoreSettings,
    /// Event worker pool settings.
    #[serde(default)]
    pub workers: WorkerSettings,
    /// Routing configuration source.
    #[serde(default)]
    pub routes: RouteSource,
    /// `/metrics` endpoint settings.
    #[serde(default)]
    pub metrics: MetricsSettings,
    /// Settings shared by every integration of generated configurations.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Human-readable text per event reason.
    #[serde(default)]
    pub reasons: HashMap<String, String>,
    /// Owner work code per `namespace|workload`.
    #[serde(default)]
    pub workcodes: HashMap<String, String>,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Settings(format!(
                "failed to read settings file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| DaemonError::Settings(format!("invalid TOML: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.is_empty() {
                return Err(DaemonError::Settings("cluster name cannot be empty".to_string()));
            }
            if !names.insert(cluster.name.as_str()) {
                return Err(DaemonError::Settings(format!(
                    "duplicate cluster name '{}'",
                    cluster.name
                )));
            }
        }

        if self.store.gc_interval.is_zero() {
            return Err(DaemonError::Settings(
                "store.gc_interval must be greater than 0".to_string(),
            ));
        }

        if self.store.retention.is_zero() {
            return Err(DaemonError::Settings(
                "store.retention must be greater than 0".to_string(),
            ));
        }

        if self.workers.workers == 0 {
            return Err(DaemonError::Settings(
                "workers.workers must be greater than 0".to_string(),
            ));
        }

        if self.workers.queue_capacity == 0 {
            return Err(DaemonError::Settings(
                "workers.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if let RouteSource::File { path } = &self.routes {
            if path.as_os_str().is_empty() {
                return Err(DaemonError::Settings("routes.path cannot be empty".to_string()));
            }
        }

        if self.global.http_timeout.is_zero() {
            return Err(DaemonError::Settings(
                "global.http_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_settings(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn empty_settings_use_defaults() {
            let settings = Settings::from_toml("").expect("should parse empty settings");

            assert!(settings.clusters.is_empty());
            assert_eq!(settings.routes, RouteSource::Generated);
            assert_eq!(settings.workers.workers, 16);
            assert_eq!(settings.workers.queue_capacity, 1024);
            assert_eq!(settings.store.gc_interval, Duration::from_secs(1800));
            assert!(settings.metrics.enabled);
            assert_eq!(settings.metrics.listen.port(), 9095);
            assert_eq!(settings.global, GlobalConfig::default());
        }

        #[test]
        fn full_settings() {
            let toml = r#"
                [[clusters]]
                name = "prod-a"
                context = "prod-a-admin"
                filters = ["Scheduled"]
                not_filters = ["Pulled"]

                [[clusters]]
                name = "prod-b"

                [store]
                gc_interval = "15m"
                retention = "2h"

                [workers]
                workers = 4
                queue_capacity = 64

                [routes]
                source = "file"
                path = "/etc/eventmesh/routes.yaml"

                [metrics]
                listen = "127.0.0.1:9100"

                [global]
                console_url = "https://console.example.com"
                http_timeout = "5s"

                [reasons]
                BackOff = "container keeps crashing"

                [workcodes]
                "ns-a|api" = "W1001"
            "#;

            let settings = Settings::from_toml(toml).expect("should parse full settings");

            assert_eq!(settings.clusters.len(), 2);
            assert_eq!(settings.clusters[0].context.as_deref(), Some("prod-a-admin"));
            assert_eq!(settings.clusters[0].filters, vec!["Scheduled"]);
            assert_eq!(settings.clusters[0].not_filters, vec!["Pulled"]);
            assert!(settings.clusters[1].context.is_none());
            assert_eq!(settings.store.gc_interval, Duration::from_secs(15 * 60));
            assert_eq!(settings.store.retention, Duration::from_secs(2 * 60 * 60));
            assert_eq!(settings.workers.workers, 4);
            assert_eq!(
                settings.routes,
                RouteSource::File {
                    path: PathBuf::from("/etc/eventmesh/routes.yaml")
                }
            );
            assert_eq!(settings.metrics.listen, "127.0.0.1:9100".parse().unwrap());
            assert_eq!(settings.global.console_url.as_deref(), Some("https://console.example.com"));
            assert_eq!(settings.global.http_timeout, Duration::from_secs(5));
            assert_eq!(settings.reasons["BackOff"], "container keeps crashing");
            assert_eq!(settings.workcodes["ns-a|api"], "W1001");
        }

        #[test]
        fn load_from_file() {
            let file = create_temp_settings("[[clusters]]\nname = \"local\"\n");
            let settings = Settings::from_file(file.path()).expect("should load from file");
            assert_eq!(settings.clusters[0].name, "local");
        }

        #[test]
        fn file_not_found() {
            let err = Settings::from_file("/nonexistent/meshd.toml").unwrap_err();
            assert!(matches!(err, DaemonError::Settings(_)));
        }

        #[test]
        fn invalid_duration_rejected() {
            let err = Settings::from_toml("[store]\nretention = \"forever\"\n").unwrap_err();
            assert!(err.to_string().contains("invalid TOML"));
        }
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn empty_cluster_name_rejected() {
            let err = Settings::from_toml("[[clusters]]\nname = \"\"\n").unwrap_err();
            assert!(err.to_string().contains("cluster name cannot be empty"));
        }

        #[test]
        fn duplicate_cluster_rejected() {
            let toml = "[[clusters]]\nname = \"prod\"\n\n[[clusters]]\nname = \"prod\"\n";
            let err = Settings::from_toml(toml).unwrap_err();
            assert!(err.to_string().contains("duplicate cluster name 'prod'"));
        }

        #[test]
        fn zero_workers_rejected() {
            let err = Settings::from_toml("[workers]\nworkers = 0\n").unwrap_err();
            assert!(err.to_string().contains("workers.workers"));
        }

        #[test]
        fn zero_queue_rejected() {
            let err = Settings::from_toml("[workers]\nqueue_capacity = 0\n").unwrap_err();
            assert!(err.to_string().contains("workers.queue_capacity"));
        }

        #[test]
        fn zero_retention_rejected() {
            let err = Settings::from_toml("[store]\nretention = \"0\"\n").unwrap_err();
            assert!(err.to_string().contains("store.retention"));
        }

        #[test]
        fn empty_route_path_rejected() {
            let err = Settings::from_toml("[routes]\nsource = \"file\"\npath = \"\"\n").unwrap_err();
            assert!(err.to_string().contains("routes.path"));
        }
    }
}
