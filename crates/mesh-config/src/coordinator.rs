//! Serialized configuration reloads.
//!
//! The [`Coordinator`] owns the active [`Config`]. A reload reads the source,
//! parses it and, on success, makes it current and runs every subscriber in
//! registration order. A parse failure keeps the previous configuration. A
//! subscriber failure stops the remaining subscribers; those already run keep
//! the new configuration.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::metrics::ReloadMetrics;

/// Sending half of the in-process hand-off channel.
pub type HandOffSender = watch::Sender<Option<Arc<str>>>;
/// Receiving half of the in-process hand-off channel.
pub type HandOffReceiver = watch::Receiver<Option<Arc<str>>>;

/// Creates an empty hand-off channel.
#[must_use]
pub fn hand_off() -> (HandOffSender, HandOffReceiver) {
    watch::channel(None)
}

/// Where the configuration text comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A YAML file on disk.
    File(PathBuf),
    /// The latest document published by an in-process generator.
    HandOff(HandOffReceiver),
}

impl ConfigSource {
    fn read(&self) -> Result<Arc<str>> {
        match self {
            Self::File(path) => std::fs::read_to_string(path)
                .map(Arc::from)
                .map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }),
            Self::HandOff(rx) => rx.borrow().clone().ok_or(ConfigError::NotReady),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::HandOff(_) => "hand-off".to_string(),
        }
    }
}

type Subscriber = Box<dyn Fn(&Arc<Config>) -> Result<()> + Send + Sync>;

struct State {
    current: Option<Arc<Config>>,
    subscribers: Vec<Subscriber>,
}

/// Owns the active configuration and applies reloads one at a time.
pub struct Coordinator {
    source: ConfigSource,
    state: Mutex<State>,
    metrics: ReloadMetrics,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Coordinator")
            .field("source", &self.source.describe())
            .field("loaded", &state.current.is_some())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl Coordinator {
    /// Creates a coordinator with no configuration loaded.
    #[must_use]
    pub fn new(source: ConfigSource, metrics: ReloadMetrics) -> Self {
        Self {
            source,
            state: Mutex::new(State {
                current: None,
                subscribers: Vec::new(),
            }),
            metrics,
        }
    }

    /// Registers a callback run with every newly applied configuration.
    ///
    /// The callback must build its new state completely before swapping it
    /// in; an error leaves its previous state in place.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Arc<Config>) -> Result<()> + Send + Sync + 'static,
    {
        self.state.lock().subscribers.push(Box::new(callback));
    }

    /// The active configuration, if one has been applied.
    #[must_use]
    pub fn config(&self) -> Option<Arc<Config>> {
        self.state.lock().current.clone()
    }

    /// The reload gauges.
    #[must_use]
    pub const fn metrics(&self) -> &ReloadMetrics {
        &self.metrics
    }

    /// The configuration source.
    #[must_use]
    pub const fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Loads the source and applies it.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.state.lock();

        let parsed = self.source.read().and_then(|text| Config::load(&text));
        let config = match parsed {
            Ok(config) => Arc::new(config),
            Err(e) => {
                self.metrics.record_failure();
                error!(source = %self.source.describe(), error = %e, "loading configuration failed");
                return Err(e);
            }
        };

        for name in config.unknown_receivers() {
            warn!(receiver = name, "route references undefined receiver");
        }

        state.current = Some(Arc::clone(&config));

        for (index, subscriber) in state.subscribers.iter().enumerate() {
            if let Err(e) = subscriber(&config) {
                self.metrics.record_failure();
                error!(subscriber = index, error = %e, "applying configuration failed");
                return Err(ConfigError::SubscriberFailed {
                    reason: e.to_string(),
                });
            }
        }

        self.metrics.record_success(config.hash(), Utc::now());
        info!(source = %self.source.describe(), hash = config.hash(), "completed loading of configuration");
        Ok(())
    }
}
