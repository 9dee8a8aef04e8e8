//! In-memory alert store.
//!
//! [`AlertStore`] keeps exactly one [`Alert`] per [`Fingerprint`]. Writes merge
//! into an existing entry when the active windows overlap, then fan out to
//! every live subscriber without blocking. A periodic sweep removes resolved
//! alerts once their retention period has passed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AlertError, Result};
use crate::marker::Marker;
use crate::types::{Alert, Fingerprint};

/// Minimum buffer of every subscription channel.
pub const SUBSCRIPTION_BUFFER: usize = 10_000;

/// Configuration for the alert store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How often resolved alerts are swept.
    pub gc_interval: Duration,
    /// How long a resolved alert is kept after its window ends.
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(60 * 60),
        }
    }
}

impl StoreConfig {
    /// Sets the sweep interval.
    #[must_use]
    pub const fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets the retention period.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

struct Listener {
    tx: mpsc::Sender<Alert>,
    cancel: CancellationToken,
}

/// Fingerprint-keyed alert store with subscriptions and garbage collection.
pub struct AlertStore {
    config: StoreConfig,
    alerts: RwLock<HashMap<Fingerprint, Alert>>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
    marker: Arc<dyn Marker>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for AlertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertStore")
            .field("config", &self.config)
            .field("alerts", &self.alerts.read().len())
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

impl AlertStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: StoreConfig, marker: Arc<dyn Marker>) -> Self {
        Self {
            config,
            alerts: RwLock::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            marker,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ============ Reads and Writes ============

    /// Stores alerts, merging each into an overlapping entry with the same
    /// fingerprint, and broadcasts the stored result to subscribers.
    ///
    /// Invalid alerts are skipped and reported after the valid ones are
    /// stored.
    pub fn put(&self, alerts: impl IntoIterator<Item = Alert>) -> Result<()> {
        let mut first_err = None;

        for alert in alerts {
            if let Err(e) = alert.validate() {
                warn!(error = %e, "skipping invalid alert");
                first_err.get_or_insert(e);
                continue;
            }

            let fp = alert.fingerprint();
            let stored = {
                let mut map = self.alerts.write();
                let stored = match map.get(&fp) {
                    Some(old) if old.overlaps(&alert) => old.merge(&alert),
                    _ => alert,
                };
                map.insert(fp, stored.clone());
                stored
            };
            self.marker.set_active(fp);
            debug!(fingerprint = %fp, "stored alert");

            self.broadcast(&stored);
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Returns the alert with the given fingerprint.
    pub fn get(&self, fingerprint: Fingerprint) -> Result<Alert> {
        self.alerts
            .read()
            .get(&fingerprint)
            .cloned()
            .ok_or_else(|| AlertError::AlertNotFound {
                fingerprint: fingerprint.to_string(),
            })
    }

    /// Returns every stored alert ordered by fingerprint.
    #[must_use]
    pub fn list(&self) -> Vec<Alert> {
        let map = self.alerts.read();
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by_key(|(fp, _)| **fp);
        entries.into_iter().map(|(_, a)| a.clone()).collect()
    }

    /// Number of stored alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    // ============ Subscriptions ============

    /// Subscribes to the store.
    ///
    /// The iterator first yields a snapshot of every stored alert, then every
    /// alert written afterwards. The snapshot and registration happen under
    /// the listener lock so no write falls between them.
    pub fn subscribe(&self) -> AlertIterator {
        let mut listeners = self.listeners.lock();

        let snapshot: Vec<Alert> = self.alerts.read().values().cloned().collect();
        let (tx, rx) = mpsc::channel(snapshot.len().max(SUBSCRIPTION_BUFFER));
        for alert in snapshot {
            // Capacity covers the whole snapshot.
            let _ = tx.try_send(alert);
        }

        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        listeners.insert(
            id,
            Listener {
                tx,
                cancel: cancel.clone(),
            },
        );
        debug!(listener = id, "added alert subscriber");

        AlertIterator { rx, cancel }
    }

    /// Number of registered subscribers, including cancelled ones that have
    /// not been reaped yet.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn broadcast(&self, alert: &Alert) {
        let listeners = self.listeners.lock();
        for (id, listener) in listeners.iter() {
            if listener.cancel.is_cancelled() {
                continue;
            }
            match listener.tx.try_send(alert.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(listener = id, "subscriber buffer full, dropping alert");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(listener = id, "subscriber closed");
                }
            }
        }
    }

    // ============ Garbage Collection ============

    /// Removes resolved alerts whose retention has elapsed at `now` and reaps
    /// cancelled subscribers. Returns the number of removed alerts.
    pub fn gc_at(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        let removed: Vec<Fingerprint> = {
            let mut map = self.alerts.write();
            let expired: Vec<Fingerprint> = map
                .iter()
                .filter(|(_, a)| {
                    a.ends_at
                        .is_some_and(|ends| ends.checked_add_signed(retention).is_some_and(|t| t <= now))
                })
                .map(|(fp, _)| *fp)
                .collect();
            for fp in &expired {
                map.remove(fp);
            }
            expired
        };

        for fp in &removed {
            self.marker.delete(*fp);
        }

        let reaped = {
            let mut listeners = self.listeners.lock();
            let before = listeners.len();
            listeners.retain(|_, l| !l.cancel.is_cancelled() && !l.tx.is_closed());
            before - listeners.len()
        };

        if !removed.is_empty() || reaped > 0 {
            info!(removed = removed.len(), reaped, "alert store gc");
        }
        removed.len()
    }

    /// Runs [`Self::gc_at`] with the current time.
    pub fn gc(&self) -> usize {
        self.gc_at(Utc::now())
    }

    /// Runs the sweep every `gc_interval` until [`Self::close`] is called.
    pub async fn run_gc(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.gc_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.gc();
                }
            }
        }
        debug!("alert store gc stopped");
    }

    /// Stops the GC loop and detaches every subscriber.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// A subscription to an [`AlertStore`].
///
/// Dropping the iterator or calling [`Self::close`] detaches it; the store
/// releases its slot at the next sweep.
#[derive(Debug)]
pub struct AlertIterator {
    rx: mpsc::Receiver<Alert>,
    cancel: CancellationToken,
}

impl AlertIterator {
    /// Waits for the next alert. Returns `None` once the subscription is
    /// closed.
    pub async fn next(&mut self) -> Option<Alert> {
        tokio::select! {
            biased;
            alert = self.rx.recv() => alert,
            () = self.cancel.cancelled() => None,
        }
    }

    /// Returns a buffered alert without waiting.
    pub fn try_next(&mut self) -> Option<Alert> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// The cancellation signal of this subscription.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Detaches the subscription.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }
}

impl Drop for AlertIterator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
