//! Notification log.
//!
//! Records what was last delivered for every receiver and group so that an
//! unchanged group is not notified again before its repeat interval, even
//! across dispatcher rebuilds on reload.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mesh_alerts::Fingerprint;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Alerts of one batch, split by state at flush time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchState {
    /// Firing alerts.
    pub firing: BTreeSet<Fingerprint>,
    /// Resolved alerts with the end of their window.
    pub resolved: BTreeMap<Fingerprint, DateTime<Utc>>,
}

impl BatchState {
    /// Returns true if the batch holds no alerts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.firing.is_empty() && self.resolved.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: BatchState,
    at: Instant,
}

/// Last delivered batch per receiver and group.
#[derive(Debug)]
pub struct NotifyLog {
    entries: Mutex<HashMap<String, Entry>>,
    retention: Duration,
}

impl NotifyLog {
    /// Creates a log that forgets entries after `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn key(receiver: &str, group_key: &str) -> String {
        format!("{receiver}/{group_key}")
    }

    /// Whether `batch` has to be delivered.
    ///
    /// A batch is due if it contains a firing alert not delivered before, a
    /// resolved alert whose window end was not delivered before, or if it
    /// still fires and `repeat_interval` has passed since the last delivery.
    #[must_use]
    pub fn needs_update(&self, receiver: &str, group_key: &str, batch: &BatchState, repeat_interval: Duration) -> bool {
        if batch.is_empty() {
            return false;
        }
        let entries = self.entries.lock();
        let Some(entry) = entries.get(&Self::key(receiver, group_key)) else {
            return true;
        };

        if !batch.firing.is_subset(&entry.state.firing) {
            return true;
        }
        let new_resolution = batch
            .resolved
            .iter()
            .any(|(fp, ends_at)| entry.state.resolved.get(fp) != Some(ends_at));
        if new_resolution {
            return true;
        }
        if batch.firing.is_empty() {
            return false;
        }
        entry.at.elapsed() >= repeat_interval
    }

    /// Records a delivered batch.
    ///
    /// The firing set is replaced. Resolutions accumulate per fingerprint, so
    /// a resolved alert that is replayed into a rebuilt group after a reload
    /// is recognized as already delivered.
    pub fn record(&self, receiver: &str, group_key: &str, batch: BatchState) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(Self::key(receiver, group_key)).or_insert_with(|| Entry {
            state: BatchState::default(),
            at: now,
        });
        for fp in &batch.firing {
            entry.state.resolved.remove(fp);
        }
        entry.state.resolved.extend(batch.resolved);
        entry.state.firing = batch.firing;
        entry.at = now;
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops entries older than the retention period, and resolutions whose
    /// window ended before it.
    pub fn gc(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.at.elapsed() < self.retention);
        if let Some(cutoff) = cutoff {
            for entry in entries.values_mut() {
                entry.state.resolved.retain(|_, ends_at| *ends_at >= cutoff);
            }
        }
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "notification log gc");
        }
        removed
    }

    /// Runs [`gc`](Self::gc) every `interval` until cancelled.
    pub async fn run_gc(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.gc();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u64) -> Fingerprint {
        Fingerprint::from_u64(n)
    }

    fn firing(fps: &[u64]) -> BatchState {
        BatchState {
            firing: fps.iter().copied().map(fp).collect(),
            resolved: BTreeMap::new(),
        }
    }

    const REPEAT: Duration = Duration::from_secs(3600);

    #[test]
    fn first_batch_is_due() {
        let log = NotifyLog::new(REPEAT);
        assert!(log.needs_update("r", "g", &firing(&[1]), REPEAT));
        assert!(!log.needs_update("r", "g", &BatchState::default(), REPEAT));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_firing_waits_for_repeat() {
        let log = NotifyLog::new(REPEAT * 2);
        log.record("r", "g", firing(&[1, 2]));

        assert!(!log.needs_update("r", "g", &firing(&[1, 2]), REPEAT));
        assert!(!log.needs_update("r", "g", &firing(&[1]), REPEAT));
        assert!(log.needs_update("r", "g", &firing(&[1, 3]), REPEAT));

        tokio::time::advance(REPEAT).await;
        assert!(log.needs_update("r", "g", &firing(&[1, 2]), REPEAT));
    }

    #[test]
    fn resolution_is_due_once_per_window_end() {
        let log = NotifyLog::new(REPEAT);
        let t1 = Utc::now();
        let mut batch = BatchState::default();
        batch.resolved.insert(fp(1), t1);

        assert!(log.needs_update("r", "g", &batch, REPEAT));
        log.record("r", "g", batch.clone());
        assert!(!log.needs_update("r", "g", &batch, REPEAT));

        batch.resolved.insert(fp(1), t1 + chrono::Duration::seconds(30));
        assert!(log.needs_update("r", "g", &batch, REPEAT));
    }

    #[test]
    fn resolutions_accumulate_across_batches() {
        let log = NotifyLog::new(REPEAT);
        let t1 = Utc::now();

        let mut first = firing(&[2]);
        first.resolved.insert(fp(1), t1);
        log.record("r", "g", first);

        let mut second = BatchState::default();
        second.resolved.insert(fp(2), t1);
        log.record("r", "g", second);

        let mut replay = BatchState::default();
        replay.resolved.insert(fp(1), t1);
        replay.resolved.insert(fp(2), t1);
        assert!(!log.needs_update("r", "g", &replay, REPEAT));
    }

    #[test]
    fn refiring_clears_recorded_resolution() {
        let log = NotifyLog::new(REPEAT);
        let t1 = Utc::now();
        let mut resolved = BatchState::default();
        resolved.resolved.insert(fp(1), t1);
        log.record("r", "g", resolved.clone());

        log.record("r", "g", firing(&[1]));
        assert!(log.needs_update("r", "g", &resolved, REPEAT));
    }

    #[test]
    fn gc_prunes_old_resolutions() {
        let log = NotifyLog::new(Duration::from_secs(60));
        let old_end = Utc::now() - chrono::Duration::minutes(5);
        let recent_end = Utc::now();
        let mut batch = firing(&[3]);
        batch.resolved.insert(fp(1), old_end);
        batch.resolved.insert(fp(2), recent_end);
        log.record("r", "g", batch);

        let mut old = BatchState::default();
        old.resolved.insert(fp(1), old_end);
        let mut recent = BatchState::default();
        recent.resolved.insert(fp(2), recent_end);
        assert!(!log.needs_update("r", "g", &old, REPEAT));

        assert_eq!(log.gc(), 0);
        assert!(log.needs_update("r", "g", &old, REPEAT));
        assert!(!log.needs_update("r", "g", &recent, REPEAT));
    }

    #[test]
    fn entries_are_per_receiver() {
        let log = NotifyLog::new(REPEAT);
        log.record("a", "g", firing(&[1]));
        assert!(log.needs_update("b", "g", &firing(&[1]), REPEAT));
    }

    #[tokio::test(start_paused = true)]
    async fn gc_drops_expired_entries() {
        let log = NotifyLog::new(Duration::from_secs(60));
        log.record("r", "g", firing(&[1]));
        assert_eq!(log.gc(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(log.gc(), 1);
        assert!(log.is_empty());
    }
}
