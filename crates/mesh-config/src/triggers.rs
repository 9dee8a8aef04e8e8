//! Reload triggers.
//!
//! Every trigger feeds one channel drained by [`run_reload_loop`], so reloads
//! never run concurrently. Triggers that queue up while a reload is running
//! collapse into a single follow-up reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::{Coordinator, HandOffReceiver};
use crate::error::{ConfigError, Result};

/// Delay between attempts to re-establish a watch on a removed file.
const REWATCH_DELAY: Duration = Duration::from_millis(200);
/// Attempts to re-establish a watch before giving up.
const REWATCH_ATTEMPTS: u32 = 50;

/// Why a reload was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// Initial load at startup.
    Startup,
    /// `SIGHUP` received.
    Signal,
    /// The configuration file changed on disk.
    FileChanged,
    /// A new document was handed off in-process.
    HandOff,
}

impl ReloadTrigger {
    /// Returns the trigger as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Signal => "signal",
            Self::FileChanged => "file",
            Self::HandOff => "hand-off",
        }
    }
}

/// Applies a reload for every trigger until cancelled or all senders drop.
pub async fn run_reload_loop(
    coordinator: Arc<Coordinator>,
    mut triggers: mpsc::Receiver<ReloadTrigger>,
    cancel: CancellationToken,
) {
    loop {
        let trigger = tokio::select! {
            () = cancel.cancelled() => break,
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
        };

        let mut coalesced = 0_usize;
        while triggers.try_recv().is_ok() {
            coalesced += 1;
        }

        debug!(coalesced, "coalesced queued reload triggers");
        // Failures are logged and reflected in the reload gauges.
        let _ = apply_trigger(&coordinator, trigger);
    }
    debug!("reload loop stopped");
}

/// Reloads `coordinator` on behalf of `trigger`.
///
/// The reload loop calls this for every queued trigger; the daemon calls it
/// directly with [`ReloadTrigger::Startup`] when an unreadable initial
/// configuration has to fail startup.
pub fn apply_trigger(coordinator: &Coordinator, trigger: ReloadTrigger) -> Result<()> {
    debug!(trigger = trigger.as_str(), "reloading configuration");
    coordinator.reload()
}

/// Requests a reload on every `SIGHUP`.
#[cfg(unix)]
pub fn watch_signal(tx: mpsc::Sender<ReloadTrigger>, cancel: CancellationToken) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).map_err(|e| ConfigError::Watch {
        reason: format!("installing SIGHUP handler: {e}"),
    })?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("received SIGHUP, reloading configuration");
                    if tx.send(ReloadTrigger::Signal).await.is_err() {
                        break;
                    }
                }
            }
        }
    }))
}

/// Requests a reload whenever a new document is handed off.
pub fn watch_hand_off(
    mut rx: HandOffReceiver,
    tx: mpsc::Sender<ReloadTrigger>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if tx.send(ReloadTrigger::HandOff).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Requests a reload whenever the file at `path` is written.
///
/// A removed file (for example a rotated configuration-volume symlink) is
/// unwatched and the watch is re-established on the same path once it
/// reappears, followed by a reload.
pub fn watch_file(
    path: PathBuf,
    tx: mpsc::Sender<ReloadTrigger>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = events_tx.send(res);
    })
    .map_err(|e| ConfigError::Watch {
        reason: e.to_string(),
    })?;
    watch_path(&mut watcher, &path)?;
    info!(path = %path.display(), "watching configuration file");

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "file watch error");
                    continue;
                }
            };

            match event.kind {
                EventKind::Remove(_) => {
                    debug!(path = %path.display(), "configuration file removed, re-establishing watch");
                    let _ = watcher.unwatch(&path);
                    if !rewatch(&mut watcher, &path, &cancel).await {
                        warn!(path = %path.display(), "configuration file did not reappear");
                        continue;
                    }
                }
                EventKind::Create(_) | EventKind::Modify(_) => {}
                _ => continue,
            }

            if tx.send(ReloadTrigger::FileChanged).await.is_err() {
                break;
            }
        }
    }))
}

fn watch_path(watcher: &mut impl Watcher, path: &Path) -> Result<()> {
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| ConfigError::Watch {
            reason: format!("{}: {e}", path.display()),
        })
}

async fn rewatch(watcher: &mut impl Watcher, path: &Path, cancel: &CancellationToken) -> bool {
    for _ in 0..REWATCH_ATTEMPTS {
        if cancel.is_cancelled() {
            return false;
        }
        if watch_path(watcher, path).is_ok() {
            return true;
        }
        tokio::time::sleep(REWATCH_DELAY).await;
    }
    false
}
