//! Test doubles.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mesh_alerts::{Alert, Fingerprint};
use mesh_notify::{NotifyContext, NotifyError, Stage};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub receiver: String,
    pub group_key: String,
    pub fingerprints: Vec<Fingerprint>,
}

/// Records every batch it is asked to deliver.
#[derive(Debug, Default)]
pub(crate) struct RecordingStage {
    calls: Mutex<Vec<Call>>,
    failing: AtomicBool,
}

impl RecordingStage {
    pub(crate) fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn receivers(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.receiver.clone()).collect()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    async fn exec(&self, ctx: &NotifyContext, alerts: &[Alert]) -> mesh_notify::Result<()> {
        self.calls.lock().push(Call {
            receiver: ctx.receiver.clone(),
            group_key: ctx.group_key.clone(),
            fingerprints: alerts.iter().map(Alert::fingerprint).collect(),
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Status { status: 500 });
        }
        Ok(())
    }
}
