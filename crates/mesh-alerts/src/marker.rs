//! Alert markers.
//!
//! A [`Marker`] tracks which fingerprints are currently held by the store, for
//! metrics and status views. The store evicts a fingerprint exactly once when
//! the alert is garbage collected.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::types::Fingerprint;

/// Tracks the fingerprints known to the alert store.
pub trait Marker: Send + Sync {
    /// Marks a fingerprint as held.
    fn set_active(&self, fingerprint: Fingerprint);

    /// Forgets a fingerprint.
    fn delete(&self, fingerprint: Fingerprint);

    /// Number of held fingerprints.
    fn count(&self) -> usize;
}

/// In-memory [`Marker`].
#[derive(Debug, Default)]
pub struct MemMarker {
    active: RwLock<HashSet<Fingerprint>>,
}

impl MemMarker {
    /// Creates an empty marker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Marker for MemMarker {
    fn set_active(&self, fingerprint: Fingerprint) {
        self.active.write().insert(fingerprint);
    }

    fn delete(&self, fingerprint: Fingerprint) {
        self.active.write().remove(&fingerprint);
    }

    fn count(&self) -> usize {
        self.active.read().len()
    }
}
