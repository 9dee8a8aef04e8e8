//! Fingerprinted alert records and the in-memory alert store for eventmesh.
//!
//! `mesh-alerts` holds the data model shared by every stage of the pipeline:
//!
//! - **Alerts**: label sets, annotations and an active window, keyed by a
//!   stable [`Fingerprint`] of the labels
//! - **Matchers**: equality and anchored-regex predicates over label sets
//! - **Store**: a concurrent fingerprint map that merges overlapping
//!   re-deliveries, fans every write out to subscribers and garbage collects
//!   resolved alerts after a retention period
//!
//! # Example
//!
//! ```rust
//! use mesh_alerts::{Alert, AlertStore, MemMarker, StoreConfig};
//! use std::sync::Arc;
//!
//! let store = AlertStore::new(StoreConfig::default(), Arc::new(MemMarker::new()));
//!
//! let alert = Alert::builder()
//!     .label("cluster", "prod")
//!     .label("event_reason", "BackOff")
//!     .annotation("message", "Back-off restarting failed container")
//!     .build();
//! let fp = alert.fingerprint();
//!
//! store.put(vec![alert]).unwrap();
//! assert_eq!(store.get(fp).unwrap().labels["cluster"], "prod");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod marker;
pub mod matcher;
pub mod store;
pub mod types;

pub use error::{AlertError, Result};
pub use marker::{Marker, MemMarker};
pub use matcher::{MatchType, Matcher, MatcherSpec, Matchers, is_valid_label_name};
pub use store::{AlertIterator, AlertStore, StoreConfig};
pub use types::{Alert, AlertBuilder, AlertStatus, Fingerprint, LabelSet};
