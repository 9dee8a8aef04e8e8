//! Kubernetes integration for eventmesh.
//!
//! This crate connects the pipeline to its clusters:
//!
//! - **Event sources**: one [`ClusterEventSource`] per cluster watches core
//!   `Event`s, runs them through the [`AdmissionFilter`] and forwards the
//!   admitted ones as [`RawEvent`]s; the [`ClusterManager`] adds and removes
//!   clusters at runtime
//! - **Admission**: a cuckoo-filter block list with an exact allow list that
//!   always wins, plus replay suppression by timestamp
//! - **Route generation**: [`Receiver`] and [`EventRoute`] custom resources
//!   are folded into a routing configuration by the
//!   [`RouteConfigGenerator`] and handed off to the reload coordinator
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use mesh_kube::{AdmissionFilter, RawEvent};
//!
//! let filter = AdmissionFilter::new(Utc::now());
//! let pulled = RawEvent {
//!     reason: "Pulled".to_string(),
//!     ..RawEvent::default()
//! };
//! assert!(filter.filter(&pulled));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod admission;
pub mod cluster;
pub mod controller;
pub mod crds;
pub mod cuckoo;
pub mod error;
pub mod event;
pub mod generator;
pub mod source;

#[cfg(test)]
mod testing;

pub use admission::AdmissionFilter;
pub use cluster::ClusterManager;
pub use crds::{EventRoute, EventRouteSpec, Receiver, ReceiverSpec, crd_manifests};
pub use cuckoo::CuckooFilter;
pub use error::{KubeError, Result};
pub use event::{Enrichment, RawEvent};
pub use generator::RouteConfigGenerator;
pub use source::{ClusterEventSource, SourceMetrics};
