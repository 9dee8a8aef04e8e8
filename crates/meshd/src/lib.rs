//! The eventmesh daemon.
//!
//! Watches core `Event`s in every configured cluster, turns the admitted ones
//! into alerts and routes them to notification receivers. The routing
//! configuration is either generated from `Receiver` and `EventRoute`
//! resources or read from a file, and is hot-reloaded in both cases.
//!
//! The binary is a thin CLI over [`app::run`]; the pieces are exposed here so
//! they can be wired up in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod app;
pub mod clusters;
pub mod error;
pub mod history;
pub mod marker;
pub mod metrics_server;
pub mod settings;
pub mod workers;

pub use app::{DispatchSlot, RoutesSummary, check_routes, run};
pub use clusters::{ClusterChanges, ClusterSync, Connector, KubeconfigConnector};
pub use error::{DaemonError, Result};
pub use history::{HistoryRecorder, LogRecorder};
pub use marker::GaugeMarker;
pub use settings::Settings;
pub use workers::{EventHandler, WorkerPool};
