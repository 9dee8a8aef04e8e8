//! Routing and aggregation for eventmesh.
//!
//! A [`Route`] tree decides which receivers an alert goes to. The
//! [`Dispatcher`] folds matched alerts into aggregation groups, one per route
//! and group key, and flushes each group through a [`mesh_notify::Stage`]:
//!
//! - first after `group_wait`, collecting everything that arrives meanwhile
//! - then every `group_interval` if the batch changed
//! - and again after `repeat_interval` while anything still fires
//!
//! Delivered batches are recorded in a shared [`NotifyLog`], so rebuilding
//! the dispatcher on reload does not repeat notifications.
//!
//! # Example
//!
//! ```
//! use mesh_config::RouteConfig;
//! use mesh_dispatch::Route;
//!
//! let route = Route::new(&RouteConfig::new("default"));
//! let labels = [("namespace".to_string(), "ns-a".to_string())].into_iter().collect();
//! assert_eq!(route.matches(&labels)[0].opts().receiver, "default");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod dispatcher;
mod group;
pub mod nflog;
pub mod route;

#[cfg(test)]
mod testing;

pub use dispatcher::Dispatcher;
pub use group::GroupSummary;
pub use nflog::{BatchState, NotifyLog};
pub use route::{Route, RouteOpts, format_labels};
