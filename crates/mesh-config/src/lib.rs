//! Routing configuration and hot reload for eventmesh.
//!
//! - [`Config`]: the hand-off document (global settings, route tree,
//!   receivers) exchanged between the route generator and the dispatcher
//! - [`Coordinator`]: owns the active configuration, serializes reloads and
//!   notifies subscribers in registration order
//! - [`triggers`]: startup, `SIGHUP`, file watch and in-process hand-off
//!   reload sources
//! - [`ReloadMetrics`]: reload health gauges

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod coordinator;
pub mod duration;
pub mod error;
pub mod metrics;
pub mod triggers;

pub use config::{
    Config, DEFAULT_GROUP_INTERVAL, DEFAULT_GROUP_WAIT, DEFAULT_RECEIVER, DEFAULT_REPEAT_INTERVAL,
    DogConfig, GlobalConfig, GroupBy, ReceiverConfig, RouteConfig, WebhookConfig, YachConfig,
};
pub use coordinator::{ConfigSource, Coordinator, HandOffReceiver, HandOffSender, hand_off};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, Result};
pub use metrics::ReloadMetrics;
pub use triggers::ReloadTrigger;
