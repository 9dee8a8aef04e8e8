//! Notification delivery for eventmesh.
//!
//! A [`Pipeline`] is built once per routing configuration. It holds one
//! [`Integration`] per webhook or chat-bot entry of every receiver the route
//! tree references, and delivers a batch to all integrations of a receiver
//! concurrently. Each integration retries on its own with bounded
//! exponential backoff, so one failing target never blocks the others.
//!
//! Integrations:
//!
//! - [`webhook::WebhookNotifier`]: Alertmanager-compatible JSON
//! - [`yach::YachNotifier`]: signed markdown robot messages
//! - [`dog::DogNotifier`]: task-addressed robot messages
//! - [`LogNotifier`]: writes batches to the log

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod dog;
pub mod error;
mod http;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod webhook;
pub mod yach;

pub use error::{NotifyError, Result};
pub use notifier::{Integration, LogNotifier, Notifier, NotifyContext, Stage};
pub use pipeline::Pipeline;
pub use retry::RetryPolicy;
