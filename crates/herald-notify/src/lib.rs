//! Notification dispatch for long-running processes.
//!
//! When a process enters a state whose action belongs to an external service,
//! the [`Dispatcher`] delivers a description of that action over AMQP, ZeroMQ
//! or HTTP, optionally waits for the service's reply, and steps the process
//! with it.
//!
//! The [`Notifier`] assembles the transports from a [`NotifierConfig`] and
//! consumes lifecycle signals from the engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod amqp;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod notifier;
pub mod registry;
pub mod telemetry;
pub mod webhook;
pub mod zmq;

pub use config::NotifierConfig;
pub use dispatcher::{Dispatcher, NotifyOutcome};
pub use error::{ErrorCategory, NotifyError, Result};
pub use message::{NotifyMessage, Payload};
pub use notifier::Notifier;
pub use registry::{NotifyProvider, ProviderKind, ProviderRegistry};
