//! Core domain models and lifecycle events.
//!
//! Provides the process snapshot the notification subsystem reads, the
//! lifecycle signals emitted by the external state-machine engine, the step
//! contract used to feed replies back into that engine, and the service
//! configuration every transport resolves against. All other crates depend on
//! these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod services;

pub use engine::ProcessEngine;
pub use error::{CoreError, Result};
pub use events::{
    LifecycleEvent, LifecycleHandler, MulticastLifecycleHandler, NoOpLifecycleHandler,
    RetryRequest,
};
pub use models::{Action, Actor, Notify, Process, ProcessEvent, ProcessId, State};
pub use services::{ServiceConfig, ServicesConfig};
