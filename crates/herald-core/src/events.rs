//! Process lifecycle signals for decoupled notification dispatch.
//!
//! The external engine emits a signal after every persisted transition and
//! whenever an operator asks for notifications to be re-sent. Subscribers
//! implement [`LifecycleHandler`]; the engine does not need to know which
//! subscribers exist.
//!
//! ```text
//!                      Stepped / Retry
//! ┌─────────────────┐      signals       ┌────────────────────────────┐
//! │ Process engine  │ ─────────────────▶ │ MulticastLifecycleHandler  │
//! │ (Producer)      │                    │ (Signal fan-out)           │
//! └─────────────────┘                    └────────────────────────────┘
//!                                                      │
//!                                                      ▼
//!                                        ┌────────────────────────────┐
//!                                        │ Notification dispatcher    │
//!                                        │ (Subscriber)               │
//!                                        └────────────────────────────┘
//! ```
//!
//! The engine must persist the new process state before emitting `Stepped`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::Process;

/// Signals emitted by the process engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// The process performed a transition; carries the persisted process.
    Stepped(Process),

    /// Notifications of the current state should be sent again.
    Retry(RetryRequest),
}

impl LifecycleEvent {
    /// The process the signal refers to.
    pub fn process(&self) -> &Process {
        match self {
            Self::Stepped(process) => process,
            Self::Retry(request) => &request.process,
        }
    }
}

/// Request to re-dispatch the notifications of a process's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRequest {
    /// Process whose notifications are re-sent.
    pub process: Process,

    /// Restricts the retry to these services; all directives when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
}

impl RetryRequest {
    /// Retries every directive of the current state.
    pub fn all(process: Process) -> Self {
        Self { process, services: None }
    }

    /// Retries only directives for the given services.
    pub fn only<I, S>(process: Process, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { process, services: Some(services.into_iter().map(Into::into).collect()) }
    }

    /// Whether the directive for `service` is part of this retry.
    pub fn includes(&self, service: &str) -> bool {
        self.services.as_ref().map_or(true, |services| services.iter().any(|s| s == service))
    }
}

/// Trait for handling process lifecycle signals.
///
/// Handling must not fail back into the engine: implementations log their
/// own failures.
#[async_trait::async_trait]
pub trait LifecycleHandler: Send + Sync + std::fmt::Debug {
    /// Handles a lifecycle signal.
    async fn handle_lifecycle(&self, event: LifecycleEvent);
}

/// Handler that discards all signals.
#[derive(Debug, Default)]
pub struct NoOpLifecycleHandler;

#[async_trait::async_trait]
impl LifecycleHandler for NoOpLifecycleHandler {
    async fn handle_lifecycle(&self, _event: LifecycleEvent) {}
}

/// Forwards each signal to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastLifecycleHandler {
    handlers: Vec<Arc<dyn LifecycleHandler>>,
}

impl MulticastLifecycleHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn LifecycleHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl LifecycleHandler for MulticastLifecycleHandler {
    async fn handle_lifecycle(&self, event: LifecycleEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_lifecycle(event).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}
