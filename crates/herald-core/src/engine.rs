//! Contract of the external state-machine engine.

use serde_json::Value;

use crate::{
    error::Result,
    models::{Actor, Process},
};

/// Performs state transitions on behalf of the notification subsystem.
///
/// Implemented by the external engine. Replies from services are fed back
/// through [`ProcessEngine::step`] with the service as actor. The engine may
/// be called concurrently for the same process; it must tolerate concurrent
/// writes.
#[async_trait::async_trait]
pub trait ProcessEngine: Send + Sync + std::fmt::Debug {
    /// Performs `action` as `actor` with `response` as action payload and
    /// returns the resulting process.
    async fn step(
        &self,
        process: &Process,
        action: &str,
        actor: &Actor,
        response: Value,
    ) -> Result<Process>;
}
