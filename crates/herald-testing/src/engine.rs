//! Process engine that records the transitions it is asked to perform.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use chrono::Utc;
use herald_core::{Actor, CoreError, Process, ProcessEngine, ProcessEvent, ProcessId};
use serde_json::Value;
use tokio::sync::watch;

/// A recorded `step` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCall {
    /// Process that was stepped.
    pub process_id: ProcessId,
    /// Fingerprint of the process at the time of the call.
    pub etag: String,
    /// Performed action.
    pub action: String,
    /// Acting service.
    pub actor: String,
    /// Service reply.
    pub response: Value,
}

/// Engine double that appends an event per step.
#[derive(Debug, Clone)]
pub struct RecordingEngine {
    calls: Arc<Mutex<Vec<StepCall>>>,
    count: Arc<watch::Sender<usize>>,
    fail: Arc<AtomicBool>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    /// Creates an engine that accepts every step.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(count),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rejects every step.
    pub fn fail_steps(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Recorded calls, in call order.
    pub fn calls(&self) -> Vec<StepCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Waits until at least `count` steps were requested.
    pub async fn wait_for_calls(&self, count: usize) -> Vec<StepCall> {
        let mut receiver = self.count.subscribe();
        let _ = receiver.wait_for(|recorded| *recorded >= count).await;
        self.calls()
    }
}

#[async_trait::async_trait]
impl ProcessEngine for RecordingEngine {
    async fn step(
        &self,
        process: &Process,
        action: &str,
        actor: &Actor,
        response: Value,
    ) -> herald_core::Result<Process> {
        let call = StepCall {
            process_id: process.id,
            etag: process.fingerprint(),
            action: action.to_string(),
            actor: actor.key().to_string(),
            response,
        };
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(call);
        self.count.send_modify(|count| *count += 1);

        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::engine(format!("step {action} rejected")));
        }

        let mut stepped = process.clone();
        let mut event = ProcessEvent::new(format!("{}-{action}", process.events.len() + 1));
        event.action = Some(action.to_string());
        event.timestamp = Some(Utc::now());
        stepped.events.push(event);
        Ok(stepped)
    }
}
