//! Builders for processes and service configurations.

use herald_core::{Action, Notify, Process, ProcessEvent, ProcessId, ServiceConfig, State};
use serde_json::json;
use uuid::Uuid;

/// Builds process snapshots for tests.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    id: ProcessId,
    scenario: Option<String>,
    state: State,
    events: Vec<ProcessEvent>,
}

impl Default for ProcessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBuilder {
    /// Starts a process with a random id in state `initial`.
    pub fn new() -> Self {
        Self {
            id: ProcessId::new(),
            scenario: None,
            state: State { key: "initial".to_string(), ..Default::default() },
            events: Vec::new(),
        }
    }

    /// Uses a deterministic id.
    #[must_use]
    pub fn with_id(mut self, id: u128) -> Self {
        self.id = ProcessId(Uuid::from_u128(id));
        self
    }

    /// Sets the scenario name.
    #[must_use]
    pub fn scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    /// Sets the current state key.
    #[must_use]
    pub fn state(mut self, key: impl Into<String>) -> Self {
        self.state.key = key.into();
        self
    }

    /// Adds an action to the current state.
    #[must_use]
    pub fn action<I, S>(mut self, key: impl Into<String>, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.actions.push(Action::new(key, actors));
        self
    }

    /// Adds instructions for an actor, e.g. `service:billing`.
    #[must_use]
    pub fn instructions(mut self, actor: impl Into<String>, text: impl Into<String>) -> Self {
        self.state.instructions.insert(actor.into(), text.into());
        self
    }

    /// Adds a notification directive to the current state.
    #[must_use]
    pub fn notify(mut self, directive: Notify) -> Self {
        self.state.notify.push(directive);
        self
    }

    /// Appends an event with the given hash.
    #[must_use]
    pub fn event(mut self, hash: impl Into<String>) -> Self {
        self.events.push(ProcessEvent::new(hash));
        self
    }

    /// Builds the process.
    pub fn build(self) -> Process {
        Process { id: self.id, scenario: self.scenario, current: self.state, events: self.events }
    }
}

/// AMQP service publishing to the default exchange of `url`.
pub fn amqp_service(url: &str) -> ServiceConfig {
    ServiceConfig::new("amqp").with("url", json!(url))
}

/// ZeroMQ service of the given socket type (`push` or `reply`).
pub fn zeromq_service(socket_type: &str, address: &str) -> ServiceConfig {
    ServiceConfig::new("zeromq").with("type", json!(socket_type)).with("address", json!(address))
}

/// Webhook service posting to `url`.
pub fn webhook_service(url: &str) -> ServiceConfig {
    ServiceConfig::new("webhook").with("url", json!(url))
}

