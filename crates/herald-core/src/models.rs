//! Process snapshot and notification directive models.
//!
//! Defines the subset of a running scenario process that the notification
//! subsystem reads: the current state with its actions, instructions and
//! notification directives, plus the event log used to fingerprint the
//! process. Processes are owned by the external engine; values here are
//! read-only snapshots.

use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Strongly-typed process identifier.
///
/// # Example
///
/// ```
/// use herald_core::models::ProcessId;
/// let process_id = ProcessId::new();
/// println!("Notifying for process: {}", process_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    /// Creates a new random process ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ProcessId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A running instance of a scenario state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Unique process identifier.
    pub id: ProcessId,

    /// Scenario the process was started from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,

    /// Description of the state the process is currently in.
    pub current: State,

    /// Append-only event log; each entry carries the hash chaining it to the
    /// previous one.
    #[serde(default)]
    pub events: Vec<ProcessEvent>,
}

impl Process {
    /// Returns the stable content fingerprint of this process.
    ///
    /// The fingerprint doubles as deduplication key and as the AMQP message
    /// and correlation id. It is the hash of the latest event when the process
    /// has an event log, otherwise the SHA-256 of its canonical JSON form.
    pub fn fingerprint(&self) -> String {
        if let Some(event) = self.events.last() {
            return event.hash.clone();
        }

        // All maps in the model are ordered, so the serialisation is canonical.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// The current state of a process as described by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// State key within the scenario.
    pub key: String,

    /// Actions that may be performed in this state.
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Instructions per actor key (for example `service:billing`).
    #[serde(default)]
    pub instructions: BTreeMap<String, String>,

    /// Ordered notification directives for this state.
    #[serde(default)]
    pub notify: Vec<Notify>,
}

impl State {
    /// Finds an action of this state by key.
    pub fn find_action(&self, key: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.key == key)
    }

    /// Returns all actions the given actor is allowed to perform.
    pub fn actions_for(&self, actor: &Actor) -> Vec<&Action> {
        self.actions.iter().filter(|action| action.allows(actor)).collect()
    }

    /// Returns the instructions addressed to the given actor, if any.
    pub fn instructions_for(&self, actor: &Actor) -> Option<&str> {
        self.instructions.get(actor.key()).map(String::as_str)
    }
}

/// An action that can be performed in a state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action key used to trigger the transition.
    pub key: String,

    /// Actor keys allowed to perform the action.
    #[serde(default)]
    pub actor: Vec<String>,

    /// Any further attributes the scenario defines for the action.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Action {
    /// Creates an action with the given key and allowed actors.
    pub fn new<I, S>(key: impl Into<String>, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            actor: actors.into_iter().map(Into::into).collect(),
            extra: BTreeMap::new(),
        }
    }

    /// Whether the given actor may perform this action.
    pub fn allows(&self, actor: &Actor) -> bool {
        self.actor.iter().any(|key| key == actor.key())
    }
}

/// Entry of the process event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// Content hash of the event.
    pub hash: String,

    /// Action that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// When the event was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProcessEvent {
    /// Creates an event log entry with the given hash.
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into(), action: None, timestamp: None }
    }
}

/// Notification directive: one external service invocation required by the
/// current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notify {
    /// Configured service name.
    pub service: String,

    /// Action to step with when the service replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,

    /// Message that replaces the canonical payload verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,

    /// Forces (or, when `false`, suppresses) waiting for a reply. Unset
    /// leaves the decision to the service configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_reply: Option<bool>,

    /// Reply timeout in seconds, overriding the service configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_timeout: Option<u64>,
}

impl Notify {
    /// Creates a directive for the given service.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            trigger: None,
            message: None,
            wait_for_reply: None,
            response_timeout: None,
        }
    }

    /// Sets the action to trigger with the reply.
    #[must_use]
    pub fn with_trigger(mut self, action: impl Into<String>) -> Self {
        self.trigger = Some(action.into());
        self
    }

    /// Sets an explicit message replacing the canonical payload.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<Value>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets whether to wait for a reply.
    #[must_use]
    pub fn wait_for_reply(mut self, wait: bool) -> Self {
        self.wait_for_reply = Some(wait);
        self
    }

    /// Sets the reply timeout in whole seconds.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout.as_secs());
        self
    }

    /// The actor identity the service acts as when its reply is stepped.
    pub fn actor(&self) -> Actor {
        Actor::service(&self.service)
    }
}

/// Identity performing a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    key: String,
}

impl Actor {
    /// Creates an actor with an arbitrary key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// The actor representing a configured external service.
    pub fn service(name: &str) -> Self {
        Self { key: format!("service:{name}") }
    }

    /// The actor key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_process(events: Vec<ProcessEvent>) -> Process {
        Process {
            id: ProcessId(Uuid::nil()),
            scenario: Some("order".to_string()),
            current: State {
                key: "awaiting_payment".to_string(),
                actions: vec![
                    Action::new("approve", ["service:billing"]),
                    Action::new("cancel", ["customer"]),
                ],
                instructions: BTreeMap::from([(
                    "service:billing".to_string(),
                    "Charge the card".to_string(),
                )]),
                notify: vec![Notify::new("billing").with_trigger("approve")],
            },
            events,
        }
    }

    #[test]
    fn fingerprint_uses_latest_event_hash() {
        let process =
            sample_process(vec![ProcessEvent::new("first"), ProcessEvent::new("second")]);
        assert_eq!(process.fingerprint(), "second");
    }

    #[test]
    fn fingerprint_without_events_is_stable_content_hash() {
        let process = sample_process(Vec::new());

        let fingerprint = process.fingerprint();
        assert_eq!(fingerprint.len(), 64);
        assert_eq!(fingerprint, process.clone().fingerprint());

        let mut changed = process.clone();
        changed.current.key = "paid".to_string();
        assert_ne!(changed.fingerprint(), fingerprint);
    }

    #[test]
    fn actions_filtered_by_actor() {
        let process = sample_process(Vec::new());
        let billing = Actor::service("billing");

        let actions = process.current.actions_for(&billing);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].key, "approve");
        assert_eq!(process.current.instructions_for(&billing), Some("Charge the card"));
        assert!(process.current.find_action("cancel").is_some());
        assert!(process.current.find_action("refund").is_none());
    }

    #[test]
    fn directive_deserializes_from_camel_case() {
        let directive: Notify = serde_json::from_value(json!({
            "service": "billing",
            "trigger": "approve",
            "waitForReply": true,
            "responseTimeout": 5
        }))
        .unwrap();

        assert_eq!(directive.service, "billing");
        assert_eq!(directive.trigger.as_deref(), Some("approve"));
        assert_eq!(directive.wait_for_reply, Some(true));
        assert_eq!(directive.response_timeout, Some(5));
        assert_eq!(directive.actor().key(), "service:billing");
    }

    #[test]
    fn action_extra_attributes_round_trip() {
        let action: Action = serde_json::from_value(json!({
            "key": "approve",
            "actor": ["service:billing"],
            "title": "Approve payment"
        }))
        .unwrap();

        assert_eq!(action.extra.get("title"), Some(&json!("Approve payment")));
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"key": "approve", "actor": ["service:billing"], "title": "Approve payment"})
        );
    }
}
