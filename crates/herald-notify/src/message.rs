//! Canonical notification payloads.
//!
//! Every transport sends the same body for a directive: either the directive's
//! explicit message, verbatim, or the canonical [`NotifyMessage`] describing
//! the process, the action the service is expected to perform, and the
//! process fingerprint.

use bytes::Bytes;
use herald_core::{Action, Notify, Process, ProcessId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NotifyError, Result};

/// Content type of JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type of text payloads.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Canonical notification message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    /// Process the notification is about.
    pub process: ProcessId,

    /// Action the service is asked to perform, when the directive names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    /// Actions the service may perform, when the directive names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,

    /// Instructions addressed to the service in the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Process fingerprint.
    pub etag: String,
}

impl NotifyMessage {
    /// Builds the canonical message for a directive.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` when the directive's trigger is not an action
    /// of the current state.
    pub fn for_directive(process: &Process, directive: &Notify) -> Result<Self> {
        let actor = directive.actor();
        let state = &process.current;

        let (action, actions) = match &directive.trigger {
            Some(key) => {
                let action = state.find_action(key).ok_or_else(|| NotifyError::ActionNotFound {
                    action: key.clone(),
                    state: state.key.clone(),
                    process: process.id.to_string(),
                })?;
                (Some(action.clone()), None)
            },
            None => (None, Some(state.actions_for(&actor).into_iter().cloned().collect())),
        };

        Ok(Self {
            process: process.id,
            action,
            actions,
            instructions: state.instructions_for(&actor).map(str::to_string),
            etag: process.fingerprint(),
        })
    }
}

/// Body of an outbound notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain text, sent as `text/plain`.
    Text(String),
    /// JSON document, sent as `application/json`.
    Json(Value),
}

impl Payload {
    /// Resolves the body to send for a directive.
    ///
    /// An explicit message replaces the canonical one: strings are sent as
    /// text, any other value as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` when the canonical message cannot resolve the
    /// trigger action.
    pub fn for_directive(process: &Process, directive: &Notify) -> Result<Self> {
        match &directive.message {
            Some(Value::String(text)) => Ok(Self::Text(text.clone())),
            Some(value) => Ok(Self::Json(value.clone())),
            None => {
                let message = NotifyMessage::for_directive(process, directive)?;
                let value = serde_json::to_value(message).map_err(|e| {
                    NotifyError::internal(format!("failed to encode notify message: {e}"))
                })?;
                Ok(Self::Json(value))
            },
        }
    }

    /// MIME type matching the payload.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Text(_) => CONTENT_TYPE_TEXT,
            Self::Json(_) => CONTENT_TYPE_JSON,
        }
    }

    /// Whether the payload is JSON.
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    /// Encoded body bytes.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text.clone()),
            Self::Json(value) => Bytes::from(value.to_string()),
        }
    }
}

/// Decodes a reply body by content type: JSON when the content type is
/// `application/json`, raw text otherwise.
///
/// Invalid JSON under a JSON content type falls back to the raw text.
pub fn decode_reply(content_type: Option<&str>, body: &[u8]) -> Value {
    let text = String::from_utf8_lossy(body);
    let is_json = content_type.is_some_and(|ct| ct.trim_start().starts_with(CONTENT_TYPE_JSON));

    if is_json {
        if let Ok(value) = serde_json::from_str(&text) {
            return value;
        }
        tracing::warn!(content_type, "reply declared as JSON could not be parsed, using raw text");
    }

    Value::String(text.into_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use herald_core::{ProcessEvent, State};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn test_process() -> Process {
        Process {
            id: ProcessId(Uuid::from_u128(1)),
            scenario: None,
            current: State {
                key: "review".to_string(),
                actions: vec![
                    Action::new("next", ["service:push", "service:reply"]),
                    Action::new("reject", ["reviewer"]),
                ],
                instructions: BTreeMap::from([("service:push".to_string(), "Go to next".to_string())]),
                notify: Vec::new(),
            },
            events: vec![ProcessEvent::new("1234")],
        }
    }

    #[test]
    fn canonical_message_lists_actions_for_service() {
        let payload = Payload::for_directive(&test_process(), &Notify::new("push")).unwrap();

        assert_eq!(
            payload,
            Payload::Json(json!({
                "process": "00000000-0000-0000-0000-000000000001",
                "actions": [{"key": "next", "actor": ["service:push", "service:reply"]}],
                "instructions": "Go to next",
                "etag": "1234"
            }))
        );
        assert_eq!(payload.content_type(), CONTENT_TYPE_JSON);
    }

    #[test]
    fn canonical_message_resolves_trigger_action() {
        let directive = Notify::new("reply").with_trigger("next");
        let message = NotifyMessage::for_directive(&test_process(), &directive).unwrap();

        assert_eq!(message.action.as_ref().map(|a| a.key.as_str()), Some("next"));
        assert!(message.actions.is_none());
        assert!(message.instructions.is_none());
        assert_eq!(message.etag, "1234");
    }

    #[test]
    fn unknown_trigger_is_rejected() {
        let directive = Notify::new("reply").with_trigger("approve");
        let error = NotifyMessage::for_directive(&test_process(), &directive).unwrap_err();

        assert_eq!(
            error.to_string(),
            "action approve not found in state review of process 00000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn explicit_message_replaces_canonical_payload() {
        let text = Notify::new("push").with_message("hello");
        let payload = Payload::for_directive(&test_process(), &text).unwrap();
        assert_eq!(payload, Payload::Text("hello".to_string()));
        assert_eq!(payload.content_type(), CONTENT_TYPE_TEXT);
        assert_eq!(payload.to_bytes(), Bytes::from_static(b"hello"));

        let object = Notify::new("push").with_message(json!({"custom": true}));
        let payload = Payload::for_directive(&test_process(), &object).unwrap();
        assert_eq!(payload, Payload::Json(json!({"custom": true})));
        assert_eq!(payload.to_bytes(), Bytes::from_static(br#"{"custom":true}"#));
    }

    #[test]
    fn replies_decoded_by_content_type() {
        assert_eq!(
            decode_reply(Some("application/json; charset=utf-8"), br#"{"approved":true}"#),
            json!({"approved": true})
        );
        assert_eq!(decode_reply(Some("text/plain"), b"{\"a\":1}"), json!("{\"a\":1}"));
        assert_eq!(decode_reply(None, b"ok"), json!("ok"));
        assert_eq!(decode_reply(Some("application/json"), b"not json"), json!("not json"));
    }
}
