use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The unit of communication between the coordinator, tabs and the native
/// host. `action` and `request` are mutually exclusive roles: an action is
/// fire-and-forget, a request expects a reply carrying the same
/// `correlationId`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub input: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sender: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub receiver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Message {
    pub fn action(name: &str, sender: &str, receiver: &str) -> Self {
        Self {
            action: Some(name.to_string()),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            ..Default::default()
        }
    }

    pub fn request(name: &str, sender: &str, receiver: &str) -> Self {
        Self {
            request: Some(name.to_string()),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            ..Default::default()
        }
    }

    /// Builds the reply envelope for a request: addresses flipped, the
    /// correlation id carried over unmodified.
    pub fn reply_to(request: &Message, response: Value) -> Self {
        Self {
            sender: request.receiver.clone(),
            receiver: request.sender.clone(),
            correlation_id: request.correlation_id.clone(),
            response: Some(response),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, name: &str, value: Value) -> Self {
        self.input.insert(name.to_string(), value);
        self
    }

    /// The behavior-selecting tag, regardless of role.
    pub fn tag(&self) -> Option<&str> {
        self.request.as_deref().or(self.action.as_deref())
    }

    pub fn is_request(&self) -> bool {
        self.request.is_some()
    }

    /// A reply carries both the correlation id of its request and a
    /// response payload.
    pub fn is_reply(&self) -> bool {
        self.correlation_id.is_some() && self.response.is_some()
    }

    /// The native host answers `{}` when it has nothing to push; such
    /// messages are dropped before routing.
    pub fn is_empty(&self) -> bool {
        self.action.is_none()
            && self.request.is_none()
            && self.response.is_none()
            && self.receiver.is_empty()
    }
}
