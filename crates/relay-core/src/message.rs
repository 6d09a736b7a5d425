//! Chat message value type and its JSON wire shape.
//!
//! On the wire a message is a flat object with three string fields:
//!
//! ```json
//! {"id": "0192…", "username": "alice", "message": "hi"}
//! ```
//!
//! `sender` / `body` are accepted as aliases on input. Missing fields decode
//! as empty strings, so a client may (and usually does) omit `id`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned message identifier.
///
/// The empty string means "not yet stamped"; every message that leaves the
/// ingress loop carries a non-empty ID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an existing string.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the server has assigned this ID.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A chat message.
///
/// Fields are private: once a message has been stamped it is never mutated,
/// only cloned into each recipient's write.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    id: MessageId,
    #[serde(rename = "username", alias = "sender", default)]
    sender: String,
    #[serde(rename = "message", alias = "body", default)]
    body: String,
}

impl ChatMessage {
    /// Create an unstamped message.
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::default(),
            sender: sender.into(),
            body: body.into(),
        }
    }

    /// Decode a message from its JSON wire form.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode the message to its JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Replace the ID, discarding whatever the client supplied.
    #[must_use]
    pub fn stamped(self, id: MessageId) -> Self {
        Self { id, ..self }
    }

    /// Message ID.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Client-supplied display name.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Client-supplied content.
    pub fn body(&self) -> &str {
        &self.body
    }
}
