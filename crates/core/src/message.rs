//! Control messages sent from a page to the manager.

use serde::Deserialize;

/// Messages the manager understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Leave the installed state without waiting for older instances.
    SkipWaiting,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ControlMessage {
    /// Parse a message type name. Unknown types yield `None`.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "SKIP_WAITING" => Some(ControlMessage::SkipWaiting),
            _ => None,
        }
    }

    /// Parse the JSON payload a page posts, e.g. `{"type": "SKIP_WAITING"}`.
    ///
    /// Malformed payloads and unknown types are ignored.
    pub fn from_json(payload: &str) -> Option<Self> {
        let envelope: Envelope = serde_json::from_str(payload).ok()?;
        envelope.kind.as_deref().and_then(Self::from_type)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::SkipWaiting => "SKIP_WAITING",
        }
    }
}
