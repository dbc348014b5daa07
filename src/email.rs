//! Inbound email document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const METADATA_POINTER: &str = "/headers/X-MC-Metadata";

/// Email document relayed for delivery.
///
/// Kept opaque: the relay reads the subject and the metadata block for
/// verification and logging, everything else passes through untouched to
/// the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailPayload(Value);

impl EmailPayload {
    /// Parse a request body.
    ///
    /// `None` when the body is empty, unreadable or JSON `null`.
    pub fn from_slice(body: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Null) | Err(_) => None,
            Ok(value) => Some(Self(value)),
        }
    }

    fn metadata(&self, field: &str) -> &str {
        self.0
            .pointer(&format!("{METADATA_POINTER}/{field}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// `subject` field, used as logging context.
    pub fn subject(&self) -> &str {
        self.0
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Identifier of the meeting the email originates from.
    pub fn meeting_id(&self) -> &str {
        self.metadata("meeting_id")
    }

    /// Untrusted external user id, only ever used as a lookup key.
    pub fn external_user_id(&self) -> &str {
        self.metadata("user_id")
    }
}
