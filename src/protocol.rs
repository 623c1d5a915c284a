//! Browser protocol glue (spec.md §4.G).
//!
//! This is not part of the WebSocket core; it's the JSON envelope the
//! application layer wraps around broadcast text frames so a browser UI
//! can tell a system notice from a peer's chat line.

use serde::Serialize;

/// Server → UI envelope. UI → server frames are raw, unwrapped text
/// (spec.md §9 Open Questions: inbound frames are treated as opaque
/// UTF-8, not JSON).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    System { text: String },
    Message { #[serde(rename = "clientId")] client_id: u64, text: String },
}

impl Envelope {
    pub fn system(text: impl Into<String>) -> Self {
        Envelope::System { text: text.into() }
    }

    pub fn message(client_id: u64, text: impl Into<String>) -> Self {
        Envelope::Message {
            client_id,
            text: text.into(),
        }
    }

    /// Serialize to the exact JSON text written onto the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Envelope serialization is infallible")
    }
}
