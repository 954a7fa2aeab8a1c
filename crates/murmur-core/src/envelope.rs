//! Envelope types exchanged over a live relay connection.
//!
//! Client-originated envelopes are addressed (`to`) and carry an opaque body
//! that the relay never looks at. Server-originated notices (presence,
//! delivery status, errors) are a separate, closed set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminator for envelopes a client may address to another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
    PublicKey,
    Encrypted,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::PublicKey => "publicKey",
            EnvelopeKind::Encrypted => "encrypted",
        }
    }
}

/// An addressed envelope travelling from one client to another.
///
/// Every field other than `type`, `to` and `from` lands in `body` and is
/// forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope with a single `payload` field.
    pub fn new(kind: EnvelopeKind, to: impl Into<String>, payload: Value) -> Self {
        let mut body = Map::new();
        body.insert("payload".to_string(), payload);
        Self {
            kind,
            to: to.into(),
            from: None,
            body,
        }
    }

    /// Overwrite the sender with the authenticated identity.
    pub fn stamp_sender(&mut self, username: &str) {
        self.from = Some(username.to_string());
    }

    pub fn payload(&self) -> Option<&Value> {
        self.body.get("payload")
    }
}

/// Server-originated notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    /// Full set of online usernames.
    Presence { users: Vec<String> },
    /// Delivery outcome. Only failures are ever sent.
    Status { ok: bool, message: String },
    /// Fatal-to-the-connection error, sent right before close.
    Error { error: String },
}

impl Notice {
    pub fn presence(users: Vec<String>) -> Self {
        Notice::Presence { users }
    }

    pub fn delivery_failed(message: impl Into<String>) -> Self {
        Notice::Status {
            ok: false,
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Notice::Error {
            error: error.into(),
        }
    }
}
