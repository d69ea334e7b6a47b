//! Wire protocol for the chat socket
//!
//! Every frame in both directions is a `{"type": ..., "payload": ...}` envelope.
//! Clients may only submit `chatMessage` frames; `system` and `userCount`
//! frames are produced by the hub.

use serde::{Deserialize, Serialize};

/// Errors raised while decoding an inbound frame
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        source: serde_json::Error,
    },
}

/// A chat line, as fanned out to sessions and kept in history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
}

/// Universal frame shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Envelope {
    /// Server announcement, e.g. "alice joined"
    System { text: String },
    /// Number of currently connected sessions
    UserCount { count: usize },
    ChatMessage(ChatMessage),
}

impl Envelope {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn user_count(count: usize) -> Self {
        Self::UserCount { count }
    }

    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChatMessage(ChatMessage {
            username: username.into(),
            message: message.into(),
        })
    }

    /// Wire name of this envelope's type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::UserCount { .. } => "userCount",
            Self::ChatMessage(_) => "chatMessage",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Result of decoding a client frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A chat submission. `username` is left empty; whatever the client
    /// claimed is discarded and the session fills in its own identity.
    Chat(ChatMessage),
    /// Well-formed envelope of a type clients may not submit
    Ignored { kind: String },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatSubmission {
    message: String,
}

/// Decode one client frame (text or binary, both carry JSON)
pub fn decode(frame: &[u8]) -> Result<Inbound, ProtocolError> {
    let raw: RawFrame = serde_json::from_slice(frame)?;

    if raw.kind != "chatMessage" {
        return Ok(Inbound::Ignored { kind: raw.kind });
    }

    let submission: ChatSubmission =
        serde_json::from_value(raw.payload).map_err(|source| ProtocolError::InvalidPayload {
            kind: raw.kind,
            source,
        })?;

    Ok(Inbound::Chat(ChatMessage {
        username: String::new(),
        message: submission.message,
    }))
}
