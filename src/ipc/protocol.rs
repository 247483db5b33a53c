//! JSON message protocol for the session control socket.

use crate::session::{SessionId, SettingsUpdate};
use serde::{Deserialize, Serialize};

/// Requests sent by a control client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Create a session, optionally overriding the configured defaults
    CreateSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<SettingsUpdate>,
    },
    /// Close and remove a session
    CloseSession { session_id: SessionId },
    /// Submit a typed user message
    SubmitText { session_id: SessionId, text: String },
    /// Change settings for subsequent generations
    Configure {
        session_id: SessionId,
        #[serde(flatten)]
        update: SettingsUpdate,
    },
    /// List character and script ids
    Catalog,
    Ping,
}

impl ControlRequest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Responses sent back on the same connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Created { session_id: SessionId },
    /// Text started a new turn
    Accepted { epoch: u64 },
    /// Empty or whitespace-only text
    Ignored,
    Ok,
    Catalog {
        characters: Vec<String>,
        scripts: Vec<String>,
    },
    Pong,
    Error { message: String },
}

impl ControlResponse {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}
