//! Serializable session snapshot handed to external storage.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{HostRef, SessionId};

/// Point-in-time record of one session, used to restore it after a restart.
///
/// Only the visible characters of the screen are kept; colors and
/// attributes are not part of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionSnapshot {
    /// Session identifier
    pub session_id: SessionId,
    /// Target host
    pub host: HostRef,
    /// Visible screen text, one line per row
    pub emulator_text: String,
    /// Cursor column
    pub cursor_x: u16,
    /// Cursor row
    pub cursor_y: u16,
    /// Number of rows held in scrollback
    pub scrollback_depth: usize,
    /// Whether the transport was open
    pub connected: bool,
    /// Error reason, when the session was in the error state
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful connect
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Whether this was the active session
    pub is_active: bool,
}

impl SessionSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
