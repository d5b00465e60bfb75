//! Session types shared between the orchestrator and its callers.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the remote host a session targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct HostRef {
    /// Display name chosen by the user
    pub name: String,
    /// Hostname or IP address
    pub hostname: String,
    /// Port number
    pub port: u16,
    /// Login user
    pub username: String,
}

impl HostRef {
    /// Create a new host reference.
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        port: u16,
        username: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            port,
            username: username.into(),
        }
    }

    /// `user@host:port`, used in logs and prompts.
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }
}

/// Lifecycle state of a session.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> {Disconnected | Error | Reconnecting}
/// Reconnecting -> {Connected | Error}
/// Error -> Connecting (user retry)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// No transport is open
    Disconnected,
    /// Connecting and authenticating
    Connecting,
    /// Transport open, read pump running
    Connected,
    /// Automatic reconnect in progress
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
    },
    /// Failed; carries a human-readable reason
    Error {
        /// Why the session failed
        reason: String,
    },
}

impl SessionState {
    /// Build an error state.
    pub fn error(reason: impl Into<String>) -> Self {
        SessionState::Error {
            reason: reason.into(),
        }
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Error reason, if any.
    pub fn error_reason(&self) -> Option<&str> {
        match self {
            SessionState::Error { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Besides the main diagram, a session may be explicitly disconnected
    /// from any in-flight state, a deferred reconnect resumes from `Error`,
    /// and `Reconnecting` may advance its attempt counter.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error { .. })
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Error { .. })
                | (Connected, Reconnecting { .. })
                | (Reconnecting { .. }, Connected)
                | (Reconnecting { .. }, Error { .. })
                | (Reconnecting { .. }, Reconnecting { .. })
                | (Reconnecting { .. }, Disconnected)
                | (Error { .. }, Connecting)
                | (Error { .. }, Reconnecting { .. })
                | (Error { .. }, Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            SessionState::Error { reason } => write!(f, "error: {reason}"),
        }
    }
}

/// Summary of a registered session, for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Target host
    pub host: HostRef,
    /// Current lifecycle state
    pub state: SessionState,
    /// Automatic reconnect attempts since the last successful connect
    pub reconnect_attempts: u32,
    /// Whether this session receives input by default
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful connect
    pub last_connected_at: Option<DateTime<Utc>>,
}
