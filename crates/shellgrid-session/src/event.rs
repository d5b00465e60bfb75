//! Events published by the orchestrator.

use serde::Serialize;
use shellgrid_core::{SessionId, SessionState};

/// Something observable happened to a session.
///
/// Every event is sent on the owning session's channel and on the
/// orchestrator-wide channel. Subscribers only see events sent after they
/// subscribed; a late subscriber reads the terminal screen instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Bytes read from the transport, after the terminal processed them
    Data {
        /// Session the bytes belong to
        session_id: SessionId,
        /// Raw bytes as received
        bytes: Vec<u8>,
    },
    /// Lifecycle state changed
    StateChanged {
        /// Session that changed
        session_id: SessionId,
        /// Previous state
        previous: SessionState,
        /// New state
        state: SessionState,
    },
    /// The remote side rang the bell
    Bell {
        /// Session that rang
        session_id: SessionId,
    },
    /// The remote side set the window title
    TitleChanged {
        /// Session whose title changed
        session_id: SessionId,
        /// New title
        title: String,
    },
    /// The active session changed
    ActiveChanged {
        /// New active session, `None` when the registry is empty
        session_id: Option<SessionId>,
    },
    /// The session was closed and removed from the registry
    Closed {
        /// Session that was closed
        session_id: SessionId,
    },
}

impl SessionEvent {
    /// Session this event is about, if it is about a single session.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionEvent::Data { session_id, .. }
            | SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::Bell { session_id }
            | SessionEvent::TitleChanged { session_id, .. }
            | SessionEvent::Closed { session_id } => Some(*session_id),
            SessionEvent::ActiveChanged { session_id } => *session_id,
        }
    }
}
