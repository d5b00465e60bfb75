//! Remote session record.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use shellgrid_core::{
    HostRef, Position, SessionId, SessionInfo, SessionSnapshot, SessionState, TerminalSettings,
};
use shellgrid_emulator::Terminal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::AuthPrompt;
use crate::event::SessionEvent;
use crate::transport::{Credentials, Transport};

/// Mutable lifecycle fields, only changed by the orchestrator.
pub(crate) struct Lifecycle {
    pub(crate) state: SessionState,
    pub(crate) reconnect_attempts: u32,
    pub(crate) needs_reconnect: bool,
    pub(crate) last_connected_at: Option<DateTime<Utc>>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) prompt: Option<Arc<dyn AuthPrompt>>,
}

#[derive(Default)]
struct Tasks {
    read_pump: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    auto_attach: Option<JoinHandle<()>>,
}

/// One remote-shell connection and its terminal.
///
/// Sessions are created and driven by the
/// [`Orchestrator`](crate::Orchestrator); callers get shared handles to read
/// the terminal and subscribe to events.
pub struct Session {
    id: SessionId,
    host: HostRef,
    seq: u64,
    created_at: DateTime<Utc>,
    terminal: Arc<Terminal>,
    lifecycle: Mutex<Lifecycle>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Transport still in its handshake, reachable by teardown.
    pending: Mutex<Option<Arc<dyn Transport>>>,
    tasks: Mutex<Tasks>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        host: HostRef,
        seq: u64,
        created_at: DateTime<Utc>,
        settings: &TerminalSettings,
        event_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            id,
            host,
            seq,
            created_at,
            terminal: Arc::new(
                Terminal::from_settings(settings).with_event_capacity(event_capacity),
            ),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Disconnected,
                reconnect_attempts: 0,
                needs_reconnect: false,
                last_connected_at: None,
                credentials: None,
                prompt: None,
            }),
            transport: Mutex::new(None),
            pending: Mutex::new(None),
            tasks: Mutex::new(Tasks::default()),
            events,
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Target host.
    pub fn host(&self) -> &HostRef {
        &self.host
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The session's terminal emulator.
    pub fn terminal(&self) -> &Arc<Terminal> {
        &self.terminal
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state.clone()
    }

    /// Automatic reconnect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.lifecycle.lock().reconnect_attempts
    }

    /// Whether a reconnect is waiting for the network to come back.
    pub fn needs_reconnect(&self) -> bool {
        self.lifecycle.lock().needs_reconnect
    }

    /// Last successful connect.
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.lock().last_connected_at
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Subscribe to this session's events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Summary for listings.
    pub fn info(&self, is_active: bool) -> SessionInfo {
        let lifecycle = self.lifecycle.lock();
        SessionInfo {
            id: self.id,
            host: self.host.clone(),
            state: lifecycle.state.clone(),
            reconnect_attempts: lifecycle.reconnect_attempts,
            is_active,
            created_at: self.created_at,
            last_connected_at: lifecycle.last_connected_at,
        }
    }

    /// Serializable snapshot for external storage.
    pub fn snapshot(&self, is_active: bool) -> SessionSnapshot {
        let (connected, last_error, last_connected_at) = {
            let lifecycle = self.lifecycle.lock();
            (
                lifecycle.state.is_connected(),
                lifecycle.state.error_reason().map(str::to_string),
                lifecycle.last_connected_at,
            )
        };
        let cursor = self.terminal.cursor();

        SessionSnapshot {
            session_id: self.id,
            host: self.host.clone(),
            emulator_text: self.terminal.save_snapshot(),
            cursor_x: cursor.col,
            cursor_y: cursor.row,
            scrollback_depth: self.terminal.scrollback_len(),
            connected,
            last_error,
            created_at: self.created_at,
            last_connected_at,
            is_active,
        }
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Put restored screen text and cursor back. Only used before the
    /// session is registered.
    pub(crate) fn restore_from(&self, snapshot: &SessionSnapshot) {
        self.terminal.restore_snapshot(&snapshot.emulator_text);
        self.terminal
            .set_cursor(Position::new(snapshot.cursor_y, snapshot.cursor_x));
        self.lifecycle.lock().last_connected_at = snapshot.last_connected_at;
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().clone()
    }

    pub(crate) fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock() = Some(transport);
    }

    /// Park a transport whose handshake is in flight.
    pub(crate) fn set_pending(&self, transport: Arc<dyn Transport>) {
        *self.pending.lock() = Some(transport);
    }

    /// Take `transport` back out of the pending slot. False if a release
    /// already closed it.
    pub(crate) fn take_pending(&self, transport: &Arc<dyn Transport>) -> bool {
        let mut pending = self.pending.lock();
        if pending
            .as_ref()
            .is_some_and(|current| same_transport(current, transport))
        {
            *pending = None;
            true
        } else {
            false
        }
    }

    /// Whether `transport` is the one currently installed.
    pub(crate) fn is_current_transport(&self, transport: &Arc<dyn Transport>) -> bool {
        self.transport
            .lock()
            .as_ref()
            .is_some_and(|current| same_transport(current, transport))
    }

    pub(crate) fn set_read_pump(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.tasks.lock().read_pump.replace(handle) {
            old.abort();
        }
    }

    pub(crate) fn set_auto_attach(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.tasks.lock().auto_attach.replace(handle) {
            old.abort();
        }
    }

    pub(crate) fn set_reconnect_task(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.tasks.lock().reconnect.replace(handle) {
            old.abort();
        }
    }

    pub(crate) fn reconnect_running(&self) -> bool {
        self.tasks
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub(crate) fn cancel_reconnect(&self) {
        if let Some(handle) = self.tasks.lock().reconnect.take() {
            handle.abort();
        }
    }

    /// Stop the read pump and close the transport and any handshake in
    /// flight.
    pub(crate) async fn release_transport(&self) {
        {
            let mut tasks = self.tasks.lock();
            if let Some(handle) = tasks.read_pump.take() {
                handle.abort();
            }
            if let Some(handle) = tasks.auto_attach.take() {
                handle.abort();
            }
        }

        let pending = self.pending.lock().take();
        if let Some(transport) = pending {
            debug!(session_id = %self.id, "Closing transport mid-handshake");
            transport.close().await;
        }

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            debug!(session_id = %self.id, "Closing transport");
            transport.close().await;
        }
    }

    /// Single teardown path for closing a session. Returns false if the
    /// session was already torn down.
    pub(crate) async fn teardown(&self) -> bool {
        {
            // Marked under the lifecycle lock; see `Inner::persist`.
            let _lifecycle = self.lifecycle.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return false;
            }
        }
        self.cancel.cancel();
        self.cancel_reconnect();
        self.release_transport().await;
        true
    }
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}
