//! Session orchestrator coordinating every remote session.
//!
//! The orchestrator owns the session registry and runs, per session, a read
//! pump feeding the terminal and, when a connection drops, an iterative
//! reconnect loop. Two orchestrator-wide timers send keep-alive probes and
//! offer snapshots to the [`SnapshotStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use shellgrid_core::{
    AutoAttachSettings, ClientConfig, Dimensions, Error, HostRef, Result, SessionId, SessionInfo,
    SessionSnapshot, SessionState, TerminalSettings, TransportError,
};
use shellgrid_emulator::TerminalEvent;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthPrompt, DenyAllPrompt, RelayPrompt};
use crate::event::SessionEvent;
use crate::persistence::{run_persist_worker, PersistCommand, SnapshotStore};
use crate::session::{Lifecycle, Session};
use crate::transport::{Credentials, Transport, TransportFactory};

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,

    /// Keep-alive interval in the foreground
    pub keep_alive_foreground: Duration,

    /// Keep-alive interval in the background
    pub keep_alive_background: Duration,

    /// Delay before each reconnect attempt
    pub reconnect_delay: Duration,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Snapshot timer period
    pub persist_interval: Duration,

    /// Capacity of each event channel
    pub event_capacity: usize,

    /// Settings for each session's terminal
    pub terminal: TerminalSettings,

    /// Multiplexer command sent after connecting
    pub auto_attach: AutoAttachSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for OrchestratorConfig {
    fn from(config: &ClientConfig) -> Self {
        let orchestrator = &config.orchestrator;
        Self {
            max_sessions: orchestrator.max_sessions,
            keep_alive_foreground: orchestrator.keep_alive_interval(false),
            keep_alive_background: orchestrator.keep_alive_interval(true),
            reconnect_delay: orchestrator.reconnect_delay(),
            max_reconnect_attempts: orchestrator.max_reconnect_attempts,
            persist_interval: orchestrator.persist_interval(),
            event_capacity: orchestrator.event_capacity,
            terminal: config.terminal.clone(),
            auto_attach: config.auto_attach.clone(),
        }
    }
}

/// Coordinates remote sessions, their transports and their terminals.
///
/// Must be created inside a Tokio runtime: construction spawns the
/// keep-alive loop, the persistence timer and the persistence worker.
/// Dropping the orchestrator stops them, like [`Orchestrator::shutdown`].
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn SnapshotStore>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    active: Mutex<Option<SessionId>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    network_available: AtomicBool,
    background: AtomicBool,
    mode_changed: Notify,
    persist_tx: mpsc::UnboundedSender<PersistCommand>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator and start its background tasks.
    pub fn new(
        config: OrchestratorConfig,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        tokio::spawn(run_persist_worker(Arc::clone(&store), persist_rx));

        info!(
            "Orchestrator started: max_sessions={}, reconnect_delay={:?}, max_reconnect_attempts={}",
            config.max_sessions, config.reconnect_delay, config.max_reconnect_attempts
        );

        let inner = Arc::new(Inner {
            config,
            factory,
            store,
            sessions: RwLock::new(HashMap::new()),
            active: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            events,
            network_available: AtomicBool::new(true),
            background: AtomicBool::new(false),
            mode_changed: Notify::new(),
            persist_tx,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_keep_alive(Arc::clone(&inner)));
        tokio::spawn(run_persist_timer(Arc::clone(&inner)));

        Self { inner }
    }

    /// Orchestrator configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Subscribe to events from every session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Register a new disconnected session for `host`.
    ///
    /// The first session registered becomes the active one.
    pub fn create_session(&self, host: HostRef) -> Result<SessionId> {
        let session_id = SessionId::new();
        let (session, became_active) = {
            let mut sessions = self.inner.sessions.write();
            if sessions.len() >= self.inner.config.max_sessions {
                warn!(
                    "Session limit reached: {} sessions",
                    self.inner.config.max_sessions
                );
                return Err(Error::SessionLimitReached(self.inner.config.max_sessions));
            }

            let session = Arc::new(self.inner.new_session(session_id, host, Utc::now()));
            sessions.insert(session_id, Arc::clone(&session));

            let mut active = self.inner.active.lock();
            let became_active = active.is_none();
            if became_active {
                *active = Some(session_id);
            }
            (session, became_active)
        };

        info!(
            session_id = %session_id,
            "Session created: host={}",
            session.host().address()
        );

        if became_active {
            self.inner.emit_global(SessionEvent::ActiveChanged {
                session_id: Some(session_id),
            });
        }
        self.inner.persist(&session);

        Ok(session_id)
    }

    /// Connect a session, relaying host-key and password questions to
    /// `prompt`.
    ///
    /// On failure the session moves to the error state with the transport's
    /// reason and the error is also returned.
    pub async fn connect(
        &self,
        session_id: SessionId,
        credentials: Credentials,
        prompt: Arc<dyn AuthPrompt>,
    ) -> Result<()> {
        let session = self.inner.get(session_id)?;
        if !check_can_connect(&session)? {
            return Ok(());
        }
        {
            let mut lifecycle = session.lifecycle();
            lifecycle.credentials = Some(credentials);
            lifecycle.prompt = Some(prompt);
        }
        session.cancel_reconnect();
        self.inner.connect_session(&session).await
    }

    /// Retry a disconnected or failed session with the credentials last
    /// passed to [`Orchestrator::connect`].
    pub async fn reconnect(&self, session_id: SessionId) -> Result<()> {
        let session = self.inner.get(session_id)?;
        if !check_can_connect(&session)? {
            return Ok(());
        }
        info!(session_id = %session_id, "Manual reconnect requested");
        session.cancel_reconnect();
        self.inner.connect_session(&session).await
    }

    /// Close the transport but keep the session registered.
    pub async fn disconnect(&self, session_id: SessionId) -> Result<()> {
        let session = self.inner.get(session_id)?;
        session.cancel_reconnect();
        session.release_transport().await;
        if self
            .inner
            .transition(&session, SessionState::Disconnected, |lifecycle| {
                lifecycle.needs_reconnect = false;
            })
        {
            info!(session_id = %session_id, "Session disconnected");
        }
        Ok(())
    }

    /// Write bytes to a connected session.
    ///
    /// A write failure puts the session on the reconnect path.
    pub async fn send_data(&self, session_id: SessionId, data: &[u8]) -> Result<()> {
        let session = self.inner.get(session_id)?;
        if !session.state().is_connected() {
            return Err(Error::NotConnected(session_id));
        }
        let transport = session
            .transport()
            .ok_or(Error::NotConnected(session_id))?;

        debug!(session_id = %session_id, "Sending {} bytes", data.len());
        if let Err(e) = transport.write(data).await {
            warn!(session_id = %session_id, "Write failed: {}", e);
            self.inner
                .handle_transport_failure(&session, &transport, e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    /// Resize the session's terminal and, when connected, the remote side.
    pub async fn resize(&self, session_id: SessionId, dimensions: Dimensions) -> Result<()> {
        if dimensions.is_empty() {
            return Err(Error::InvalidDimensions {
                rows: dimensions.rows,
                cols: dimensions.cols,
            });
        }
        let session = self.inner.get(session_id)?;
        session.terminal().resize(dimensions);

        if let Some(transport) = session.transport() {
            if let Err(e) = transport.resize(dimensions.cols, dimensions.rows).await {
                warn!(session_id = %session_id, "Remote resize failed: {}", e);
            }
        }
        Ok(())
    }

    /// Make `session_id` the active session. Unknown ids are ignored.
    pub fn switch_active(&self, session_id: SessionId) {
        let previous = {
            let sessions = self.inner.sessions.read();
            if !sessions.contains_key(&session_id) {
                debug!(session_id = %session_id, "Ignoring switch to unknown session");
                return;
            }
            self.inner.active.lock().replace(session_id)
        };
        if previous == Some(session_id) {
            return;
        }

        info!(session_id = %session_id, "Active session changed");
        self.inner.emit_global(SessionEvent::ActiveChanged {
            session_id: Some(session_id),
        });
        for id in previous.into_iter().chain(Some(session_id)) {
            if let Ok(session) = self.inner.get(id) {
                self.inner.persist(&session);
            }
        }
    }

    /// Tear down a session and remove it from the registry.
    ///
    /// If it was active, the oldest remaining session becomes active.
    pub async fn close_session(&self, session_id: SessionId) -> Result<()> {
        let (session, active_changed) = {
            let mut sessions = self.inner.sessions.write();
            let session = sessions
                .remove(&session_id)
                .ok_or(Error::SessionNotFound(session_id))?;

            let mut active = self.inner.active.lock();
            let active_changed = if *active == Some(session_id) {
                *active = sessions
                    .values()
                    .min_by_key(|candidate| candidate.seq())
                    .map(|candidate| candidate.id());
                Some(*active)
            } else {
                None
            };
            (session, active_changed)
        };

        session.teardown().await;
        self.inner.queue(PersistCommand::Delete(session_id));
        info!(session_id = %session_id, "Session closed");
        self.inner
            .emit(&session, SessionEvent::Closed { session_id });

        if let Some(active) = active_changed {
            self.inner
                .emit_global(SessionEvent::ActiveChanged { session_id: active });
            if let Some(id) = active {
                if let Ok(next) = self.inner.get(id) {
                    self.inner.persist(&next);
                }
            }
        }
        Ok(())
    }

    /// Close every session.
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = self
            .inner
            .sessions_in_order()
            .iter()
            .map(|session| session.id())
            .collect();

        for id in ids {
            let _ = self.close_session(id).await;
        }
    }

    /// Report whether the network is reachable.
    ///
    /// When it comes back, deferred reconnects resume.
    pub fn set_network_available(&self, available: bool) {
        let was = self
            .inner
            .network_available
            .swap(available, Ordering::SeqCst);
        if was == available {
            return;
        }
        info!("Network available: {}", available);
        if available {
            self.inner.resume_deferred_reconnects();
        }
    }

    /// Whether the network is considered reachable.
    pub fn is_network_available(&self) -> bool {
        self.inner.network_available()
    }

    /// Switch keep-alive probing between the foreground and background
    /// intervals.
    pub fn set_background(&self, background: bool) {
        if self.inner.background.swap(background, Ordering::SeqCst) != background {
            debug!("Background mode: {}", background);
            self.inner.mode_changed.notify_waiters();
        }
    }

    /// Recreate sessions from stored snapshots, all disconnected.
    ///
    /// Ids already registered are skipped, and restoring stops at capacity.
    /// The snapshot marked active becomes active, otherwise the first
    /// restored session if none is active yet.
    pub fn restore(&self, mut snapshots: Vec<SessionSnapshot>) -> Vec<SessionId> {
        snapshots.sort_by_key(|snapshot| snapshot.created_at);

        let mut restored = Vec::new();
        let mut marked_active = None;
        for snapshot in snapshots {
            let session_id = snapshot.session_id;
            {
                let mut sessions = self.inner.sessions.write();
                if sessions.contains_key(&session_id) {
                    warn!(session_id = %session_id, "Session already registered, skipping snapshot");
                    continue;
                }
                if sessions.len() >= self.inner.config.max_sessions {
                    warn!(
                        "Session limit reached, skipping remaining snapshots from {}",
                        session_id
                    );
                    break;
                }

                let session = self.inner.new_session(
                    session_id,
                    snapshot.host.clone(),
                    snapshot.created_at,
                );
                session.restore_from(&snapshot);
                sessions.insert(session_id, Arc::new(session));
            }

            debug!(session_id = %session_id, "Session restored");
            if snapshot.is_active {
                marked_active = Some(session_id);
            }
            restored.push(session_id);
        }

        let active_changed = {
            let mut active = self.inner.active.lock();
            let next = marked_active.or(if active.is_none() {
                restored.first().copied()
            } else {
                None
            });
            match next {
                Some(id) if *active != Some(id) => {
                    *active = Some(id);
                    true
                }
                _ => false,
            }
        };

        info!("Restored {} sessions", restored.len());
        if active_changed {
            self.inner.emit_global(SessionEvent::ActiveChanged {
                session_id: self.active_session(),
            });
        }
        restored
    }

    /// Load snapshots from the store and restore them.
    pub async fn restore_from_store(&self) -> Result<Vec<SessionId>> {
        let snapshots = self.inner.store.load_all_snapshots().await?;
        Ok(self.restore(snapshots))
    }

    /// Snapshots of every session, in creation order.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let active = self.active_session();
        self.inner
            .sessions_in_order()
            .iter()
            .map(|session| session.snapshot(active == Some(session.id())))
            .collect()
    }

    /// Summaries of every session, in creation order.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let active = self.active_session();
        self.inner
            .sessions_in_order()
            .iter()
            .map(|session| session.info(active == Some(session.id())))
            .collect()
    }

    /// Look up a session.
    pub fn session(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.inner.get(session_id).ok()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// The active session, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        *self.inner.active.lock()
    }

    /// Stop every background task after offering final snapshots.
    ///
    /// Transports are left open so the caller decides whether live
    /// connections outlive the orchestrator.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down orchestrator");
        self.inner.persist_all();
        self.inner.shutdown.cancel();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("sessions", &self.session_count())
            .field("active", &self.active_session())
            .finish()
    }
}

/// Returns Ok(false) when the session is already connected.
fn check_can_connect(session: &Session) -> Result<bool> {
    match session.state() {
        SessionState::Connected => {
            debug!(session_id = %session.id(), "Already connected");
            Ok(false)
        }
        SessionState::Connecting | SessionState::Reconnecting { .. } => Err(
            Error::InvalidInput(format!("session {} is already connecting", session.id())),
        ),
        SessionState::Disconnected | SessionState::Error { .. } => Ok(true),
    }
}

impl Inner {
    fn new_session(
        &self,
        session_id: SessionId,
        host: HostRef,
        created_at: DateTime<Utc>,
    ) -> Session {
        Session::new(
            session_id,
            host,
            self.next_seq.fetch_add(1, Ordering::SeqCst),
            created_at,
            &self.config.terminal,
            self.config.event_capacity,
            self.shutdown.child_token(),
        )
    }

    fn get(&self, session_id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(Error::SessionNotFound(session_id))
    }

    fn sessions_in_order(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|session| session.seq());
        sessions
    }

    fn network_available(&self) -> bool {
        self.network_available.load(Ordering::SeqCst)
    }

    fn keep_alive_interval(&self) -> Duration {
        if self.background.load(Ordering::SeqCst) {
            self.config.keep_alive_background
        } else {
            self.config.keep_alive_foreground
        }
    }

    fn is_active(&self, session_id: SessionId) -> bool {
        *self.active.lock() == Some(session_id)
    }

    fn emit(&self, session: &Session, event: SessionEvent) {
        session.publish(event.clone());
        let _ = self.events.send(event);
    }

    fn emit_global(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn queue(&self, command: PersistCommand) {
        if self.persist_tx.send(command).is_err() {
            debug!("Persistence worker stopped, dropping snapshot");
        }
    }

    /// Offer a snapshot unless the session is closed. The check and the
    /// enqueue share the lifecycle lock with `Session::teardown`, so a
    /// save never lands after the delete queued by `close_session`.
    fn persist(&self, session: &Session) {
        let snapshot = session.snapshot(self.is_active(session.id()));
        let _lifecycle = session.lifecycle();
        if session.is_closed() {
            debug!(session_id = %session.id(), "Skipping snapshot of closed session");
            return;
        }
        self.queue(PersistCommand::Save(Box::new(snapshot)));
    }

    fn persist_all(&self) {
        for session in self.sessions_in_order() {
            self.persist(&session);
        }
    }

    /// Move a session to `next` if the transition is legal, applying
    /// `update` under the same lock. Emits the state change and offers a
    /// snapshot. Returns false when the transition was refused.
    fn transition(
        &self,
        session: &Session,
        next: SessionState,
        update: impl FnOnce(&mut Lifecycle),
    ) -> bool {
        if session.is_closed() {
            return false;
        }

        let previous = {
            let mut lifecycle = session.lifecycle();
            if !lifecycle.state.can_transition_to(&next) {
                debug!(
                    session_id = %session.id(),
                    "Ignoring transition: {} → {}",
                    lifecycle.state,
                    next
                );
                return false;
            }
            update(&mut lifecycle);
            std::mem::replace(&mut lifecycle.state, next.clone())
        };

        info!(
            session_id = %session.id(),
            "Session state changed: {} → {}",
            previous,
            next
        );
        self.emit(
            session,
            SessionEvent::StateChanged {
                session_id: session.id(),
                previous,
                state: next,
            },
        );
        self.persist(session);
        true
    }

    async fn connect_session(self: &Arc<Self>, session: &Arc<Session>) -> Result<()> {
        session.release_transport().await;

        if !self.transition(session, SessionState::Connecting, |lifecycle| {
            lifecycle.reconnect_attempts = 0;
            lifecycle.needs_reconnect = false;
        }) {
            return Err(Error::InvalidInput(format!(
                "session {} cannot connect from state {}",
                session.id(),
                session.state()
            )));
        }

        info!(
            session_id = %session.id(),
            "Connecting to {}",
            session.host().address()
        );
        match self.open_transport(session).await {
            Ok(transport) => self.on_connected(session, transport).await,
            Err(e) => {
                warn!(session_id = %session.id(), "Connection failed: {}", e);
                self.transition(session, SessionState::error(e.to_string()), |_| {});
                Err(e.into())
            }
        }
    }

    /// Create a transport and authenticate it.
    async fn open_transport(
        &self,
        session: &Session,
    ) -> std::result::Result<Arc<dyn Transport>, TransportError> {
        let (credentials, prompt) = {
            let lifecycle = session.lifecycle();
            (lifecycle.credentials.clone(), lifecycle.prompt.clone())
        };
        let credentials = credentials.unwrap_or_default();
        let prompt = prompt.unwrap_or_else(|| Arc::new(DenyAllPrompt) as Arc<dyn AuthPrompt>);
        let relay = RelayPrompt::new(session.id(), prompt);

        // Parked until installed, so a release during the handshake
        // closes it even if this future is dropped.
        let transport = self.factory.create(session.host());
        session.set_pending(Arc::clone(&transport));

        if let Err(e) = transport
            .connect(session.host(), &credentials, &relay)
            .await
        {
            if session.take_pending(&transport) {
                transport.close().await;
            }
            return Err(e);
        }

        let dimensions = session.terminal().dimensions();
        if let Err(e) = transport.resize(dimensions.cols, dimensions.rows).await {
            debug!(session_id = %session.id(), "Initial resize failed: {}", e);
        }

        if !session.take_pending(&transport) {
            debug!(session_id = %session.id(), "Handshake cancelled");
            return Err(TransportError::Other("Connection cancelled".to_string()));
        }
        Ok(transport)
    }

    /// Install a freshly connected transport and start its tasks.
    async fn on_connected(
        self: &Arc<Self>,
        session: &Arc<Session>,
        transport: Arc<dyn Transport>,
    ) -> Result<()> {
        session.set_transport(Arc::clone(&transport));

        let now = Utc::now();
        if !self.transition(session, SessionState::Connected, |lifecycle| {
            lifecycle.reconnect_attempts = 0;
            lifecycle.needs_reconnect = false;
            lifecycle.last_connected_at = Some(now);
        }) {
            // Disconnected or closed while the handshake was in flight.
            session.release_transport().await;
            return Err(Error::NotConnected(session.id()));
        }

        session.set_read_pump(tokio::spawn(run_read_pump(
            Arc::clone(self),
            Arc::clone(session),
            Arc::clone(&transport),
        )));

        if self.config.auto_attach.enabled {
            session.set_auto_attach(tokio::spawn(run_auto_attach(
                Arc::clone(self),
                Arc::clone(session),
                transport,
            )));
        }

        if session.is_closed() {
            session.release_transport().await;
        }
        Ok(())
    }

    /// React to a failure on `transport`, unless it has already been
    /// replaced.
    fn handle_transport_failure(
        self: &Arc<Self>,
        session: &Arc<Session>,
        transport: &Arc<dyn Transport>,
        reason: String,
    ) {
        if !session.is_current_transport(transport) {
            debug!(session_id = %session.id(), "Ignoring failure on stale transport");
            return;
        }
        self.handle_connection_lost(session, reason);
    }

    /// Only acts on a connected session, so concurrent detections of the
    /// same loss collapse into one.
    fn handle_connection_lost(self: &Arc<Self>, session: &Arc<Session>, reason: String) {
        if !self.transition(session, SessionState::error(reason.clone()), |lifecycle| {
            lifecycle.needs_reconnect = true;
        }) {
            return;
        }
        warn!(session_id = %session.id(), "Connection lost: {}", reason);

        if self.network_available() {
            self.spawn_reconnect(session);
        } else {
            info!(session_id = %session.id(), "Network unavailable, reconnect deferred");
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, session: &Arc<Session>) {
        session.set_reconnect_task(tokio::spawn(run_reconnect(
            Arc::clone(self),
            Arc::clone(session),
        )));
    }

    fn resume_deferred_reconnects(self: &Arc<Self>) {
        for session in self.sessions_in_order() {
            let deferred = {
                let lifecycle = session.lifecycle();
                lifecycle.needs_reconnect
                    && matches!(lifecycle.state, SessionState::Error { .. })
            };
            if deferred && !session.reconnect_running() {
                info!(session_id = %session.id(), "Resuming deferred reconnect");
                self.spawn_reconnect(&session);
            }
        }
    }

    fn probe_connected_sessions(self: &Arc<Self>) {
        for session in self.sessions_in_order() {
            if !session.state().is_connected() {
                continue;
            }
            let Some(transport) = session.transport() else {
                continue;
            };

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                if !transport.send_keep_alive().await {
                    warn!(session_id = %session.id(), "Keep-alive failed");
                    inner.handle_transport_failure(
                        &session,
                        &transport,
                        "Keep-alive failed".to_string(),
                    );
                }
            });
        }
    }
}

/// Feed transport output into the terminal until the connection ends or
/// the session is cancelled.
async fn run_read_pump(inner: Arc<Inner>, session: Arc<Session>, transport: Arc<dyn Transport>) {
    let session_id = session.id();
    let mut terminal_events = session.terminal().subscribe();
    debug!(session_id = %session_id, "Read pump started");

    loop {
        let result = tokio::select! {
            _ = session.cancel_token().cancelled() => break,
            result = transport.read() => result,
        };

        match result {
            Ok(Some(bytes)) => {
                session.terminal().process(&bytes);
                forward_terminal_events(&inner, &session, &mut terminal_events);
                inner.emit(&session, SessionEvent::Data { session_id, bytes });
            }
            Ok(None) => {
                inner.handle_transport_failure(
                    &session,
                    &transport,
                    TransportError::EndOfStream.to_string(),
                );
                break;
            }
            Err(e) => {
                inner.handle_transport_failure(&session, &transport, e.to_string());
                break;
            }
        }
    }

    debug!(session_id = %session_id, "Read pump stopped");
}

fn forward_terminal_events(
    inner: &Inner,
    session: &Session,
    events: &mut broadcast::Receiver<TerminalEvent>,
) {
    let session_id = session.id();
    loop {
        match events.try_recv() {
            Ok(TerminalEvent::Bell) => inner.emit(session, SessionEvent::Bell { session_id }),
            Ok(TerminalEvent::TitleChanged(title)) => {
                inner.emit(session, SessionEvent::TitleChanged { session_id, title })
            }
            Err(TryRecvError::Lagged(skipped)) => {
                debug!(session_id = %session_id, "Skipped {} terminal events", skipped);
            }
            Err(_) => break,
        }
    }
}

/// Iterative reconnect: each attempt waits the configured delay, and after
/// the last failed attempt the session stays in the error state.
async fn run_reconnect(inner: Arc<Inner>, session: Arc<Session>) {
    let session_id = session.id();
    session.release_transport().await;

    let max_attempts = inner.config.max_reconnect_attempts;
    loop {
        let attempt = session.reconnect_attempts() + 1;
        if attempt > max_attempts {
            warn!(
                session_id = %session_id,
                "Reconnection failed after {} attempts",
                max_attempts
            );
            inner.transition(&session, SessionState::error("Reconnection failed"), |lifecycle| {
                lifecycle.needs_reconnect = false;
            });
            return;
        }

        if !inner.transition(&session, SessionState::Reconnecting { attempt }, |lifecycle| {
            lifecycle.reconnect_attempts = attempt;
        }) {
            return;
        }
        info!(
            session_id = %session_id,
            "Reconnect attempt {}/{} in {:?}",
            attempt,
            max_attempts,
            inner.config.reconnect_delay
        );

        tokio::select! {
            _ = session.cancel_token().cancelled() => return,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }

        if !inner.network_available() {
            info!(session_id = %session_id, "Network lost during reconnect, deferring");
            inner.transition(&session, SessionState::error("Network unavailable"), |lifecycle| {
                lifecycle.needs_reconnect = true;
            });
            return;
        }

        match inner.open_transport(&session).await {
            Ok(transport) => {
                if let Err(e) = inner.on_connected(&session, transport).await {
                    debug!(session_id = %session_id, "Reconnect superseded: {}", e);
                }
                return;
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    "Reconnect attempt {} failed: {}",
                    attempt,
                    e
                );
            }
        }
    }
}

async fn run_auto_attach(inner: Arc<Inner>, session: Arc<Session>, transport: Arc<dyn Transport>) {
    let settings = &inner.config.auto_attach;
    tokio::select! {
        _ = session.cancel_token().cancelled() => return,
        _ = tokio::time::sleep(settings.delay()) => {}
    }
    if !session.state().is_connected() {
        return;
    }

    debug!(
        session_id = %session.id(),
        "Attaching to multiplexer session '{}'",
        settings.session_name
    );
    if let Err(e) = transport.write(settings.command().as_bytes()).await {
        warn!(session_id = %session.id(), "Auto-attach write failed: {}", e);
        inner.handle_transport_failure(&session, &transport, e.to_string());
    }
}

async fn run_keep_alive(inner: Arc<Inner>) {
    loop {
        let interval = inner.keep_alive_interval();
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.mode_changed.notified() => continue,
            _ = tokio::time::sleep(interval) => {}
        }
        inner.probe_connected_sessions();
    }
    debug!("Keep-alive loop stopped");
}

async fn run_persist_timer(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(inner.config.persist_interval) => {}
        }
        inner.persist_all();
    }
    debug!("Persistence timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySnapshotStore;
    use async_trait::async_trait;

    struct RefusingFactory;

    struct RefusingTransport;

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn connect(
            &self,
            target: &HostRef,
            _credentials: &Credentials,
            _prompt: &dyn AuthPrompt,
        ) -> std::result::Result<(), TransportError> {
            Err(TransportError::ConnectionRefused(target.address()))
        }

        async fn write(&self, _data: &[u8]) -> std::result::Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }

        async fn read(&self) -> std::result::Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }

        async fn resize(&self, _cols: u16, _rows: u16) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn send_keep_alive(&self) -> bool {
            false
        }

        async fn close(&self) {}
    }

    impl TransportFactory for RefusingFactory {
        fn create(&self, _host: &HostRef) -> Arc<dyn Transport> {
            Arc::new(RefusingTransport)
        }
    }

    fn orchestrator(config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::new(RefusingFactory),
            Arc::new(MemorySnapshotStore::new()),
        )
    }

    fn host() -> HostRef {
        HostRef::new("box", "10.0.0.2", 22, "root")
    }

    #[test]
    fn test_config_from_client_config() {
        let mut client = ClientConfig::default();
        client.orchestrator.max_sessions = 3;
        client.orchestrator.reconnect_delay_ms = 100;
        client.auto_attach.enabled = true;

        let config = OrchestratorConfig::from(&client);
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.reconnect_delay, Duration::from_millis(100));
        assert_eq!(config.keep_alive_foreground, Duration::from_secs(30));
        assert_eq!(config.keep_alive_background, Duration::from_secs(60));
        assert!(config.auto_attach.enabled);
    }

    #[tokio::test]
    async fn test_create_session_limit() {
        let config = OrchestratorConfig {
            max_sessions: 2,
            ..Default::default()
        };
        let orchestrator = orchestrator(config);

        orchestrator.create_session(host()).unwrap();
        orchestrator.create_session(host()).unwrap();
        let err = orchestrator.create_session(host()).unwrap_err();
        assert!(matches!(err, Error::SessionLimitReached(2)));
        assert_eq!(orchestrator.session_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_refused_sets_error() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let id = orchestrator.create_session(host()).unwrap();

        let result = orchestrator
            .connect(id, Credentials::default(), Arc::new(DenyAllPrompt))
            .await;
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::ConnectionRefused(_)))
        ));

        let session = orchestrator.session(id).unwrap();
        assert_eq!(
            session.state(),
            SessionState::error("Connection refused: root@10.0.0.2:22")
        );
    }

    #[tokio::test]
    async fn test_send_data_requires_connection() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let id = orchestrator.create_session(host()).unwrap();

        let err = orchestrator.send_data(id, b"ls\n").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let err = orchestrator.close_session(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_resize_rejects_empty_dimensions() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let id = orchestrator.create_session(host()).unwrap();

        let err = orchestrator
            .resize(id, Dimensions::new(0, 80))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { rows: 0, cols: 80 }));

        orchestrator
            .resize(id, Dimensions::new(40, 120))
            .await
            .unwrap();
        let session = orchestrator.session(id).unwrap();
        assert_eq!(session.terminal().dimensions(), Dimensions::new(40, 120));
    }

    #[tokio::test]
    async fn test_persist_skips_closed_session() {
        let store = Arc::new(MemorySnapshotStore::new());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(RefusingFactory),
            store.clone(),
        );
        let closing = orchestrator.create_session(host()).unwrap();
        let open = orchestrator.create_session(host()).unwrap();
        for _ in 0..100 {
            if store.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.len(), 2);

        // Handle taken by a timer pass before the close
        let session = orchestrator.session(closing).unwrap();
        orchestrator.close_session(closing).await.unwrap();
        orchestrator.inner.persist(&session);

        // FIFO worker: once this lands, the earlier commands have too
        let marker = orchestrator.session(open).unwrap();
        marker.terminal().process(b"marker");
        orchestrator.inner.persist(&marker);
        let landed = |store: &MemorySnapshotStore| {
            store
                .get(&open)
                .is_some_and(|s| s.emulator_text.starts_with("marker"))
        };
        for _ in 0..100 {
            if landed(&store) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(landed(&store));
        assert!(store.get(&closing).is_none());
    }
}
