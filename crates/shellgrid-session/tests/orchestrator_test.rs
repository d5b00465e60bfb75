//! Integration tests for the orchestrator, driven by a scripted transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shellgrid_core::{Dimensions, Error, HostRef, SessionId, SessionState, TransportError};
use shellgrid_session::{
    AuthPrompt, AuthRequest, ChannelAuthPrompt, Credentials, DenyAllPrompt,
    HostKeyVerificationRequest, MemorySnapshotStore, Orchestrator, OrchestratorConfig,
    SessionEvent, SnapshotStore, Transport, TransportFactory,
};
use tokio::sync::{broadcast, mpsc};

type ReadItem = Result<Option<Vec<u8>>, TransportError>;

struct MockTransport {
    connect_result: Result<(), TransportError>,
    ask_host_key: bool,
    inbound_tx: mpsc::UnboundedSender<ReadItem>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ReadItem>>,
    written: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<(u16, u16)>>,
    fail_writes: AtomicBool,
    keep_alive_ok: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    fn new(connect_result: Result<(), TransportError>, ask_host_key: bool) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            connect_result,
            ask_host_key,
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            written: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            keep_alive_ok: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    fn feed(&self, bytes: &[u8]) {
        self.inbound_tx.send(Ok(Some(bytes.to_vec()))).unwrap();
    }

    fn drop_connection(&self) {
        self.inbound_tx
            .send(Err(TransportError::ConnectionLost("reset".to_string())))
            .unwrap();
    }

    fn end_stream(&self) {
        self.inbound_tx.send(Ok(None)).unwrap();
    }

    fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        target: &HostRef,
        _credentials: &Credentials,
        prompt: &dyn AuthPrompt,
    ) -> Result<(), TransportError> {
        if self.ask_host_key {
            let request = HostKeyVerificationRequest {
                session_id: None,
                host: target.clone(),
                key_type: "ssh-ed25519".to_string(),
                fingerprint: "SHA256:mock".to_string(),
            };
            if !prompt.verify_host_key(request).await {
                return Err(TransportError::HostKeyRejected(target.address()));
            }
        }
        self.connect_result.clone()
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed("broken pipe".to_string()));
        }
        self.written.lock().extend_from_slice(data);
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TransportError> {
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    async fn send_keep_alive(&self) -> bool {
        self.keep_alive_ok.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockFactory {
    outcomes: Mutex<VecDeque<Result<(), TransportError>>>,
    created: Mutex<Vec<Arc<MockTransport>>>,
    ask_host_key: AtomicBool,
}

impl MockFactory {
    fn fail_next(&self, count: usize, error: TransportError) {
        let mut outcomes = self.outcomes.lock();
        for _ in 0..count {
            outcomes.push_back(Err(error.clone()));
        }
    }

    fn transport(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.created.lock()[index])
    }

    fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, _host: &HostRef) -> Arc<dyn Transport> {
        let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
        let transport = Arc::new(MockTransport::new(
            outcome,
            self.ask_host_key.load(Ordering::SeqCst),
        ));
        self.created.lock().push(Arc::clone(&transport));
        transport
    }
}

struct Harness {
    orchestrator: Orchestrator,
    factory: Arc<MockFactory>,
    store: Arc<MemorySnapshotStore>,
}

fn harness(config: OrchestratorConfig) -> Harness {
    let factory = Arc::new(MockFactory::default());
    let store = Arc::new(MemorySnapshotStore::new());
    let orchestrator = Orchestrator::new(config, factory.clone(), store.clone());
    Harness {
        orchestrator,
        factory,
        store,
    }
}

fn host(name: &str) -> HostRef {
    HostRef::new(name, "10.0.0.2", 22, "root")
}

async fn connect(orchestrator: &Orchestrator, id: SessionId) {
    orchestrator
        .connect(id, Credentials::password("secret"), Arc::new(DenyAllPrompt))
        .await
        .unwrap();
}

async fn wait_for_state(
    rx: &mut broadcast::Receiver<SessionEvent>,
    id: SessionId,
    matches: impl Fn(&SessionState) -> bool,
) -> SessionState {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::StateChanged {
                    session_id, state, ..
                }) if session_id == id && matches(&state) => return state,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("state not reached")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met");
}

#[tokio::test]
async fn test_eleventh_session_hits_capacity() {
    let h = harness(OrchestratorConfig::default());

    for i in 0..10 {
        h.orchestrator.create_session(host(&format!("box{i}"))).unwrap();
    }
    let err = h.orchestrator.create_session(host("extra")).unwrap_err();

    assert!(matches!(err, Error::SessionLimitReached(10)));
    assert_eq!(h.orchestrator.session_count(), 10);
}

#[tokio::test]
async fn test_first_session_becomes_active() {
    let h = harness(OrchestratorConfig::default());
    let first = h.orchestrator.create_session(host("a")).unwrap();
    let _second = h.orchestrator.create_session(host("b")).unwrap();

    assert_eq!(h.orchestrator.active_session(), Some(first));

    let listed = h.orchestrator.list_sessions();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first);
    assert!(listed[0].is_active);
    assert!(!listed[1].is_active);
    assert_eq!(listed[1].state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_close_active_reassigns() {
    let h = harness(OrchestratorConfig::default());
    let a = h.orchestrator.create_session(host("a")).unwrap();
    let b = h.orchestrator.create_session(host("b")).unwrap();

    h.orchestrator.close_session(a).await.unwrap();
    assert_eq!(h.orchestrator.active_session(), Some(b));

    h.orchestrator.close_session(b).await.unwrap();
    assert_eq!(h.orchestrator.active_session(), None);
    assert_eq!(h.orchestrator.session_count(), 0);
}

#[tokio::test]
async fn test_close_inactive_keeps_active() {
    let h = harness(OrchestratorConfig::default());
    let a = h.orchestrator.create_session(host("a")).unwrap();
    let b = h.orchestrator.create_session(host("b")).unwrap();

    h.orchestrator.close_session(b).await.unwrap();
    assert_eq!(h.orchestrator.active_session(), Some(a));
}

#[tokio::test]
async fn test_switch_active() {
    let h = harness(OrchestratorConfig::default());
    let a = h.orchestrator.create_session(host("a")).unwrap();
    let b = h.orchestrator.create_session(host("b")).unwrap();
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.switch_active(b);
    assert_eq!(h.orchestrator.active_session(), Some(b));
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::ActiveChanged {
            session_id: Some(b)
        }
    );

    // Unknown ids are ignored
    h.orchestrator.switch_active(SessionId::new());
    assert_eq!(h.orchestrator.active_session(), Some(b));

    h.orchestrator.switch_active(a);
    assert_eq!(h.orchestrator.active_session(), Some(a));
}

#[tokio::test]
async fn test_connect_publishes_transitions() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    let mut events = h.orchestrator.subscribe();

    connect(&h.orchestrator, id).await;

    let connecting = wait_for_state(&mut events, id, |_| true).await;
    assert_eq!(connecting, SessionState::Connecting);
    let connected = wait_for_state(&mut events, id, |_| true).await;
    assert_eq!(connected, SessionState::Connected);

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.reconnect_attempts(), 0);
    assert!(session.last_connected_at().is_some());

    // The remote side learns the terminal size right after connecting
    assert_eq!(h.factory.transport(0).resizes(), vec![(80, 24)]);
}

#[tokio::test]
async fn test_connect_failure_reports_reason() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    h.factory
        .fail_next(1, TransportError::AuthFailed("denied".to_string()));

    let err = h
        .orchestrator
        .connect(id, Credentials::password("wrong"), Arc::new(DenyAllPrompt))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::AuthFailed(_))
    ));

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(
        session.state(),
        SessionState::error("Authentication failed: denied")
    );
    assert!(h.factory.transport(0).is_closed());

    // An error state still allows a user retry
    connect(&h.orchestrator, id).await;
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_read_pump_feeds_terminal() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;

    let session = h.orchestrator.session(id).unwrap();
    let mut events = session.subscribe();
    h.factory.transport(0).feed(b"hello\r\nworld");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        SessionEvent::Data {
            session_id: id,
            bytes: b"hello\r\nworld".to_vec()
        }
    );

    let text = session.terminal().to_plain_text();
    assert!(text.starts_with("hello\nworld"));
}

#[tokio::test]
async fn test_bell_and_title_are_forwarded() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;

    let mut events = h.orchestrator.subscribe();
    h.factory.transport(0).feed(b"\x1b]0;build\x07\x07");

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let is_data = matches!(event, SessionEvent::Data { .. });
        seen.push(event);
        if is_data {
            break;
        }
    }

    assert!(seen.contains(&SessionEvent::TitleChanged {
        session_id: id,
        title: "build".to_string()
    }));
    assert!(seen.contains(&SessionEvent::Bell { session_id: id }));
    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.terminal().title().as_deref(), Some("build"));
}

#[tokio::test]
async fn test_send_data_reaches_transport() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();

    let err = h.orchestrator.send_data(id, b"ls\n").await.unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));

    connect(&h.orchestrator, id).await;
    h.orchestrator.send_data(id, b"ls\n").await.unwrap();
    h.orchestrator.send_data(id, b"pwd\n").await.unwrap();

    assert_eq!(h.factory.transport(0).written(), b"ls\npwd\n".to_vec());
}

#[tokio::test]
async fn test_resize_reaches_both_sides() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;

    h.orchestrator
        .resize(id, Dimensions::new(40, 120))
        .await
        .unwrap();

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.terminal().dimensions(), Dimensions::new(40, 120));
    assert_eq!(h.factory.transport(0).resizes().last(), Some(&(120, 40)));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_triggers_reconnect() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    let mut events = h.orchestrator.subscribe();

    let first = h.factory.transport(0);
    first.fail_writes.store(true, Ordering::SeqCst);

    let err = h.orchestrator.send_data(id, b"ls\n").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::WriteFailed(_))
    ));

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(
        session.state(),
        SessionState::error("Write error: broken pipe")
    );

    let attempt = wait_for_state(&mut events, id, |s| {
        matches!(s, SessionState::Reconnecting { .. })
    })
    .await;
    assert_eq!(attempt, SessionState::Reconnecting { attempt: 1 });

    wait_for_state(&mut events, id, SessionState::is_connected).await;
    assert_eq!(h.factory.created_count(), 2);
    assert!(first.is_closed());
    assert_eq!(session.reconnect_attempts(), 0);
    assert!(!session.needs_reconnect());

    // The new transport carries traffic
    h.orchestrator.send_data(id, b"ls\n").await.unwrap();
    assert_eq!(h.factory.transport(1).written(), b"ls\n".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_bound() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    let mut events = h.orchestrator.subscribe();

    h.factory
        .fail_next(3, TransportError::ConnectionRefused("10.0.0.2:22".to_string()));
    h.factory.transport(0).drop_connection();

    let state = wait_for_state(&mut events, id, |s| {
        s.error_reason() == Some("Reconnection failed")
    })
    .await;
    assert_eq!(state, SessionState::error("Reconnection failed"));

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.reconnect_attempts(), 3);
    assert!(!session.needs_reconnect());
    assert_eq!(h.factory.created_count(), 4);

    // No further automatic attempts
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.factory.created_count(), 4);
    assert_eq!(session.state(), SessionState::error("Reconnection failed"));

    // An explicit retry starts over
    h.orchestrator.reconnect(id).await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_recovers_mid_sequence() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    let mut events = h.orchestrator.subscribe();

    h.factory
        .fail_next(1, TransportError::ConnectionRefused("10.0.0.2:22".to_string()));
    h.factory.transport(0).end_stream();

    let lost = wait_for_state(&mut events, id, |s| s.error_reason().is_some()).await;
    assert_eq!(lost, SessionState::error("End of stream"));

    wait_for_state(&mut events, id, |s| {
        *s == SessionState::Reconnecting { attempt: 2 }
    })
    .await;
    wait_for_state(&mut events, id, SessionState::is_connected).await;

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.reconnect_attempts(), 0);
    assert_eq!(h.factory.created_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_deferred_until_network_returns() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.set_network_available(false);
    h.factory.transport(0).drop_connection();

    let state = wait_for_state(&mut events, id, |s| s.error_reason().is_some()).await;
    assert_eq!(state, SessionState::error("Connection lost: reset"));

    let session = h.orchestrator.session(id).unwrap();
    assert!(session.needs_reconnect());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created_count(), 1);
    assert!(matches!(session.state(), SessionState::Error { .. }));

    h.orchestrator.set_network_available(true);
    wait_for_state(&mut events, id, SessionState::is_connected).await;
    assert_eq!(h.factory.created_count(), 2);
    assert!(!session.needs_reconnect());
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_failure_triggers_reconnect() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    let mut events = h.orchestrator.subscribe();

    h.factory
        .transport(0)
        .keep_alive_ok
        .store(false, Ordering::SeqCst);

    let state = wait_for_state(&mut events, id, |s| s.error_reason().is_some()).await;
    assert_eq!(state, SessionState::error("Keep-alive failed"));

    wait_for_state(&mut events, id, SessionState::is_connected).await;
    assert_eq!(h.factory.created_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_background_keep_alive_interval() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    h.orchestrator.set_background(true);

    h.factory
        .transport(0)
        .keep_alive_ok
        .store(false, Ordering::SeqCst);

    // Past the foreground interval, short of the background one
    tokio::time::sleep(Duration::from_secs(45)).await;
    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(h.factory.created_count(), 1);

    // The failed probe at 60s replaced the transport
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created_count(), 2);
    assert!(h.factory.transport(0).is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_auto_attach_sends_command() {
    let mut config = OrchestratorConfig::default();
    config.auto_attach.enabled = true;
    config.auto_attach.session_name = "work".to_string();
    let h = harness(config);

    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    assert!(h.factory.transport(0).written().is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.factory.transport(0).written(),
        b"tmux new-session -A -s work\n".to_vec()
    );
}

#[tokio::test]
async fn test_host_key_question_is_relayed() {
    let h = harness(OrchestratorConfig::default());
    h.factory.ask_host_key.store(true, Ordering::SeqCst);
    let id = h.orchestrator.create_session(host("a")).unwrap();

    let (prompt, mut requests) = ChannelAuthPrompt::new(4);
    let ui = tokio::spawn(async move {
        match requests.recv().await {
            Some(AuthRequest::HostKey { request, respond }) => {
                assert_eq!(request.session_id, Some(id));
                assert_eq!(request.fingerprint, "SHA256:mock");
                respond.send(true).unwrap();
            }
            other => panic!("unexpected request: {other:?}"),
        }
    });

    h.orchestrator
        .connect(id, Credentials::default(), Arc::new(prompt))
        .await
        .unwrap();
    ui.await.unwrap();

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_rejected_host_key_fails_connect() {
    let h = harness(OrchestratorConfig::default());
    h.factory.ask_host_key.store(true, Ordering::SeqCst);
    let id = h.orchestrator.create_session(host("a")).unwrap();

    let err = h
        .orchestrator
        .connect(id, Credentials::default(), Arc::new(DenyAllPrompt))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::HostKeyRejected(_))
    ));

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(
        session.state(),
        SessionState::error("Host key rejected for root@10.0.0.2:22")
    );
}

#[tokio::test]
async fn test_disconnect_keeps_session() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;

    h.orchestrator.disconnect(id).await.unwrap();

    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(h.factory.transport(0).is_closed());
    assert_eq!(h.orchestrator.session_count(), 1);

    let err = h.orchestrator.send_data(id, b"ls\n").await.unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;
    let mut events = h.orchestrator.subscribe();

    h.factory.transport(0).drop_connection();
    wait_for_state(&mut events, id, |s| {
        matches!(s, SessionState::Reconnecting { .. })
    })
    .await;

    h.orchestrator.close_session(id).await.unwrap();
    assert!(h.factory.transport(0).is_closed());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created_count(), 1);
}

/// Connects through a prompt that accepts the first host key and parks
/// every later question, then drops the connection. Returns once the
/// reconnect handshake is waiting on its parked question.
async fn stall_reconnect_handshake(h: &Harness) -> (SessionId, AuthRequest) {
    h.factory.ask_host_key.store(true, Ordering::SeqCst);
    let id = h.orchestrator.create_session(host("a")).unwrap();

    let (prompt, mut requests) = ChannelAuthPrompt::new(4);
    let (parked_tx, mut parked_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut answered = false;
        while let Some(request) = requests.recv().await {
            match request {
                AuthRequest::HostKey { respond, .. } if !answered => {
                    answered = true;
                    respond.send(true).unwrap();
                }
                other => {
                    let _ = parked_tx.send(other);
                }
            }
        }
    });

    h.orchestrator
        .connect(id, Credentials::default(), Arc::new(prompt))
        .await
        .unwrap();
    h.factory.transport(0).drop_connection();

    let parked = parked_rx.recv().await.unwrap();
    assert_eq!(h.factory.created_count(), 2);
    assert!(!h.factory.transport(1).is_closed());
    (id, parked)
}

#[tokio::test(start_paused = true)]
async fn test_close_during_reconnect_handshake_closes_transport() {
    let h = harness(OrchestratorConfig::default());
    let (id, _parked) = stall_reconnect_handshake(&h).await;

    h.orchestrator.close_session(id).await.unwrap();

    assert!(h.factory.transport(0).is_closed());
    assert!(h.factory.transport(1).is_closed());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_reconnect_handshake_closes_transport() {
    let h = harness(OrchestratorConfig::default());
    let (id, _parked) = stall_reconnect_handshake(&h).await;

    h.orchestrator.disconnect(id).await.unwrap();

    assert!(h.factory.transport(1).is_closed());
    let session = h.orchestrator.session(id).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created_count(), 2);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_timer_snapshot_after_close_is_dropped() {
    let config = OrchestratorConfig {
        persist_interval: Duration::from_millis(5),
        ..OrchestratorConfig::default()
    };
    let h = harness(config);
    let id = h.orchestrator.create_session(host("a")).unwrap();

    let store = h.store.clone();
    eventually(|| store.get(&id).is_some()).await;

    h.orchestrator.close_session(id).await.unwrap();
    eventually(|| store.get(&id).is_none()).await;

    // Several timer periods pass with no snapshot written back
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.get(&id).is_none());
}

#[tokio::test]
async fn test_close_publishes_and_deletes_snapshot() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;

    let store = h.store.clone();
    eventually(|| store.get(&id).is_some()).await;

    let session = h.orchestrator.session(id).unwrap();
    let mut events = session.subscribe();
    h.orchestrator.close_session(id).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Closed { session_id: id }
    );
    assert!(session.is_closed());
    assert!(h.factory.transport(0).is_closed());
    eventually(|| store.get(&id).is_none()).await;
}

#[tokio::test]
async fn test_snapshot_offered_on_transition() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();

    let store = h.store.clone();
    eventually(|| store.get(&id).is_some_and(|s| !s.connected)).await;

    connect(&h.orchestrator, id).await;
    eventually(|| store.get(&id).is_some_and(|s| s.connected)).await;

    let snapshot = store.get(&id).unwrap();
    assert!(snapshot.is_active);
    assert!(snapshot.last_connected_at.is_some());
}

#[tokio::test]
async fn test_restore_from_snapshots() {
    let source = harness(OrchestratorConfig::default());
    let a = source.orchestrator.create_session(host("a")).unwrap();
    let b = source.orchestrator.create_session(host("b")).unwrap();
    connect(&source.orchestrator, a).await;

    let session = source.orchestrator.session(a).unwrap();
    let mut events = session.subscribe();
    source.factory.transport(0).feed(b"$ make\r\nok");
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    source.orchestrator.switch_active(b);

    let snapshots = source.orchestrator.snapshots();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[0].connected);

    let target = harness(OrchestratorConfig::default());
    let restored = target.orchestrator.restore(snapshots);
    assert_eq!(restored, vec![a, b]);
    assert_eq!(target.orchestrator.active_session(), Some(b));

    let restored_a = target.orchestrator.session(a).unwrap();
    assert_eq!(restored_a.state(), SessionState::Disconnected);
    assert!(restored_a.terminal().to_plain_text().starts_with("$ make\nok"));
    assert_eq!(restored_a.host(), &host("a"));
    assert!(restored_a.last_connected_at().is_some());

    // Restoring the same ids again is a no-op
    let again = target.orchestrator.restore(source.orchestrator.snapshots());
    assert!(again.is_empty());
    assert_eq!(target.orchestrator.session_count(), 2);
}

#[tokio::test]
async fn test_restore_stops_at_capacity() {
    let source = harness(OrchestratorConfig::default());
    source.orchestrator.create_session(host("a")).unwrap();
    source.orchestrator.create_session(host("b")).unwrap();

    let config = OrchestratorConfig {
        max_sessions: 1,
        ..Default::default()
    };
    let target = harness(config);
    let restored = target.orchestrator.restore(source.orchestrator.snapshots());

    assert_eq!(restored.len(), 1);
    assert_eq!(target.orchestrator.session_count(), 1);
    assert_eq!(target.orchestrator.active_session(), Some(restored[0]));
}

#[tokio::test]
async fn test_restore_from_store() {
    let store = Arc::new(MemorySnapshotStore::new());
    let id = {
        let factory = Arc::new(MockFactory::default());
        let orchestrator =
            Orchestrator::new(OrchestratorConfig::default(), factory, store.clone());
        let id = orchestrator.create_session(host("a")).unwrap();
        orchestrator.shutdown();
        id
    };
    let probe = store.clone();
    eventually(|| probe.get(&id).is_some()).await;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(MockFactory::default()),
        store.clone(),
    );
    let restored = orchestrator.restore_from_store().await.unwrap();

    assert_eq!(restored, vec![id]);
    assert_eq!(orchestrator.active_session(), Some(id));
    assert_eq!(store.load_all_snapshots().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shutdown_leaves_transports_open() {
    let h = harness(OrchestratorConfig::default());
    let id = h.orchestrator.create_session(host("a")).unwrap();
    connect(&h.orchestrator, id).await;

    h.orchestrator.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!h.factory.transport(0).is_closed());
    assert_eq!(h.orchestrator.session_count(), 1);
}
