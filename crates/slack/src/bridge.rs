use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    events::{parse_inner_event, InnerEvent, SessionEvent, SessionEventKind},
    session::{SessionCallback, SessionError, SessionHandler},
};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("connection bridge is closed")]
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns the callbacks of a [`SessionHandler`] into a stream of
/// [`InnerEvent`]s and tracks whether the session is connected.
///
/// The channel holds a single event: while nobody reads, the session's
/// delivery pump waits instead of dropping events.
pub struct ConnectionBridge {
    session: Arc<dyn SessionHandler>,
    shared: Arc<BridgeShared>,
}

struct BridgeShared {
    state: AtomicU8,
    claimed: AtomicBool,
    sender: Mutex<Option<mpsc::Sender<InnerEvent>>>,
    cancel: Mutex<CancellationToken>,
}

impl ConnectionBridge {
    pub fn new(session: Arc<dyn SessionHandler>) -> (Self, mpsc::Receiver<InnerEvent>) {
        let (sender, receiver) = mpsc::channel(1);
        let shared = Arc::new(BridgeShared {
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            claimed: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            cancel: Mutex::new(CancellationToken::new()),
        });
        for kind in SessionEventKind::ALL {
            session.register(kind, shared.clone());
        }
        (Self { session, shared }, receiver)
    }

    /// Runs the session until `cancel` fires or the session fails.
    ///
    /// A bridge runs once. The event channel is closed when this returns, and
    /// any other call, concurrent or later, yields [`BridgeError::Closed`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BridgeError> {
        self.claim()?.drive(cancel).await
    }

    /// Reserves the bridge's single run without starting it, so the run can be
    /// moved onto another task.
    pub fn claim(&self) -> Result<BridgeRun, BridgeError> {
        if self.shared.claimed.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::Closed);
        }
        Ok(BridgeRun { session: self.session.clone(), shared: self.shared.clone() })
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn watch(&self) -> ConnectionWatch {
        ConnectionWatch { shared: self.shared.clone() }
    }
}

/// The claimed run of a [`ConnectionBridge`]. Dropping it, finished or not,
/// marks the session disconnected and closes the event channel.
pub struct BridgeRun {
    session: Arc<dyn SessionHandler>,
    shared: Arc<BridgeShared>,
}

impl BridgeRun {
    pub async fn drive(self, cancel: CancellationToken) -> Result<(), BridgeError> {
        *self.shared.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        let result = self.session.run(cancel).await;
        match &result {
            Ok(()) => info!(event_name = "bridge.run.stopped", "connection bridge stopped"),
            Err(error) => warn!(
                event_name = "bridge.run.failed",
                error = %error,
                "connection bridge session failed"
            ),
        }
        result.map_err(BridgeError::from)
    }
}

impl Drop for BridgeRun {
    fn drop(&mut self) {
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.lock_sender().take();
    }
}

/// Read-only handle on a bridge's connection state.
#[derive(Clone)]
pub struct ConnectionWatch {
    shared: Arc<BridgeShared>,
}

impl ConnectionWatch {
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

impl BridgeShared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn lock_sender(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<InnerEvent>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn forward(&self, event: InnerEvent) {
        let Some(sender) = self.lock_sender().clone() else {
            debug!(event_type = event.event_type(), "bridge closed; dropping event");
            return;
        };
        let cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let event_type = event.event_type().to_owned();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(event_type = %event_type, "shutdown while handing off event");
            }
            sent = sender.send(event) => {
                if sent.is_err() {
                    debug!("event receiver dropped");
                }
            }
        }
    }
}

#[async_trait]
impl SessionCallback for BridgeShared {
    async fn on_event(&self, event: SessionEvent, session: &dyn SessionHandler) {
        match event {
            SessionEvent::Connecting => {
                debug!("connecting to slack");
                self.set_state(ConnectionState::Connecting);
            }
            SessionEvent::Connected => {
                info!(event_name = "bridge.session.connected", "connected to slack");
                self.set_state(ConnectionState::Connected);
            }
            SessionEvent::ConnectionError { reason } => {
                warn!(
                    event_name = "bridge.session.connection_error",
                    reason = reason.as_deref().unwrap_or(SessionEventKind::ConnectionError.as_str()),
                    "connection to slack failed"
                );
            }
            SessionEvent::Disconnected => {
                self.set_state(ConnectionState::Disconnected);
                warn!(event_name = "bridge.session.disconnected", "disconnected from slack");
            }
            SessionEvent::Hello => {}
            SessionEvent::IncomingError { error } => {
                warn!(event_name = "bridge.session.incoming_error", error = %error, "incoming error");
            }
            SessionEvent::EventsApi { request, payload } => {
                if let Some(request) = &request {
                    if let Err(error) = session.acknowledge(request).await {
                        warn!(
                            envelope_id = %request.envelope_id,
                            error = %error,
                            "failed to acknowledge events api envelope"
                        );
                    }
                }
                match parse_inner_event(&payload) {
                    Some(event) => self.forward(event).await,
                    None => warn!(
                        event_name = "bridge.session.unexpected_payload",
                        "dropping events api payload with unexpected shape"
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{BridgeError, ConnectionBridge, ConnectionState};
    use crate::{
        events::{InnerEvent, SessionEvent, SessionEventKind, SessionRequest},
        session::{SessionCallback, SessionError, SessionHandler, TransportError},
    };

    /// Session fake driven by the test through `emit`; `run` parks until
    /// cancelled or until the test injects a failure.
    #[derive(Default)]
    pub(crate) struct FakeSession {
        callbacks: Mutex<HashMap<SessionEventKind, Arc<dyn SessionCallback>>>,
        acknowledged: Mutex<Vec<String>>,
        failure: tokio::sync::Mutex<Option<mpsc::Receiver<SessionError>>>,
        fail_with: Mutex<Option<mpsc::Sender<SessionError>>>,
        started: tokio::sync::Notify,
    }

    impl FakeSession {
        pub(crate) fn new() -> Arc<Self> {
            let (sender, receiver) = mpsc::channel(1);
            Arc::new(Self {
                failure: tokio::sync::Mutex::new(Some(receiver)),
                fail_with: Mutex::new(Some(sender)),
                ..Self::default()
            })
        }

        pub(crate) async fn emit(&self, event: SessionEvent) {
            let callback = self.callbacks.lock().expect("lock").get(&event.kind()).cloned();
            if let Some(callback) = callback {
                callback.on_event(event, self).await;
            }
        }

        pub(crate) async fn emit_payload(&self, envelope_id: &str, payload: Value) {
            self.emit(SessionEvent::EventsApi {
                request: Some(SessionRequest::new(envelope_id)),
                payload,
            })
            .await;
        }

        pub(crate) async fn started(&self) {
            self.started.notified().await;
        }

        pub(crate) fn fail(&self, error: SessionError) {
            let sender = self.fail_with.lock().expect("lock").clone();
            if let Some(sender) = sender {
                sender.try_send(error).expect("single failure");
            }
        }

        pub(crate) fn acknowledged(&self) -> Vec<String> {
            self.acknowledged.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl SessionHandler for FakeSession {
        fn register(&self, kind: SessionEventKind, callback: Arc<dyn SessionCallback>) {
            self.callbacks.lock().expect("lock").insert(kind, callback);
        }

        async fn acknowledge(&self, request: &SessionRequest) -> Result<(), SessionError> {
            self.acknowledged.lock().expect("lock").push(request.envelope_id.clone());
            Ok(())
        }

        async fn run(&self, cancel: CancellationToken) -> Result<(), SessionError> {
            let mut failure = self.failure.lock().await;
            self.started.notify_one();
            let Some(receiver) = failure.as_mut() else {
                return Ok(());
            };
            tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                Some(error) = receiver.recv() => Err(error),
            }
        }
    }

    pub(crate) fn mention(text: &str) -> Value {
        json!({
            "type": "event_callback",
            "event": {"type": "app_mention", "channel": "C1", "user": "U1", "text": text}
        })
    }

    #[tokio::test]
    async fn tracks_connectivity_from_lifecycle_events() {
        let session = FakeSession::new();
        let (bridge, _events) = ConnectionBridge::new(session.clone());
        assert!(!bridge.connected());

        session.emit(SessionEvent::Connecting).await;
        assert_eq!(bridge.state(), ConnectionState::Connecting);
        assert!(!bridge.connected());

        session.emit(SessionEvent::Connected).await;
        assert!(bridge.connected());

        session.emit(SessionEvent::Hello).await;
        session.emit(SessionEvent::IncomingError { error: "bad frame".to_owned() }).await;
        session.emit(SessionEvent::ConnectionError { reason: None }).await;
        assert!(bridge.connected());

        let watch = bridge.watch();
        session.emit(SessionEvent::Disconnected).await;
        assert!(!bridge.connected());
        assert!(!watch.connected());
        assert_eq!(watch.state().to_string(), "disconnected");
    }

    #[tokio::test]
    async fn acknowledges_and_forwards_payload_events() {
        let session = FakeSession::new();
        let (_bridge, mut events) = ConnectionBridge::new(session.clone());

        session.emit_payload("env-1", mention("<@B1> ping")).await;

        let event = events.recv().await.expect("event forwarded");
        assert!(matches!(event, InnerEvent::AppMention(ref m) if m.text == "<@B1> ping"));
        assert_eq!(session.acknowledged(), vec!["env-1"]);
    }

    #[tokio::test]
    async fn malformed_payloads_are_acknowledged_and_dropped() {
        let session = FakeSession::new();
        let (_bridge, mut events) = ConnectionBridge::new(session.clone());

        session.emit_payload("env-bad", json!({"type": "url_verification"})).await;

        assert_eq!(session.acknowledged(), vec!["env-bad"]);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_is_a_clean_exit_and_closes_the_channel() {
        let session = FakeSession::new();
        let (bridge, mut events) = ConnectionBridge::new(session.clone());
        let bridge = Arc::new(bridge);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let bridge = bridge.clone();
            let cancel = cancel.clone();
            async move { bridge.run(cancel).await }
        });
        session.started().await;
        session.emit(SessionEvent::Connected).await;
        cancel.cancel();

        task.await.expect("join").expect("clean exit");
        assert!(!bridge.connected());
        assert!(events.recv().await.is_none());
        assert!(matches!(bridge.run(CancellationToken::new()).await, Err(BridgeError::Closed)));
    }

    #[tokio::test]
    async fn a_running_bridge_refuses_a_second_run() {
        let session = FakeSession::new();
        let (bridge, _events) = ConnectionBridge::new(session.clone());
        let bridge = Arc::new(bridge);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let bridge = bridge.clone();
            let cancel = cancel.clone();
            async move { bridge.run(cancel).await }
        });
        session.started().await;

        assert!(matches!(bridge.run(CancellationToken::new()).await, Err(BridgeError::Closed)));
        assert!(matches!(bridge.claim(), Err(BridgeError::Closed)));

        cancel.cancel();
        task.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn dropping_an_unfinished_run_closes_the_channel() {
        let session = FakeSession::new();
        let (bridge, mut events) = ConnectionBridge::new(session.clone());
        session.emit(SessionEvent::Connected).await;

        let run = bridge.claim().expect("first claim");
        assert!(bridge.connected());
        drop(run);

        assert_eq!(bridge.state(), ConnectionState::Disconnected);
        assert!(events.recv().await.is_none());
        session.emit_payload("env-late", mention("<@B1> late")).await;
        assert_eq!(session.acknowledged(), vec!["env-late"]);
    }

    #[tokio::test]
    async fn session_failures_are_wrapped() {
        let session = FakeSession::new();
        let (bridge, _events) = ConnectionBridge::new(session.clone());
        session.fail(SessionError::RetriesExhausted {
            attempts: 3,
            last_error: TransportError::Connect("refused".to_owned()),
        });

        let error = bridge.run(CancellationToken::new()).await.expect_err("must fail");
        assert!(matches!(error, BridgeError::Session(SessionError::RetriesExhausted { .. })));
    }

    #[tokio::test]
    async fn blocked_hand_off_unwinds_on_cancellation() {
        let session = FakeSession::new();
        let (bridge, _events) = ConnectionBridge::new(session.clone());
        let bridge = Arc::new(bridge);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let bridge = bridge.clone();
            let cancel = cancel.clone();
            async move { bridge.run(cancel).await }
        });
        session.started().await;

        // first event fills the channel, second waits for a reader
        session.emit_payload("env-1", mention("<@B1> one")).await;
        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.emit_payload("env-2", mention("<@B1> two")).await }
        });
        tokio::task::yield_now().await;
        cancel.cancel();

        pending.await.expect("hand-off unwinds");
        task.await.expect("join").expect("clean exit");
    }
}
