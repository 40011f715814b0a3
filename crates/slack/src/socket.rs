use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    events::{SessionEvent, SessionEventKind, SessionRequest},
    session::{SessionCallback, SessionError, SessionHandler, TransportError},
};

/// A decoded Socket Mode frame.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: Option<String> },
    EventsApi { envelope_id: String, retry_attempt: u32, payload: Value },
    Other { frame_type: String, envelope_id: Option<String> },
    Malformed { error: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    envelope_id: Option<String>,
    payload: Option<Value>,
    reason: Option<String>,
    retry_attempt: Option<u32>,
}

impl SocketFrame {
    pub fn parse(raw: &str) -> Self {
        let frame = match serde_json::from_str::<RawFrame>(raw) {
            Ok(frame) => frame,
            Err(error) => return Self::Malformed { error: error.to_string() },
        };

        match frame.frame_type.as_str() {
            "hello" => Self::Hello,
            "disconnect" => Self::Disconnect { reason: frame.reason },
            "events_api" => match (frame.envelope_id, frame.payload) {
                (Some(envelope_id), Some(payload)) => Self::EventsApi {
                    envelope_id,
                    retry_attempt: frame.retry_attempt.unwrap_or(0),
                    payload,
                },
                _ => Self::Malformed {
                    error: "events_api frame without envelope_id or payload".to_owned(),
                },
            },
            _ => Self::Other { frame_type: frame.frame_type, envelope_id: frame.envelope_id },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_frame(&self) -> Result<Option<SocketFrame>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

enum PumpExit {
    Cancelled,
    Refresh,
    Lost,
}

/// Socket Mode session: keeps a transport connected and fans frames out to the
/// callbacks registered per [`SessionEventKind`].
pub struct SocketModeSession {
    transport: Arc<dyn SocketTransport>,
    reconnect_policy: ReconnectPolicy,
    callbacks: RwLock<HashMap<SessionEventKind, Arc<dyn SessionCallback>>>,
}

impl SocketModeSession {
    pub fn new(transport: Arc<dyn SocketTransport>, reconnect_policy: ReconnectPolicy) -> Self {
        Self { transport, reconnect_policy, callbacks: RwLock::new(HashMap::new()) }
    }

    fn callback(&self, kind: SessionEventKind) -> Option<Arc<dyn SessionCallback>> {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner).get(&kind).cloned()
    }

    async fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        match self.callback(kind) {
            Some(callback) => callback.on_event(event, self).await,
            None => debug!(kind = kind.as_str(), "no callback registered for session event"),
        }
    }

    async fn pump(&self, cancel: &CancellationToken) -> PumpExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PumpExit::Cancelled,
                next = self.transport.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    if let Some(exit) = self.deliver(frame).await {
                        return exit;
                    }
                }
                Ok(None) => {
                    info!(event_name = "ingress.socket.stream_closed", "socket mode stream closed");
                    return PumpExit::Lost;
                }
                Err(error) => {
                    warn!(
                        event_name = "ingress.socket.read_failed",
                        error = %error,
                        "socket mode read failed; reconnecting"
                    );
                    return PumpExit::Lost;
                }
            }
        }
    }

    async fn deliver(&self, frame: SocketFrame) -> Option<PumpExit> {
        match frame {
            SocketFrame::Hello => self.emit(SessionEvent::Hello).await,
            SocketFrame::Disconnect { reason } => {
                info!(
                    event_name = "ingress.socket.disconnect_requested",
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "socket mode server requested a reconnect"
                );
                return Some(PumpExit::Refresh);
            }
            SocketFrame::EventsApi { envelope_id, retry_attempt, payload } => {
                debug!(
                    event_name = "ingress.socket.envelope_received",
                    envelope_id = %envelope_id,
                    retry_attempt,
                    "received events api envelope"
                );
                let request = SessionRequest { envelope_id, retry_attempt };
                self.emit(SessionEvent::EventsApi { request: Some(request), payload }).await;
            }
            SocketFrame::Malformed { error } => {
                self.emit(SessionEvent::IncomingError { error }).await;
            }
            SocketFrame::Other { frame_type, envelope_id } => {
                debug!(frame_type = %frame_type, "ignoring unsupported socket mode frame");
                // unanswered envelopes are redelivered by the server
                if let Some(envelope_id) = envelope_id {
                    if let Err(error) = self.transport.acknowledge(&envelope_id).await {
                        warn!(envelope_id = %envelope_id, error = %error, "failed to acknowledge envelope");
                    }
                }
            }
        }
        None
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[async_trait]
impl SessionHandler for SocketModeSession {
    fn register(&self, kind: SessionEventKind, callback: Arc<dyn SessionCallback>) {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner).insert(kind, callback);
    }

    async fn acknowledge(&self, request: &SessionRequest) -> Result<(), SessionError> {
        self.transport.acknowledge(&request.envelope_id).await.map_err(SessionError::from)
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), SessionError> {
        let mut attempt = 0_u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            self.emit(SessionEvent::Connecting).await;
            info!(attempt, "opening socket mode transport connection");
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                result = self.transport.connect() => result,
            };

            if let Err(error) = connected {
                warn!(
                    attempt,
                    max_retries = self.reconnect_policy.max_retries,
                    error = %error,
                    "socket mode transport failed to connect"
                );
                self.emit(SessionEvent::ConnectionError { reason: Some(error.to_string()) }).await;

                if attempt >= self.reconnect_policy.max_retries {
                    return Err(SessionError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: error,
                    });
                }

                let delay = self.reconnect_policy.backoff(attempt);
                attempt += 1;
                if !self.pause(delay, &cancel).await {
                    return Ok(());
                }
                continue;
            }

            attempt = 0;
            info!(event_name = "ingress.socket.connected", "socket mode transport connected");
            self.emit(SessionEvent::Connected).await;

            let exit = self.pump(&cancel).await;
            if let Err(error) = self.transport.disconnect().await {
                warn!(error = %error, "socket mode transport disconnect failed");
            }
            self.emit(SessionEvent::Disconnected).await;

            match exit {
                PumpExit::Cancelled => return Ok(()),
                PumpExit::Refresh => {}
                PumpExit::Lost => {
                    if !self.pause(self.reconnect_policy.backoff(0), &cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }
}
