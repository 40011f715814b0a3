use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{SessionEvent, SessionEventKind, SessionRequest};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("socket mode gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: TransportError },
}

/// Receives session notifications for the kinds it was registered for.
#[async_trait]
pub trait SessionCallback: Send + Sync {
    async fn on_event(&self, event: SessionEvent, session: &dyn SessionHandler);
}

/// A long-lived streaming session with the remote platform.
///
/// `run` blocks until `cancel` fires (returning `Ok`) or the session fails.
/// Callbacks are invoked one at a time from the run loop, so a slow callback
/// stalls delivery of the following events.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    fn register(&self, kind: SessionEventKind, callback: Arc<dyn SessionCallback>);

    async fn acknowledge(&self, request: &SessionRequest) -> Result<(), SessionError>;

    async fn run(&self, cancel: CancellationToken) -> Result<(), SessionError>;
}
