//! WebSocket transport for Socket Mode.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::json;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::{
    session::TransportError,
    socket::{SocketFrame, SocketTransport},
    web::WebClient,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connects to the URL handed out by `apps.connections.open`.
///
/// Reading and writing use separate locks so envelopes can be acknowledged
/// while the pump waits for the next frame.
pub struct WebSocketTransport {
    web: WebClient,
    writer: Mutex<Option<WsSink>>,
    reader: Mutex<Option<WsSource>>,
}

impl WebSocketTransport {
    pub fn new(web: WebClient) -> Self {
        Self { web, writer: Mutex::new(None), reader: Mutex::new(None) }
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| TransportError::Acknowledge("socket is not connected".to_owned()))?;
        sink.send(message).await.map_err(|error| TransportError::Acknowledge(error.to_string()))
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .web
            .open_connection()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, source) = stream.split();

        *self.writer.lock().await = Some(sink);
        *self.reader.lock().await = Some(source);
        debug!("socket mode websocket opened");
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<SocketFrame>, TransportError> {
        let mut reader = self.reader.lock().await;
        let source = reader
            .as_mut()
            .ok_or_else(|| TransportError::Receive("socket is not connected".to_owned()))?;

        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "received socket mode frame");
                    return Ok(Some(SocketFrame::parse(text.as_str())));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(error) = self.send(Message::Pong(data)).await {
                        warn!(error = %error, "failed to answer socket mode ping");
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let body = json!({ "envelope_id": envelope_id }).to_string();
        self.send(Message::text(body)).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.reader.lock().await.take();
        let Some(mut sink) = self.writer.lock().await.take() else {
            return Ok(());
        };
        sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}
