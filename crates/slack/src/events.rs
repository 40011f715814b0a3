use serde::Deserialize;
use serde_json::Value;

/// Lifecycle and payload notifications produced by a session handler.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Connecting,
    Connected,
    ConnectionError { reason: Option<String> },
    Disconnected,
    Hello,
    IncomingError { error: String },
    EventsApi { request: Option<SessionRequest>, payload: Value },
}

impl SessionEvent {
    pub fn kind(&self) -> SessionEventKind {
        match self {
            Self::Connecting => SessionEventKind::Connecting,
            Self::Connected => SessionEventKind::Connected,
            Self::ConnectionError { .. } => SessionEventKind::ConnectionError,
            Self::Disconnected => SessionEventKind::Disconnected,
            Self::Hello => SessionEventKind::Hello,
            Self::IncomingError { .. } => SessionEventKind::IncomingError,
            Self::EventsApi { .. } => SessionEventKind::EventsApi,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Connecting,
    Connected,
    ConnectionError,
    Disconnected,
    Hello,
    IncomingError,
    EventsApi,
}

impl SessionEventKind {
    pub const ALL: [SessionEventKind; 7] = [
        Self::Connecting,
        Self::ConnectionError,
        Self::Connected,
        Self::IncomingError,
        Self::Hello,
        Self::Disconnected,
        Self::EventsApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectionError => "connection_error",
            Self::Disconnected => "disconnected",
            Self::Hello => "hello",
            Self::IncomingError => "incoming_error",
            Self::EventsApi => "events_api",
        }
    }
}

/// The part of an envelope the remote side expects back as an acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRequest {
    pub envelope_id: String,
    pub retry_attempt: u32,
}

impl SessionRequest {
    pub fn new(envelope_id: impl Into<String>) -> Self {
        Self { envelope_id: envelope_id.into(), retry_attempt: 0 }
    }
}

/// A decoded Events API inner event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InnerEvent {
    AppMention(MentionEvent),
    Message(MessageEvent),
    Unsupported { event_type: String },
}

impl InnerEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::AppMention(_) => "app_mention",
            Self::Message(_) => "message",
            Self::Unsupported { event_type } => event_type,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MentionEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct EventsApiEnvelope {
    #[serde(rename = "type")]
    envelope_type: String,
    event: Value,
}

#[derive(Debug, Deserialize)]
struct InnerEventHeader {
    #[serde(rename = "type")]
    event_type: String,
}

/// Extracts the inner event from an Events API callback payload.
///
/// Returns `None` when the payload is not an `event_callback` envelope or the
/// inner event does not carry a `type`.
pub fn parse_inner_event(payload: &Value) -> Option<InnerEvent> {
    let envelope = EventsApiEnvelope::deserialize(payload).ok()?;
    if envelope.envelope_type != "event_callback" {
        return None;
    }

    let header = InnerEventHeader::deserialize(&envelope.event).ok()?;
    let event = match header.event_type.as_str() {
        "app_mention" => InnerEvent::AppMention(MentionEvent::deserialize(&envelope.event).ok()?),
        "message" => InnerEvent::Message(MessageEvent::deserialize(&envelope.event).ok()?),
        _ => InnerEvent::Unsupported { event_type: header.event_type },
    };
    Some(event)
}
