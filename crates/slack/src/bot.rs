use std::sync::Arc;

use thiserror::Error;
use tokio::{sync::mpsc, task::JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::{
    bridge::{BridgeError, ConnectionBridge, ConnectionState, ConnectionWatch},
    commands::{Commands, Handler},
    events::InnerEvent,
    session::SessionHandler,
    text::{remove_user_id, tokenize_text},
    web::{ApiError, Identity, IdentityLookup, MessagePoster},
};

#[derive(Debug, Error)]
pub enum BotError {
    #[error("auth: {0}")]
    Identity(#[source] ApiError),
    #[error("slackapp failed: {0}")]
    Bridge(#[source] BridgeError),
    #[error("connection bridge task failed: {0}")]
    Task(#[from] JoinError),
    #[error("bot is already running")]
    AlreadyRunning,
}

pub struct BotBuilder {
    bridge: ConnectionBridge,
    events: mpsc::Receiver<InnerEvent>,
    identity: Arc<dyn IdentityLookup>,
    poster: Arc<dyn MessagePoster>,
    commands: Commands,
    span: Span,
}

impl BotBuilder {
    /// Registers the connection bridge on `session` right away, so
    /// [`BotBuilder::watch`] can be handed to commands before the bot exists.
    pub fn new(
        session: Arc<dyn SessionHandler>,
        identity: Arc<dyn IdentityLookup>,
        poster: Arc<dyn MessagePoster>,
    ) -> Self {
        let (bridge, events) = ConnectionBridge::new(session);
        Self { bridge, events, identity, poster, commands: Commands::new(), span: Span::none() }
    }

    pub fn watch(&self) -> ConnectionWatch {
        self.bridge.watch()
    }

    /// Span every log line of the bot is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_command(mut self, verb: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.commands.register(verb, handler);
        self
    }

    pub fn with_commands(mut self, commands: Commands) -> Self {
        self.commands.merge(commands);
        self
    }

    pub fn build(self) -> Bot {
        if self.commands.is_empty() {
            warn!(
                event_name = "bot.build.no_commands",
                "bot has no commands; every message gets the invalid command reply"
            );
        }
        Bot {
            bridge: self.bridge,
            events: tokio::sync::Mutex::new(self.events),
            identity: self.identity,
            poster: self.poster,
            commands: self.commands,
            span: self.span,
        }
    }
}

/// Answers mentions and direct messages by routing their text through the
/// registered commands and posting the output back to the channel.
pub struct Bot {
    bridge: ConnectionBridge,
    events: tokio::sync::Mutex<mpsc::Receiver<InnerEvent>>,
    identity: Arc<dyn IdentityLookup>,
    poster: Arc<dyn MessagePoster>,
    commands: Commands,
    span: Span,
}

impl Bot {
    pub fn builder(
        session: Arc<dyn SessionHandler>,
        identity: Arc<dyn IdentityLookup>,
        poster: Arc<dyn MessagePoster>,
    ) -> BotBuilder {
        BotBuilder::new(session, identity, poster)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.bridge.state()
    }

    pub fn connected(&self) -> bool {
        self.bridge.connected()
    }

    /// Runs until `cancel` fires or the connection bridge stops.
    ///
    /// The bot's own identity is looked up first; if that fails the session is
    /// never started. Cancellation returns at once and leaves the session to
    /// unwind on its own task.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BotError> {
        self.run_inner(cancel).instrument(self.span.clone()).await
    }

    async fn run_inner(&self, cancel: CancellationToken) -> Result<(), BotError> {
        let mut events = self.events.try_lock().map_err(|_| BotError::AlreadyRunning)?;
        let identity = self.identity.auth_test().await.map_err(BotError::Identity)?;
        let bridge_run = self.bridge.claim().map_err(BotError::Bridge)?;
        info!(
            event_name = "bot.run.started",
            user_id = %identity.user_id,
            "bot identity resolved; starting connection bridge"
        );

        let bridge_cancel = cancel.child_token();
        let _stop_bridge = bridge_cancel.clone().drop_guard();
        let mut bridge_task =
            tokio::spawn(bridge_run.drive(bridge_cancel).instrument(Span::current()));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(event_name = "bot.run.cancelled", "bot shutting down");
                    return Ok(());
                }
                joined = &mut bridge_task => {
                    self.drain(&identity, &mut events).await;
                    return Self::bridge_result(joined);
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&identity, event).await,
                    None => return Self::bridge_result(bridge_task.await),
                },
            }
        }
    }

    fn bridge_result(joined: Result<Result<(), BridgeError>, JoinError>) -> Result<(), BotError> {
        joined?.map_err(BotError::Bridge)
    }

    /// Answers what the bridge handed off before it stopped. Those events are
    /// already acknowledged, so Slack will not deliver them again.
    async fn drain(&self, identity: &Identity, events: &mut mpsc::Receiver<InnerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(identity, event).await;
        }
    }

    async fn handle_event(&self, identity: &Identity, event: InnerEvent) {
        match event {
            InnerEvent::AppMention(mention) => {
                self.dispatch(&mention.channel, &mention.text).await;
            }
            InnerEvent::Message(message) => {
                if message.user == identity.user_id {
                    debug!(channel = %message.channel, "ignoring message from self");
                    return;
                }
                self.dispatch(&message.channel, &message.text).await;
            }
            InnerEvent::Unsupported { event_type } => {
                warn!(event_type = %event_type, "unexpected event type");
            }
        }
    }

    async fn dispatch(&self, channel: &str, text: &str) {
        let tokens = tokenize_text(remove_user_id(text));
        debug!(channel, verb = tokens.first().map(String::as_str), "dispatching command");

        let output = self.commands.handle(tokens).await;
        if let Err(error) = self.poster.post_message(channel, &output).await {
            error!(
                event_name = "bot.post.failed",
                channel,
                error = %error,
                "failed to post command output"
            );
        }
    }
}
