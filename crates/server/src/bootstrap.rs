use std::sync::Arc;

use slackapp_core::config::{AppConfig, ConfigError};
use slackapp_slack::{
    socket::{ReconnectPolicy, SocketModeSession},
    transport::WebSocketTransport,
    Bot, ConnectionWatch, WebClient,
};
use thiserror::Error;
use tracing::{info, info_span};

use crate::commands::builtin_commands;

pub struct Application {
    pub config: AppConfig,
    pub bot: Arc<Bot>,
    pub watch: ConnectionWatch,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Wires the Web API client, the Socket Mode session and the bot from an
/// already loaded configuration. Nothing touches the network until the bot runs.
pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");
    config.validate()?;

    let web = WebClient::with_base_url(
        config.slack.api_base_url.clone(),
        config.slack.bot_token.clone(),
        config.slack.app_token.clone(),
    );
    let transport = Arc::new(WebSocketTransport::new(web.clone()));
    let session = Arc::new(SocketModeSession::new(
        transport,
        ReconnectPolicy {
            max_retries: config.socket.max_retries,
            base_delay_ms: config.socket.base_delay_ms,
            max_delay_ms: config.socket.max_delay_ms,
        },
    ));

    let web = Arc::new(web);
    let builder = Bot::builder(session, web.clone(), web)
        .with_span(info_span!("bot", service = "slackapp"));
    let watch = builder.watch();
    let bot = builder.with_commands(builtin_commands(Arc::new(watch.clone()))).build();

    info!(
        event_name = "system.bootstrap.ready",
        max_retries = config.socket.max_retries,
        "slack bot wired"
    );

    Ok(Application { config, bot: Arc::new(bot), watch })
}

#[cfg(test)]
mod tests {
    use slackapp_core::config::AppConfig;
    use slackapp_slack::ConnectionState;

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn config(app_token: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.slack.app_token = app_token.to_string().into();
        config.slack.bot_token = "xoxb-test".to_string().into();
        config
    }

    #[test]
    fn bootstrap_fails_fast_without_valid_slack_tokens() {
        let result = bootstrap_with_config(config("invalid-token"));

        let Err(error) = result else {
            panic!("bootstrap should reject an invalid app token");
        };
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("slack.app_token"));
    }

    #[test]
    fn bootstrap_wires_a_disconnected_bot() {
        let app = bootstrap_with_config(config("xapp-test")).expect("bootstrap should succeed");

        assert_eq!(app.watch.state(), ConnectionState::Disconnected);
        assert_eq!(app.bot.connection_state(), ConnectionState::Disconnected);
        assert_eq!(app.config.socket.max_retries, 5);
    }
}
