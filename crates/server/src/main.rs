mod bootstrap;
mod commands;
mod health;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use slackapp_core::config::{AppConfig, LoadOptions};
use slackapp_slack::BotError;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

fn init_logging(config: &AppConfig) {
    use slackapp_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // reqwest and tungstenite both pull in rustls; pick one provider up front
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;
    let cancel = CancellationToken::new();

    let health_task = health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        Arc::new(app.watch.clone()),
        cancel.clone(),
    )
    .await?;

    let bot = app.bot.clone();
    let bot_cancel = cancel.clone();
    let mut bot_task = tokio::spawn(async move { bot.run(bot_cancel).await });
    tracing::info!(event_name = "system.server.started", "slackapp-server started");

    let finished = tokio::select! {
        signal = wait_for_shutdown() => {
            signal?;
            None
        }
        joined = &mut bot_task => Some(joined),
    };

    tracing::info!(event_name = "system.server.stopping", "slackapp-server stopping");
    cancel.cancel();

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let stopped = match finished {
        Some(joined) => bot_outcome(joined),
        None => join_bot(&mut bot_task, grace).await,
    };

    if tokio::time::timeout(grace, health_task).await.is_err() {
        tracing::warn!("health endpoint did not stop within the grace period");
    }

    if let Err(error) = &stopped {
        tracing::error!(
            event_name = "system.server.unclean_stop",
            error = %error,
            "slackapp-server stopped uncleanly"
        );
    }
    stopped
}

fn bot_outcome(joined: Result<Result<(), BotError>, JoinError>) -> Result<()> {
    Ok(joined??)
}

/// Waits up to `grace` for the bot task; past that the task is aborted and
/// the timeout is reported as an error.
async fn join_bot(task: &mut JoinHandle<Result<(), BotError>>, grace: Duration) -> Result<()> {
    match tokio::time::timeout(grace, &mut *task).await {
        Ok(joined) => bot_outcome(joined),
        Err(_) => {
            task.abort();
            bail!("bot did not stop within the {}s grace period", grace.as_secs())
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use slackapp_slack::BotError;

    use super::join_bot;

    #[tokio::test]
    async fn a_bot_that_outlives_the_grace_period_is_an_error() {
        let mut task = tokio::spawn(std::future::pending::<Result<(), BotError>>());

        let error = join_bot(&mut task, Duration::from_millis(20)).await.expect_err("timed out");

        assert!(error.to_string().contains("did not stop"));
        assert!(task.await.expect_err("aborted").is_cancelled());
    }

    #[tokio::test]
    async fn a_bot_that_stops_in_time_is_joined() {
        let mut task = tokio::spawn(async { Ok::<(), BotError>(()) });

        join_bot(&mut task, Duration::from_secs(1)).await.expect("joined");
    }

    #[tokio::test]
    async fn a_failed_bot_is_reported() {
        let mut task = tokio::spawn(async { Err::<(), BotError>(BotError::AlreadyRunning) });

        let error = join_bot(&mut task, Duration::from_secs(1)).await.expect_err("bot failed");

        assert_eq!(error.to_string(), "bot is already running");
    }
}
