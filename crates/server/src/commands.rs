use std::sync::Arc;

use async_trait::async_trait;
use slackapp_slack::{
    blocks::{MessageBuilder, MessageOption, Output},
    handler_fn, Commands, ConnectionState, Handler,
};

use crate::health::ConnectionProbe;

struct ConnectionStatus {
    probe: Arc<dyn ConnectionProbe>,
}

#[async_trait]
impl Handler for ConnectionStatus {
    async fn handle(&self, _args: Vec<String>) -> Output {
        let state = self.probe.connection_state();
        let headline = match state {
            ConnectionState::Connected => "*Connected* to Slack",
            ConnectionState::Connecting => "*Connecting* to Slack",
            ConnectionState::Disconnected => "*Disconnected* from Slack",
        };
        MessageBuilder::new(format!("connection: {state}"))
            .section("status.connection.v1", |section| {
                section.mrkdwn(headline);
            })
            .build()
            .into_output()
    }
}

/// Commands every deployment answers: `ping`, `echo <text>`,
/// `status connection` and `status version`.
pub fn builtin_commands(probe: Arc<dyn ConnectionProbe>) -> Commands {
    let status = Commands::new()
        .with("connection", ConnectionStatus { probe })
        .with(
            "version",
            handler_fn(|_| {
                vec![MessageOption::text(format!("slackapp {}", env!("CARGO_PKG_VERSION")), false)]
            }),
        );

    Commands::new()
        .with(
            "ping",
            handler_fn(|_| {
                MessageBuilder::new("pong")
                    .section("ping.v1", |section| {
                        section.plain("pong");
                    })
                    .build()
                    .into_output()
            }),
        )
        .with(
            "echo",
            handler_fn(|args| {
                if args.is_empty() {
                    return vec![MessageOption::text("usage: echo <text>", false)];
                }
                vec![MessageOption::text(args.join(" "), true)]
            }),
        )
        .with("status", status)
}
