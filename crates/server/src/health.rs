use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use slackapp_slack::{ConnectionState, ConnectionWatch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Source of the connection state reported by `/health` and `status connection`.
pub trait ConnectionProbe: Send + Sync {
    fn connection_state(&self) -> ConnectionState;
}

impl ConnectionProbe for ConnectionWatch {
    fn connection_state(&self) -> ConnectionState {
        self.state()
    }
}

#[derive(Clone)]
pub struct HealthState {
    probe: Arc<dyn ConnectionProbe>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub slack: HealthCheck,
    pub checked_at: String,
}

pub fn router(probe: Arc<dyn ConnectionProbe>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { probe })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    probe: Arc<dyn ConnectionProbe>,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(event_name = "system.health.start", bind_address = %address, "health endpoint started");

    Ok(tokio::spawn(async move {
        let server =
            axum::serve(listener, router(probe)).with_graceful_shutdown(cancel.cancelled_owned());
        if let Err(error) = server.await {
            error!(
                event_name = "system.health.error",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    }))
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let slack = slack_check(state.probe.connection_state());
    let ready = slack.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "slackapp-server runtime initialized".to_string(),
        },
        slack,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn slack_check(state: ConnectionState) -> HealthCheck {
    match state {
        ConnectionState::Connected => {
            HealthCheck { status: "ready", detail: "socket mode session connected".to_string() }
        }
        other => HealthCheck { status: "degraded", detail: format!("socket mode session {other}") },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use slackapp_slack::ConnectionState;

    use crate::health::{health, ConnectionProbe, HealthState};

    pub(crate) struct FixedProbe(pub(crate) ConnectionState);

    impl ConnectionProbe for FixedProbe {
        fn connection_state(&self) -> ConnectionState {
            self.0
        }
    }

    #[tokio::test]
    async fn health_returns_ready_when_slack_is_connected() {
        let state = HealthState { probe: Arc::new(FixedProbe(ConnectionState::Connected)) };

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.slack.status, "ready");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_while_reconnecting() {
        let state = HealthState { probe: Arc::new(FixedProbe(ConnectionState::Connecting)) };

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.slack.detail, "socket mode session connecting");
        assert_eq!(payload.service.status, "ready");
    }
}
