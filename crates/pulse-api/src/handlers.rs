//! Health handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use pulse_probe::{ProbeError, ProbeHandle, Status};
use serde::Serialize;
use tracing::{debug, warn};

use crate::HealthState;

/// Message reported when a probe cannot be asked.
pub const NO_RESPONSE: &str = "probe did not respond";

/// JSON body of every health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub up: bool,
    pub message: String,
}

impl From<Status> for HealthResponse {
    fn from(status: Status) -> Self {
        Self {
            up: status.up,
            message: status.message,
        }
    }
}

/// GET /alive
pub async fn alive(State(state): State<HealthState>) -> impl IntoResponse {
    check(&state.liveness, &state).await
}

/// GET /ready
pub async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    check(&state.readiness, &state).await
}

async fn check(probe: &ProbeHandle, state: &HealthState) -> (StatusCode, Json<HealthResponse>) {
    let body = match probe.current(state.ask_timeout).await {
        Ok(status) => {
            debug!(signal = %probe.signal(), %status, "health checked");
            HealthResponse::from(status)
        }
        Err(e) => {
            warn!(signal = %probe.signal(), probe = %probe.name(), error = %e, "health check failed");
            HealthResponse {
                up: false,
                message: match e {
                    ProbeError::AskTimeout { .. } => NO_RESPONSE.to_string(),
                    ProbeError::Terminated(_) => format!("{NO_RESPONSE}: {e}"),
                },
            }
        }
    };

    let code = if body.up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
