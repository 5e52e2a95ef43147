//! pulse-api — HTTP health endpoints for Pulse.
//!
//! Each request asks the probe for its current status and answers with
//! 200 when it is up and 503 otherwise. A probe that does not answer in
//! time counts as down.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/alive` | Liveness status |
//! | GET | `/ready` | Readiness status |

pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use pulse_probe::ProbeHandle;

/// Shared state for the health handlers.
#[derive(Clone)]
pub struct HealthState {
    pub liveness: ProbeHandle,
    pub readiness: ProbeHandle,
    /// How long to wait for a probe to answer.
    pub ask_timeout: Duration,
}

/// Build the health router.
pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/alive", get(handlers::alive))
        .route("/ready", get(handlers::ready))
        .with_state(state)
}
