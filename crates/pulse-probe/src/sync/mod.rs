//! Transport sync — mirrors probe status onto a [`Transport`].
//!
//! [`TransportSync`] follows one probe; [`AggregateTransportSync`] follows
//! several and signals up only while all of them are up. Both run as
//! supervised [`Component`]s: a failed transport call ends the run with a
//! [`ProbeUpdateError`] and the supervisor starts a fresh run, which
//! re-subscribes from scratch.
//!
//! Every run, however it ends, makes one last `stop` call bounded by the
//! transport deadline and ignores its outcome.

mod aggregate;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ProbeUpdateError, TransportError};
use crate::protocol::ProbeHandle;
use crate::status::{Signal, Status};
use crate::supervisor::Component;
use crate::transport::Transport;

pub use aggregate::{Aggregate, AggregateTransportSync, Decision};

/// Deadline for a single transport call.
pub const DEFAULT_TRANSPORT_DEADLINE: Duration = Duration::from_secs(1);

/// Message used for the final `stop` when a run ends.
const SHUTDOWN_MESSAGE: &str = "health signal shutting down";

/// Issue one transport call under `deadline`.
pub(crate) async fn call(
    transport: &dyn Transport,
    deadline: Duration,
    decision: &Decision,
) -> Result<(), TransportError> {
    let attempt = async {
        match decision {
            Decision::Go(message) => transport.go(message).await,
            Decision::Stop(message) => transport.stop(message).await,
        }
    };
    match tokio::time::timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Deadline(deadline)),
    }
}

/// Best-effort `stop` at the end of a run. Never fails, never hangs.
async fn final_stop(signal: Signal, transport: &dyn Transport, deadline: Duration) {
    let decision = Decision::Stop(SHUTDOWN_MESSAGE.to_string());
    match call(transport, deadline, &decision).await {
        Ok(()) => debug!(%signal, "final transport stop issued"),
        Err(e) => warn!(%signal, error = %e, "final transport stop failed"),
    }
}

/// Drive `mirror` on its own task, then issue the final stop however the
/// task ended. A panic is resumed after the stop so supervision still sees
/// it.
pub(crate) async fn run_then_stop<F>(
    signal: Signal,
    transport: &dyn Transport,
    deadline: Duration,
    mirror: F,
) -> Result<(), ProbeUpdateError>
where
    F: Future<Output = Result<(), ProbeUpdateError>> + Send + 'static,
{
    let outcome = tokio::spawn(mirror).await;
    final_stop(signal, transport, deadline).await;
    match outcome {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!(%signal, error = %e, "sync run cancelled");
            Ok(())
        }
    }
}

/// Mirrors a single probe.
#[derive(Clone)]
pub struct TransportSync {
    signal: Signal,
    probe: ProbeHandle,
    transport: Arc<dyn Transport>,
    deadline: Duration,
}

impl TransportSync {
    pub fn new(signal: Signal, probe: ProbeHandle, transport: Arc<dyn Transport>) -> Self {
        Self {
            signal,
            probe,
            transport,
            deadline: DEFAULT_TRANSPORT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn mirror(&self, shutdown: &CancellationToken) -> Result<(), ProbeUpdateError> {
        let mut subscription = match self.probe.subscribe() {
            Ok(subscription) => subscription,
            Err(e) => {
                info!(signal = %self.signal, error = %e, "probe gone before sync started");
                return Ok(());
            }
        };

        loop {
            let status: Status = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = subscription.recv() => match next {
                    Some(status) => status,
                    None => {
                        info!(signal = %self.signal, probe = %self.probe.name(), "probe terminated, sync stopping");
                        return Ok(());
                    }
                },
            };

            let decision = Decision::from_status(&status);
            debug!(signal = %self.signal, ?decision, "mirroring probe status");
            call(self.transport.as_ref(), self.deadline, &decision)
                .await
                .map_err(|source| ProbeUpdateError {
                    signal: self.signal,
                    source,
                })?;
        }
    }
}

#[async_trait]
impl Component for TransportSync {
    fn name(&self) -> String {
        format!("{}-sync", self.signal)
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), ProbeUpdateError> {
        let this = self.clone();
        let mirror = async move { this.mirror(&shutdown).await };
        run_then_stop(self.signal, self.transport.as_ref(), self.deadline, mirror).await
    }
}
