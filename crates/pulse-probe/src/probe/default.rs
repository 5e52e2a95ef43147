//! Default and stand-in probes.
//!
//! The default probe reports whatever its [`StatusSetter`] last told it.
//! The unavailable probe stands in for a misconfigured provider and is
//! permanently down.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::ProbeError;
use crate::protocol::{ProbeContext, ProbeHandle, serve, spawn_probe};
use crate::status::{Signal, Status};

/// Drives a default probe's status from outside.
#[derive(Debug, Clone)]
pub struct StatusSetter {
    name: String,
    tx: mpsc::UnboundedSender<Status>,
}

impl StatusSetter {
    pub fn set(&self, status: Status) -> Result<(), ProbeError> {
        self.tx
            .send(status)
            .map_err(|_| ProbeError::Terminated(self.name.clone()))
    }

    pub fn up(&self, message: impl Into<String>) -> Result<(), ProbeError> {
        self.set(Status::up(message))
    }

    pub fn down(&self, message: impl Into<String>) -> Result<(), ProbeError> {
        self.set(Status::down(message))
    }
}

/// Spawn a probe whose status is set explicitly.
///
/// Every `set` is published, even if it repeats the current status.
pub fn spawn_default(name: &str, signal: Signal, initial: Status) -> (ProbeHandle, StatusSetter) {
    let (tx, updates) = mpsc::unbounded_channel();
    let handle = spawn_probe(name, signal, initial, move |ctx| run_default(ctx, updates));
    let setter = StatusSetter {
        name: name.to_string(),
        tx,
    };
    (handle, setter)
}

async fn run_default(mut ctx: ProbeContext, mut updates: mpsc::UnboundedReceiver<Status>) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            Some(command) = ctx.commands.recv() => ctx.hub.handle(command),
            Some(status) = updates.recv() => {
                info!(probe = %ctx.name, %status, "status set");
                ctx.hub.publish(status);
            }
        }
    }
}

/// Spawn an always-down probe explaining why the real one is missing.
pub fn spawn_unavailable(signal: Signal, reason: impl fmt::Display) -> ProbeHandle {
    let status = Status::down(format!("misconfigured {signal} probe: {reason}"));
    warn!(%signal, message = %status.message, "probe replaced by unavailable stand-in");
    spawn_probe("unavailable", signal, status, serve)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const ASK: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn setter_drives_status() {
        let (probe, setter) = spawn_default("first", Signal::Readiness, Status::down("pending"));
        let mut subscription = probe.subscribe().unwrap();
        assert_eq!(subscription.recv().await, Some(Status::down("pending")));

        setter.up("ready").unwrap();
        assert_eq!(subscription.recv().await, Some(Status::up("ready")));
        assert_eq!(probe.current(ASK).await.unwrap(), Status::up("ready"));
    }

    #[tokio::test]
    async fn setter_fails_after_probe_stops() {
        let (probe, setter) = spawn_default("first", Signal::Liveness, Status::up("ok"));
        probe.stop();
        probe.terminated().await;
        // The receiver is dropped with the task.
        assert!(setter.down("late").is_err());
    }

    #[tokio::test]
    async fn unavailable_probe_is_always_down() {
        let probe = spawn_unavailable(Signal::Liveness, "unknown provider 'bogus'");
        let status = probe.current(ASK).await.unwrap();
        assert!(!status.up);
        assert!(status.message.contains("misconfigured liveness probe"));
        assert!(status.message.contains("bogus"));
    }
}
