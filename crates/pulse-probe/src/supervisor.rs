//! Supervision: rerun a failed component with fresh state.
//!
//! Each run gets a child of the supervisor's shutdown token and executes
//! on its own task, so a panic is observed as a failed run rather than
//! taking the supervisor down with it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ProbeUpdateError;

/// Backoff used when none is configured.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_millis(500);

/// A restartable unit of work.
///
/// `run` must rebuild all of its state on every call. Returning `Ok`
/// means the component finished on its own and must not be restarted.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    fn name(&self) -> String;

    async fn run(&self, shutdown: CancellationToken) -> Result<(), ProbeUpdateError>;
}

/// What to do when a run fails or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStrategy {
    Stop,
    Restart { backoff: Duration },
}

impl Default for RestartStrategy {
    fn default() -> Self {
        RestartStrategy::Restart {
            backoff: DEFAULT_RESTART_BACKOFF,
        }
    }
}

/// How a supervised component ended for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The component finished on its own.
    Completed,
    /// Shutdown was requested.
    Shutdown,
    /// A run failed under [`RestartStrategy::Stop`].
    Failed(String),
}

/// Handle to a supervised component.
pub struct Supervised {
    name: String,
    restarts: Arc<AtomicU64>,
    shutdown: CancellationToken,
    task: JoinHandle<SupervisorExit>,
}

impl Supervised {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of restarts so far.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the supervisor to finish.
    pub async fn join(self) -> SupervisorExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => SupervisorExit::Failed(format!("supervisor task failed: {e}")),
        }
    }
}

/// Run `component` under `strategy` until it completes, fails for good,
/// or `shutdown` is cancelled.
pub fn supervise(
    component: Arc<dyn Component>,
    strategy: RestartStrategy,
    shutdown: CancellationToken,
) -> Supervised {
    let name = component.name();
    let restarts = Arc::new(AtomicU64::new(0));
    let task = tokio::spawn(supervise_loop(
        component,
        strategy,
        shutdown.clone(),
        restarts.clone(),
    ));
    info!(component = %name, ?strategy, "component supervised");

    Supervised {
        name,
        restarts,
        shutdown,
        task,
    }
}

async fn supervise_loop(
    component: Arc<dyn Component>,
    strategy: RestartStrategy,
    shutdown: CancellationToken,
    restarts: Arc<AtomicU64>,
) -> SupervisorExit {
    let name = component.name();

    loop {
        let run = {
            let component = component.clone();
            let token = shutdown.child_token();
            tokio::spawn(async move { component.run(token).await })
        };

        let failure = match run.await {
            Ok(Ok(())) if shutdown.is_cancelled() => return SupervisorExit::Shutdown,
            Ok(Ok(())) => {
                info!(component = %name, "component completed");
                return SupervisorExit::Completed;
            }
            Ok(Err(e)) => {
                warn!(component = %name, error = %e, "component failed");
                e.to_string()
            }
            Err(e) if e.is_panic() => {
                error!(component = %name, "component panicked");
                format!("{name} panicked")
            }
            Err(_) => return SupervisorExit::Shutdown,
        };

        let backoff = match strategy {
            RestartStrategy::Stop => return SupervisorExit::Failed(failure),
            RestartStrategy::Restart { backoff } => backoff,
        };

        tokio::select! {
            _ = shutdown.cancelled() => return SupervisorExit::Shutdown,
            _ = tokio::time::sleep(backoff) => {}
        }

        let count = restarts.fetch_add(1, Ordering::Relaxed) + 1;
        info!(component = %name, restarts = count, "restarting component");
    }
}
