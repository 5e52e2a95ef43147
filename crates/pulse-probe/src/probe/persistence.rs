//! Persistence liveness probe.
//!
//! Proves the journal is reachable and working by repeatedly running a
//! short-lived [`RoundTrip`] worker. The probe is an explicit state
//! machine:
//!
//! ```text
//!            report / timeout    worker exits / drain deadline
//! Awaiting ───────────────────► Draining ─────────────────────► Delaying
//!    ▲  │ worker exits without report                      │
//!    │  └──────────────────────────────────────────────────────────┤
//!    └──────────────────────── delay elapsed ───────────────────────┘
//! ```
//!
//! Every path back to `Awaiting` goes through `Delaying`, so a failing or
//! crashing store is never hot-looped. `Draining` is bounded by the same
//! timeout as `Awaiting`: a worker stuck in its post-report prune is
//! aborted rather than holding the last status forever.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use pulse_journal::JournalStore;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::probe::round_trip::{Expectation, RoundTrip, RoundTripReport};
use crate::protocol::{ProbeContext, ProbeHandle, StatusHub, spawn_probe};
use crate::status::{Signal, Status};

/// Default time a round trip may take before the probe reports a timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between one worker exiting and the next starting.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

/// Tunables for the persistence probe.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub persistence_id: String,
    pub timeout: Duration,
    pub delay: Duration,
}

impl PersistenceSettings {
    pub fn for_node(node: &str) -> Self {
        Self {
            persistence_id: format!("pulse-liveness-{node}"),
            timeout: DEFAULT_TIMEOUT,
            delay: DEFAULT_DELAY,
        }
    }
}

/// Tri-state result of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    /// No round trip has exercised this axis yet.
    Unknown,
    Recovered,
    Failed,
}

/// Accumulated round-trip results.
///
/// An axis only moves when a report exercises it, so a journal failure
/// leaves a previously recovered snapshot axis untouched.
#[derive(Debug, Clone)]
pub struct RoundTripRecord {
    pub journal: AxisState,
    pub snapshot: AxisState,
    journal_failure: Option<String>,
    snapshot_failure: Option<String>,
}

impl Default for RoundTripRecord {
    fn default() -> Self {
        Self {
            journal: AxisState::Unknown,
            snapshot: AxisState::Unknown,
            journal_failure: None,
            snapshot_failure: None,
        }
    }
}

impl RoundTripRecord {
    pub fn apply(&mut self, report: &RoundTripReport) {
        if let Some(outcome) = &report.journal {
            (self.journal, self.journal_failure) = match outcome {
                Ok(()) => (AxisState::Recovered, None),
                Err(e) => (AxisState::Failed, Some(e.to_string())),
            };
        }
        if let Some(outcome) = &report.snapshot {
            (self.snapshot, self.snapshot_failure) = match outcome {
                Ok(()) => (AxisState::Recovered, None),
                Err(e) => (AxisState::Failed, Some(e.to_string())),
            };
        }
    }

    pub fn status(&self) -> Status {
        if self.journal == AxisState::Failed || self.snapshot == AxisState::Failed {
            let failures: Vec<String> = [
                ("journal", &self.journal_failure),
                ("snapshot", &self.snapshot_failure),
            ]
            .into_iter()
            .filter_map(|(axis, failure)| failure.as_ref().map(|f| format!("{axis}: {f}")))
            .collect();
            return Status::down(format!("persistence store failure: {}", failures.join("; ")));
        }
        if self.journal == AxisState::Recovered && self.snapshot == AxisState::Recovered {
            return Status::up("persistence round trip succeeded");
        }
        warming_up()
    }
}

fn warming_up() -> Status {
    Status::down("persistence round trip has not completed yet")
}

enum Phase {
    /// A worker is running and its report is outstanding.
    Awaiting {
        worker: JoinHandle<()>,
        report: oneshot::Receiver<RoundTripReport>,
        deadline: Pin<Box<Sleep>>,
    },
    /// Waiting for the worker to exit.
    Draining {
        worker: JoinHandle<()>,
        reported: bool,
        deadline: Pin<Box<Sleep>>,
    },
    /// Waiting out the inter-probe delay.
    Delaying { until: Pin<Box<Sleep>> },
    Stopped,
}

enum PhaseEvent {
    Reported(RoundTripReport),
    /// The worker dropped its report channel without sending.
    Abandoned,
    TimedOut,
    /// The worker outlived the drain deadline.
    Stalled,
    Exited(Result<(), JoinError>),
    DelayElapsed,
}

struct PersistenceProbe {
    store: Arc<dyn JournalStore>,
    settings: PersistenceSettings,
    record: RoundTripRecord,
    expect: Expectation,
    attempt: u64,
    phase: Phase,
}

impl PersistenceProbe {
    fn new(store: Arc<dyn JournalStore>, settings: PersistenceSettings) -> Self {
        Self {
            store,
            settings,
            record: RoundTripRecord::default(),
            expect: Expectation::default(),
            attempt: 0,
            phase: Phase::Stopped,
        }
    }

    fn dispatch(&mut self) -> Phase {
        self.attempt += 1;
        let (tx, report) = oneshot::channel();
        let round_trip = RoundTrip {
            store: self.store.clone(),
            persistence_id: self.settings.persistence_id.clone(),
            attempt: self.attempt,
            expect: self.expect,
        };
        debug!(attempt = self.attempt, "round trip dispatched");
        Phase::Awaiting {
            worker: tokio::spawn(round_trip.run(tx)),
            report,
            deadline: Box::pin(tokio::time::sleep(self.settings.timeout)),
        }
    }

    fn drain(&self, worker: JoinHandle<()>, reported: bool) -> Phase {
        Phase::Draining {
            worker,
            reported,
            deadline: Box::pin(tokio::time::sleep(self.settings.timeout)),
        }
    }

    fn delay(&self) -> Phase {
        Phase::Delaying {
            until: Box::pin(tokio::time::sleep(self.settings.delay)),
        }
    }

    async fn next_event(&mut self) -> PhaseEvent {
        match &mut self.phase {
            Phase::Awaiting {
                worker,
                report,
                deadline,
            } => tokio::select! {
                biased;
                outcome = report => match outcome {
                    Ok(report) => PhaseEvent::Reported(report),
                    Err(_) => PhaseEvent::Abandoned,
                },
                _ = deadline.as_mut() => PhaseEvent::TimedOut,
                exited = &mut *worker => PhaseEvent::Exited(exited),
            },
            Phase::Draining {
                worker, deadline, ..
            } => tokio::select! {
                biased;
                exited = &mut *worker => PhaseEvent::Exited(exited),
                _ = deadline.as_mut() => PhaseEvent::Stalled,
            },
            Phase::Delaying { until } => {
                until.as_mut().await;
                PhaseEvent::DelayElapsed
            }
            Phase::Stopped => std::future::pending().await,
        }
    }

    fn on_event(&mut self, event: PhaseEvent, hub: &mut StatusHub) {
        let phase = std::mem::replace(&mut self.phase, Phase::Stopped);
        self.phase = match (phase, event) {
            (Phase::Awaiting { worker, .. }, PhaseEvent::Reported(report)) => {
                self.evaluate(&report, hub);
                self.drain(worker, true)
            }
            (Phase::Awaiting { worker, .. }, PhaseEvent::TimedOut) => {
                warn!(attempt = self.attempt, timeout = ?self.settings.timeout, "round trip timed out");
                hub.transition(Status::down(format!(
                    "persistence round trip timed out after {:?}",
                    self.settings.timeout
                )));
                worker.abort();
                self.drain(worker, true)
            }
            (Phase::Awaiting { worker, .. }, PhaseEvent::Abandoned) => self.drain(worker, false),
            (Phase::Awaiting { .. }, PhaseEvent::Exited(exited)) => {
                self.crashed(exited, hub);
                self.delay()
            }
            (Phase::Draining { reported, .. }, PhaseEvent::Exited(exited)) => {
                if reported {
                    if matches!(&exited, Err(e) if e.is_panic()) {
                        error!(attempt = self.attempt, "round trip worker panicked after reporting");
                    }
                } else {
                    self.crashed(exited, hub);
                }
                self.delay()
            }
            (Phase::Draining { worker, reported, .. }, PhaseEvent::Stalled) => {
                warn!(
                    attempt = self.attempt,
                    timeout = ?self.settings.timeout,
                    "round trip worker still running after its report, aborting"
                );
                worker.abort();
                if !reported {
                    hub.transition(Status::down("persistence round trip worker crashed"));
                }
                self.delay()
            }
            (Phase::Delaying { .. }, PhaseEvent::DelayElapsed) => self.dispatch(),
            (phase, _) => phase,
        };
    }

    fn evaluate(&mut self, report: &RoundTripReport, hub: &mut StatusHub) {
        self.record.apply(report);
        match &report.journal {
            Some(Ok(())) => self.expect.journal = report.written,
            Some(Err(_)) => self.expect.journal = None,
            None => {}
        }
        match &report.snapshot {
            Some(Ok(())) => self.expect.snapshot = report.snapshotted,
            Some(Err(_)) => self.expect.snapshot = None,
            None => {}
        }

        let status = self.record.status();
        if !status.up {
            warn!(attempt = self.attempt, message = %status.message, "round trip failed");
        }
        if hub.transition(status) {
            info!(status = %hub.current(), "persistence liveness changed");
        }
    }

    fn crashed(&self, exited: Result<(), JoinError>, hub: &mut StatusHub) {
        match exited {
            Err(e) if e.is_panic() => error!(attempt = self.attempt, "round trip worker crashed"),
            _ => error!(attempt = self.attempt, "round trip worker exited without reporting"),
        }
        hub.transition(Status::down("persistence round trip worker crashed"));
    }

    fn stop(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Awaiting { worker, .. } | Phase::Draining { worker, .. } => worker.abort(),
            Phase::Delaying { .. } | Phase::Stopped => {}
        }
    }
}

/// Spawn the persistence liveness probe. The first worker starts
/// immediately.
pub fn spawn_persistence_liveness(
    store: Arc<dyn JournalStore>,
    settings: PersistenceSettings,
) -> ProbeHandle {
    let probe = PersistenceProbe::new(store, settings);
    spawn_probe("persistence-liveness", Signal::Liveness, warming_up(), move |ctx| {
        run_persistence(ctx, probe)
    })
}

async fn run_persistence(mut ctx: ProbeContext, mut probe: PersistenceProbe) {
    probe.phase = probe.dispatch();
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            Some(command) = ctx.commands.recv() => ctx.hub.handle(command),
            event = probe.next_event() => probe.on_event(event, &mut ctx.hub),
        }
    }
    probe.stop();
    debug!(probe = %ctx.name, "probe stopped");
}
