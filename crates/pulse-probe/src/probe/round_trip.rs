//! One write-then-recover cycle against the journal.
//!
//! A worker recovers what the previous worker left behind, appends a new
//! marker entry, snapshots it, reports, and then (except on the first
//! attempt) prunes older records before exiting.

use std::sync::Arc;

use pulse_journal::JournalStore;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::RoundTripFailure;

/// Result of one journal or snapshot axis. `None` means the axis was not
/// exercised this time.
pub type AxisOutcome = Option<Result<(), RoundTripFailure>>;

/// What a worker found, sent to the owning probe.
#[derive(Debug, Clone, Default)]
pub struct RoundTripReport {
    pub journal: AxisOutcome,
    pub snapshot: AxisOutcome,
    /// Seq of the marker entry written, if the append succeeded.
    pub written: Option<u64>,
    /// Seq of the snapshot saved, if the save succeeded.
    pub snapshotted: Option<u64>,
}

/// Records the previous worker claims to have written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expectation {
    pub journal: Option<u64>,
    pub snapshot: Option<u64>,
}

pub(crate) struct RoundTrip {
    pub store: Arc<dyn JournalStore>,
    pub persistence_id: String,
    /// 1-based attempt number within this process.
    pub attempt: u64,
    pub expect: Expectation,
}

impl RoundTrip {
    pub(crate) async fn run(self, report: oneshot::Sender<RoundTripReport>) {
        let outcome = self.exchange().await;
        let prune_below = match (&outcome.written, &outcome.snapshotted) {
            (Some(written), Some(_)) if self.attempt > 1 => Some(*written),
            _ => None,
        };

        // The probe may have given up on us already.
        let _ = report.send(outcome);

        // Never prune on the first attempt: a cold-start failure needs the
        // records from the previous run to diagnose.
        if let Some(below_seq) = prune_below {
            match self.store.prune(&self.persistence_id, below_seq).await {
                Ok(stats) => debug!(
                    attempt = self.attempt,
                    entries = stats.entries_removed,
                    snapshots = stats.snapshots_removed,
                    "old round trip records pruned"
                ),
                Err(e) => warn!(attempt = self.attempt, error = %e, "round trip prune failed"),
            }
        }
    }

    async fn exchange(&self) -> RoundTripReport {
        let pid = self.persistence_id.as_str();
        let mut report = RoundTripReport::default();

        let snapshot = match self.store.load_snapshot(pid).await {
            Ok(snapshot) => {
                let seq = snapshot.map(|s| s.seq);
                match self.expect.snapshot {
                    Some(expected) if seq.is_none_or(|seq| seq < expected) => {
                        Err(RoundTripFailure::Lost { seq: expected })
                    }
                    _ => Ok(seq.unwrap_or(0)),
                }
            }
            Err(e) => Err(RoundTripFailure::from(e)),
        };

        let highest = match self.store.replay(pid).await {
            Ok(entries) => {
                let lost = self
                    .expect
                    .journal
                    .filter(|expected| !entries.iter().any(|entry| entry.seq == *expected));
                if let Some(seq) = lost {
                    report.journal = Some(Err(RoundTripFailure::Lost { seq }));
                    report.snapshot = Some(snapshot.map(|_| ()));
                    return report;
                }
                entries.last().map(|entry| entry.seq).unwrap_or(0)
            }
            Err(e) => {
                report.journal = Some(Err(e.into()));
                report.snapshot = Some(snapshot.map(|_| ()));
                return report;
            }
        };

        let seq = highest.max(*snapshot.as_ref().unwrap_or(&0)) + 1;
        let marker = format!("round trip {} of {pid}", self.attempt);

        if let Err(e) = self.store.append(pid, seq, &marker).await {
            report.journal = Some(Err(e.into()));
            // The snapshot step never ran; only a failed recovery counts.
            if let Err(e) = snapshot {
                report.snapshot = Some(Err(e));
            }
            return report;
        }
        report.journal = Some(Ok(()));
        report.written = Some(seq);

        report.snapshot = match snapshot {
            Err(e) => Some(Err(e)),
            Ok(_) => match self.store.save_snapshot(pid, seq, &marker).await {
                Ok(()) => {
                    report.snapshotted = Some(seq);
                    Some(Ok(()))
                }
                Err(e) => Some(Err(e.into())),
            },
        };

        debug!(attempt = self.attempt, seq, "round trip exchanged");
        report
    }
}
