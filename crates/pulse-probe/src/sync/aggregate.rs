//! Multi-probe sync: the signal is the logical AND of several probes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DEFAULT_TRANSPORT_DEADLINE, call, run_then_stop};
use crate::error::ProbeUpdateError;
use crate::protocol::ProbeHandle;
use crate::status::{Signal, Status};
use crate::supervisor::Component;
use crate::transport::Transport;

/// A transport call the sync has decided to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Go(String),
    Stop(String),
}

impl Decision {
    pub fn from_status(status: &Status) -> Self {
        if status.up {
            Decision::Go(status.message.clone())
        } else {
            Decision::Stop(status.message.clone())
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Reported(Status),
    Terminated,
}

/// Per-probe last-known status and the signal last sent for them.
///
/// Keys are fixed at construction. A key counts as down until its probe
/// reports, and forever once its probe terminates. A decision is produced
/// only when the combined signal differs from the last one sent.
#[derive(Debug, Clone)]
pub struct Aggregate {
    slots: BTreeMap<String, Slot>,
    last_signal: Option<bool>,
}

impl Aggregate {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            slots: keys.into_iter().map(|k| (k.into(), Slot::Pending)).collect(),
            last_signal: None,
        }
    }

    /// Record a probe's status. Reports for terminated or unknown keys
    /// are ignored.
    pub fn report(&mut self, key: &str, status: Status) -> Option<Decision> {
        match self.slots.get_mut(key) {
            Some(slot) if !matches!(slot, Slot::Terminated) => *slot = Slot::Reported(status),
            _ => return None,
        }
        self.decide()
    }

    /// Mark a probe as terminated. It never reports up again.
    pub fn terminate(&mut self, key: &str) -> Option<Decision> {
        let slot = self.slots.get_mut(key)?;
        *slot = Slot::Terminated;
        self.decide()
    }

    pub fn is_up(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .values()
                .all(|slot| matches!(slot, Slot::Reported(status) if status.up))
    }

    pub fn all_terminated(&self) -> bool {
        self.slots.values().all(|slot| matches!(slot, Slot::Terminated))
    }

    fn decide(&mut self) -> Option<Decision> {
        let up = self.is_up();
        if self.last_signal == Some(up) {
            return None;
        }
        self.last_signal = Some(up);
        Some(if up {
            Decision::Go(self.describe_up())
        } else {
            Decision::Stop(self.describe_down())
        })
    }

    fn describe_up(&self) -> String {
        self.slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Reported(status) => Some(format!("{key}: {}", status.message)),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Explains the first key holding the signal down.
    fn describe_down(&self) -> String {
        for (key, slot) in &self.slots {
            match slot {
                Slot::Pending => return format!("{key}: waiting for first status"),
                Slot::Terminated => return format!("{key}: probe terminated"),
                Slot::Reported(status) if !status.up => {
                    return format!("{key}: {}", status.message);
                }
                Slot::Reported(_) => {}
            }
        }
        "no probes registered".to_string()
    }
}

/// Mirrors the AND of several named probes.
#[derive(Clone)]
pub struct AggregateTransportSync {
    signal: Signal,
    probes: BTreeMap<String, ProbeHandle>,
    transport: Arc<dyn Transport>,
    deadline: Duration,
}

impl AggregateTransportSync {
    pub fn new(
        signal: Signal,
        probes: BTreeMap<String, ProbeHandle>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            signal,
            probes,
            transport,
            deadline: DEFAULT_TRANSPORT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn mirror(&self, shutdown: &CancellationToken) -> Result<(), ProbeUpdateError> {
        let mut aggregate = Aggregate::new(self.probes.keys().cloned());
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Option<Status>)>();
        // Dropped with this run, which aborts the forwarders and with them
        // the subscriptions.
        let mut forwarders = JoinSet::new();

        for (key, probe) in &self.probes {
            let mut subscription = match probe.subscribe() {
                Ok(subscription) => subscription,
                Err(e) => {
                    debug!(signal = %self.signal, %key, error = %e, "probe already gone");
                    let _ = tx.send((key.clone(), None));
                    continue;
                }
            };
            let key = key.clone();
            let tx = tx.clone();
            forwarders.spawn(async move {
                while let Some(status) = subscription.recv().await {
                    if tx.send((key.clone(), Some(status))).is_err() {
                        return;
                    }
                }
                let _ = tx.send((key, None));
            });
        }
        drop(tx);

        loop {
            let (key, update) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = rx.recv() => match next {
                    Some(next) => next,
                    None => return Ok(()),
                },
            };

            let decision = match update {
                Some(status) => aggregate.report(&key, status),
                None => {
                    info!(signal = %self.signal, %key, "aggregated probe terminated");
                    aggregate.terminate(&key)
                }
            };

            if let Some(decision) = decision {
                debug!(signal = %self.signal, ?decision, "aggregate signal changed");
                call(self.transport.as_ref(), self.deadline, &decision)
                    .await
                    .map_err(|source| ProbeUpdateError {
                        signal: self.signal,
                        source,
                    })?;
            }

            if aggregate.all_terminated() {
                info!(signal = %self.signal, "all aggregated probes terminated, sync stopping");
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Component for AggregateTransportSync {
    fn name(&self) -> String {
        format!("{}-aggregate-sync", self.signal)
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), ProbeUpdateError> {
        let this = self.clone();
        let mirror = async move { this.mirror(&shutdown).await };
        run_then_stop(self.signal, self.transport.as_ref(), self.deadline, mirror).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn go_count(decisions: &[Option<Decision>]) -> usize {
        decisions
            .iter()
            .filter(|d| matches!(d, Some(Decision::Go(_))))
            .count()
    }

    #[test]
    fn up_only_after_every_key_is_up() {
        let mut aggregate = Aggregate::new(["first", "second"]);
        let decisions = vec![
            aggregate.report("first", Status::down("pending")),
            aggregate.report("second", Status::down("pending")),
            aggregate.report("first", Status::up("ready")),
            aggregate.report("second", Status::up("ready")),
        ];

        assert!(matches!(decisions[0], Some(Decision::Stop(_))));
        assert_eq!(decisions[1], None);
        assert_eq!(decisions[2], None);
        assert_eq!(
            decisions[3],
            Some(Decision::Go("first: ready; second: ready".into()))
        );
        assert_eq!(go_count(&decisions), 1);
    }

    #[test]
    fn a_single_down_stops_once() {
        let mut aggregate = Aggregate::new(["first", "second"]);
        aggregate.report("first", Status::up("ready"));
        aggregate.report("second", Status::up("ready"));

        assert_eq!(
            aggregate.report("second", Status::down("isolated")),
            Some(Decision::Stop("second: isolated".into()))
        );
        // Already down; more bad news is not another call.
        assert_eq!(aggregate.report("first", Status::down("store failure")), None);
        assert_eq!(aggregate.report("second", Status::down("isolated")), None);

        aggregate.report("first", Status::up("ready"));
        assert!(matches!(
            aggregate.report("second", Status::up("ready")),
            Some(Decision::Go(_))
        ));
    }

    #[test]
    fn pending_key_holds_signal_down() {
        let mut aggregate = Aggregate::new(["first", "second"]);
        assert_eq!(
            aggregate.report("first", Status::up("ready")),
            Some(Decision::Stop("second: waiting for first status".into()))
        );
        assert!(!aggregate.is_up());
    }

    #[test]
    fn terminated_key_never_reverts() {
        let mut aggregate = Aggregate::new(["first", "second"]);
        aggregate.report("first", Status::up("ready"));
        aggregate.report("second", Status::up("ready"));

        assert_eq!(
            aggregate.terminate("first"),
            Some(Decision::Stop("first: probe terminated".into()))
        );
        assert_eq!(aggregate.report("first", Status::up("ready")), None);
        assert!(!aggregate.is_up());
        assert!(!aggregate.all_terminated());

        aggregate.terminate("second");
        assert!(aggregate.all_terminated());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut aggregate = Aggregate::new(["first"]);
        assert_eq!(aggregate.report("other", Status::up("ready")), None);
        assert_eq!(aggregate.terminate("other"), None);
    }
}
