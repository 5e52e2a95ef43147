//! Probe variants and provider wiring.

mod cluster;
mod default;
mod persistence;
mod round_trip;

use std::sync::Arc;
use std::time::Duration;

use pulse_journal::{JournalError, JournalStore};
use tracing::info;

use crate::config::ProviderKind;
use crate::membership::{MembershipFeed, NodeId};
use crate::protocol::ProbeHandle;
use crate::status::{Signal, Status};

pub use cluster::{
    ClusterView, DEFAULT_ISOLATION_DEBOUNCE, spawn_cluster_liveness, spawn_cluster_readiness,
};
pub use default::{StatusSetter, spawn_default, spawn_unavailable};
pub use persistence::{
    AxisState, DEFAULT_DELAY, DEFAULT_TIMEOUT, PersistenceSettings, RoundTripRecord,
    spawn_persistence_liveness,
};
pub use round_trip::{AxisOutcome, Expectation, RoundTripReport};

/// Everything the providers may need to build a probe.
#[derive(Clone)]
pub struct ProbeDeps {
    pub node: NodeId,
    pub feed: MembershipFeed,
    /// The journal, or why it could not be opened.
    pub store: Result<Arc<dyn JournalStore>, JournalError>,
    pub persistence: PersistenceSettings,
    pub isolation_debounce: Duration,
}

/// Build the probe `provider` names for `signal`.
///
/// Never fails: an unusable provider yields an always-down stand-in whose
/// message says what is wrong.
pub fn build_probe(signal: Signal, provider: &str, deps: &ProbeDeps) -> ProbeHandle {
    let kind = match ProviderKind::resolve(signal, provider) {
        Ok(kind) => kind,
        Err(e) => return spawn_unavailable(signal, e),
    };
    info!(%signal, provider = %kind, node = %deps.node, "building probe");

    match (kind, signal) {
        (ProviderKind::Default, _) => {
            let (handle, _setter) = spawn_default(
                "default",
                signal,
                Status::up(format!("{signal} reported by default provider")),
            );
            handle
        }
        (ProviderKind::Cluster, Signal::Liveness) => spawn_cluster_liveness(&deps.node, &deps.feed),
        (ProviderKind::Cluster, Signal::Readiness) => {
            spawn_cluster_readiness(&deps.node, &deps.feed, deps.isolation_debounce)
        }
        (ProviderKind::Persistence, _) => match &deps.store {
            Ok(store) => spawn_persistence_liveness(store.clone(), deps.persistence.clone()),
            Err(e) => spawn_unavailable(signal, format!("journal could not be opened: {e}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use pulse_journal::RedbJournal;

    use super::*;

    const ASK: Duration = Duration::from_secs(1);

    fn deps(store: Result<Arc<dyn JournalStore>, JournalError>) -> ProbeDeps {
        ProbeDeps {
            node: "a".into(),
            feed: MembershipFeed::standalone("a"),
            store,
            persistence: PersistenceSettings::for_node("a"),
            isolation_debounce: DEFAULT_ISOLATION_DEBOUNCE,
        }
    }

    #[tokio::test]
    async fn unknown_provider_yields_unavailable_probe() {
        let probe = build_probe(Signal::Readiness, "bogus", &deps(Err(JournalError::Open("x".into()))));
        let status = probe.current(ASK).await.unwrap();
        assert!(!status.up);
        assert!(status.message.contains("bogus"));
    }

    #[tokio::test]
    async fn persistence_readiness_is_misconfiguration() {
        let store: Arc<dyn JournalStore> = Arc::new(RedbJournal::open_in_memory().unwrap());
        let probe = build_probe(Signal::Readiness, "persistence", &deps(Ok(store)));
        assert_eq!(probe.name(), "unavailable");
        assert!(!probe.current(ASK).await.unwrap().up);
    }

    #[tokio::test]
    async fn unopened_journal_yields_unavailable_probe() {
        let probe = build_probe(
            Signal::Liveness,
            "persistence",
            &deps(Err(JournalError::Open("disk gone".into()))),
        );
        let status = probe.current(ASK).await.unwrap();
        assert!(!status.up);
        assert!(status.message.contains("disk gone"));
    }

    #[tokio::test]
    async fn cluster_and_default_providers() {
        let d = deps(Err(JournalError::Open("unused".into())));
        let liveness = build_probe(Signal::Liveness, "cluster", &d);
        assert_eq!(liveness.name(), "cluster-liveness");
        assert!(liveness.current(ASK).await.unwrap().up);

        let readiness = build_probe(Signal::Readiness, "default", &d);
        assert!(readiness.current(ASK).await.unwrap().up);
    }
}
