//! Daemon assembly and shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use pulse_api::{HealthState, build_router};
use pulse_journal::{JournalError, JournalStore, RedbJournal};
use pulse_probe::config::ProviderKind;
use pulse_probe::{
    AggregateTransportSync, Component, FileTransport, MembershipFeed, ProbeDeps, ProbeHandle,
    PulseConfig, RestartStrategy, Signal, Supervised, TcpTransport, Transport, TransportSpec,
    TransportSync, build_probe, supervise,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running set of probes and supervised syncs.
pub struct Daemon {
    pub liveness: ProbeHandle,
    pub readiness: ProbeHandle,
    router: Router,
    syncs: Vec<Supervised>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Build every probe and start the syncs configured for them.
    ///
    /// Invalid durations fail here. Unknown providers do not; they become
    /// always-down probes.
    pub fn start(config: &PulseConfig) -> anyhow::Result<Self> {
        let node = config.node.id.clone();
        let deadline = config.transport.deadline()?;
        let strategy = RestartStrategy::Restart {
            backoff: config.transport.restart_backoff()?,
        };
        let ask_timeout = config.http.ask_timeout()?;
        let persistence = config.persistence.settings(&node)?;
        let isolation_debounce = config.cluster.isolation_debounce()?;

        let deps = ProbeDeps {
            node: node.clone(),
            feed: MembershipFeed::standalone(&node),
            store: open_journal(config),
            persistence,
            isolation_debounce,
        };

        let liveness = build_probe(Signal::Liveness, config.provider(Signal::Liveness), &deps);
        let readiness = build_probe(Signal::Readiness, config.provider(Signal::Readiness), &deps);

        let shutdown = CancellationToken::new();
        let mut syncs = Vec::new();

        if let Some(spec) = &config.liveness.transport {
            let sync = TransportSync::new(Signal::Liveness, liveness.clone(), build_transport(spec))
                .with_deadline(deadline);
            syncs.push(supervise(Arc::new(sync), strategy, shutdown.clone()));
        }

        if let Some(spec) = &config.readiness.transport {
            let transport = build_transport(spec);
            let sync: Arc<dyn Component> = if config.readiness.include_liveness {
                let probes = BTreeMap::from([
                    ("liveness".to_string(), liveness.clone()),
                    ("readiness".to_string(), readiness.clone()),
                ]);
                Arc::new(
                    AggregateTransportSync::new(Signal::Readiness, probes, transport)
                        .with_deadline(deadline),
                )
            } else {
                Arc::new(
                    TransportSync::new(Signal::Readiness, readiness.clone(), transport)
                        .with_deadline(deadline),
                )
            };
            syncs.push(supervise(sync, strategy, shutdown.clone()));
        }

        let router = build_router(HealthState {
            liveness: liveness.clone(),
            readiness: readiness.clone(),
            ask_timeout,
        });

        info!(%node, syncs = syncs.len(), "daemon assembled");
        Ok(Self {
            liveness,
            readiness,
            router,
            syncs,
            shutdown,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Token that stops every sync when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the syncs, wait for their final `stop` calls, then stop the
    /// probes.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for sync in self.syncs {
            let name = sync.name().to_string();
            let exit = sync.join().await;
            info!(component = %name, ?exit, "sync stopped");
        }
        self.liveness.stop();
        self.readiness.stop();
    }
}

/// Open the journal only when the liveness provider needs it.
fn open_journal(config: &PulseConfig) -> Result<Arc<dyn JournalStore>, JournalError> {
    let wanted = matches!(
        ProviderKind::resolve(Signal::Liveness, config.provider(Signal::Liveness)),
        Ok(ProviderKind::Persistence)
    );
    if !wanted {
        return Err(JournalError::Open("no persistence provider configured".into()));
    }

    let path = &config.persistence.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| JournalError::Open(e.to_string()))?;
    }
    match RedbJournal::open(path) {
        Ok(journal) => {
            info!(path = ?path, "journal opened");
            Ok(Arc::new(journal))
        }
        Err(e) => {
            warn!(path = ?path, error = %e, "journal could not be opened");
            Err(e)
        }
    }
}

fn build_transport(spec: &TransportSpec) -> Arc<dyn Transport> {
    match spec {
        TransportSpec::File { path } => Arc::new(FileTransport::new(path.clone())),
        TransportSpec::Tcp { address } => Arc::new(TcpTransport::new(address.clone())),
    }
}
