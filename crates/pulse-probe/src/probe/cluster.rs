//! Cluster-aware probes driven by membership events.
//!
//! Liveness is up while the local node is a member. Readiness is up while
//! the local node is a member and not isolated, where isolated means every
//! other known member has been unreachable for the whole debounce window.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Sleep;
use tracing::{info, warn};

use crate::membership::{ClusterSnapshot, MemberEvent, MembershipFeed, MembershipState, NodeId};
use crate::protocol::{ProbeContext, ProbeHandle, spawn_probe};
use crate::status::{Signal, Status};

/// Default isolation debounce.
pub const DEFAULT_ISOLATION_DEBOUNCE: Duration = Duration::from_secs(20);

/// The local node's view of membership.
#[derive(Debug, Clone)]
pub struct ClusterView {
    self_node: NodeId,
    snapshot: ClusterSnapshot,
    removed: bool,
}

impl ClusterView {
    pub fn new(self_node: &str, snapshot: ClusterSnapshot) -> Self {
        Self {
            self_node: self_node.to_string(),
            snapshot,
            removed: false,
        }
    }

    pub fn apply(&mut self, event: &MemberEvent) {
        match event {
            MemberEvent::Up(node) if *node == self.self_node => self.removed = false,
            MemberEvent::Removed(node) if *node == self.self_node => self.removed = true,
            _ => {}
        }
        self.snapshot.apply(event);
    }

    /// Replace the view with a fresh snapshot after events were missed.
    /// A node that was a member and is gone from the snapshot counts as
    /// removed.
    pub fn resync(&mut self, snapshot: ClusterSnapshot) {
        let was_joined = self.joined();
        self.removed = !snapshot.members.contains(&self.self_node) && (self.removed || was_joined);
        self.snapshot = snapshot;
    }

    pub fn joined(&self) -> bool {
        !self.removed && self.snapshot.members.contains(&self.self_node)
    }

    fn others(&self) -> impl Iterator<Item = &NodeId> {
        self.snapshot
            .members
            .iter()
            .filter(move |member| **member != self.self_node)
    }

    /// True when there is at least one other member and every one of them
    /// is unreachable. A single-node cluster is never alone.
    pub fn is_alone(&self) -> bool {
        let mut others = self.others().peekable();
        others.peek().is_some() && others.all(|member| self.snapshot.unreachable.contains(member))
    }

    /// Liveness status for the current view.
    pub fn liveness(&self) -> Status {
        if self.joined() {
            Status::up(format!("node {} is a cluster member", self.self_node))
        } else if self.removed {
            Status::down(format!("node {} was removed from the cluster", self.self_node))
        } else {
            Status::down(format!("node {} has not joined the cluster yet", self.self_node))
        }
    }

    fn readiness(&self, isolation: &Isolation) -> Status {
        if !self.joined() {
            return self.liveness();
        }
        if isolation.isolated {
            return Status::down(format!(
                "node {} is isolated: all {} other members unreachable for {:?}",
                self.self_node,
                self.others().count(),
                isolation.debounce
            ));
        }
        Status::up(format!("node {} is a reachable cluster member", self.self_node))
    }
}

/// The single debounce timer behind "isolated".
struct Isolation {
    debounce: Duration,
    timer: Option<Pin<Box<Sleep>>>,
    isolated: bool,
}

impl Isolation {
    fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            timer: None,
            isolated: false,
        }
    }

    /// Arm, cancel, or clear isolation after the view changed.
    fn reconcile(&mut self, view: &ClusterView) {
        if view.is_alone() {
            // First isolation wins until resolved.
            if self.timer.is_none() && !self.isolated {
                info!(debounce = ?self.debounce, "all other members unreachable, isolation debounce armed");
                self.timer = Some(Box::pin(tokio::time::sleep(self.debounce)));
            }
            return;
        }

        if self.timer.take().is_some() {
            info!("peer reachable again, isolation debounce cancelled");
        }
        if self.isolated {
            info!("isolation resolved");
            self.isolated = false;
        }
    }

    async fn elapsed(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().await,
            None => std::future::pending().await,
        }
    }

    /// The debounce ran out. Tolerates firing after the condition cleared.
    fn fire(&mut self, view: &ClusterView) {
        self.timer = None;
        if view.is_alone() {
            warn!(debounce = ?self.debounce, "node isolated from every other member");
            self.isolated = true;
        }
    }
}

/// Spawn the membership-driven liveness probe.
pub fn spawn_cluster_liveness(node: &str, feed: &MembershipFeed) -> ProbeHandle {
    let (snapshot, events) = feed.subscribe();
    let view = ClusterView::new(node, snapshot);
    let initial = view.liveness();
    let state = feed.state();
    spawn_probe("cluster-liveness", Signal::Liveness, initial, move |ctx| {
        run_liveness(ctx, view, state, events)
    })
}

/// Spawn the membership-driven readiness probe with isolation detection.
pub fn spawn_cluster_readiness(
    node: &str,
    feed: &MembershipFeed,
    debounce: Duration,
) -> ProbeHandle {
    let (snapshot, events) = feed.subscribe();
    let view = ClusterView::new(node, snapshot);
    let isolation = Isolation::new(debounce);
    let initial = view.readiness(&isolation);
    let state = feed.state();
    spawn_probe("cluster-readiness", Signal::Readiness, initial, move |ctx| {
        run_readiness(ctx, view, isolation, state, events)
    })
}

fn catch_up(
    name: &str,
    missed: u64,
    state: &MembershipState,
    events: &mut broadcast::Receiver<MemberEvent>,
    view: &mut ClusterView,
) {
    warn!(probe = %name, missed, "membership events dropped, resyncing from snapshot");
    let (snapshot, fresh) = state.resubscribe(events);
    *events = fresh;
    view.resync(snapshot);
}

async fn run_liveness(
    mut ctx: ProbeContext,
    mut view: ClusterView,
    state: MembershipState,
    mut events: broadcast::Receiver<MemberEvent>,
) {
    let mut feed_open = true;
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            Some(command) = ctx.commands.recv() => ctx.hub.handle(command),
            event = events.recv(), if feed_open => match event {
                Ok(event) => view.apply(&event),
                Err(RecvError::Lagged(missed)) => {
                    catch_up(&ctx.name, missed, &state, &mut events, &mut view);
                }
                Err(RecvError::Closed) => {
                    warn!(probe = %ctx.name, "membership feed closed, status frozen");
                    feed_open = false;
                }
            },
        }

        if ctx.hub.transition(view.liveness()) {
            info!(probe = %ctx.name, status = %ctx.hub.current(), "liveness changed");
        }
    }
}

async fn run_readiness(
    mut ctx: ProbeContext,
    mut view: ClusterView,
    mut isolation: Isolation,
    state: MembershipState,
    mut events: broadcast::Receiver<MemberEvent>,
) {
    isolation.reconcile(&view);
    let mut feed_open = true;
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            Some(command) = ctx.commands.recv() => ctx.hub.handle(command),
            event = events.recv(), if feed_open => match event {
                Ok(event) => {
                    view.apply(&event);
                    isolation.reconcile(&view);
                }
                Err(RecvError::Lagged(missed)) => {
                    catch_up(&ctx.name, missed, &state, &mut events, &mut view);
                    isolation.reconcile(&view);
                }
                Err(RecvError::Closed) => {
                    warn!(probe = %ctx.name, "membership feed closed, status frozen");
                    feed_open = false;
                }
            },
            _ = isolation.elapsed() => isolation.fire(&view),
        }

        if ctx.hub.transition(view.readiness(&isolation)) {
            info!(probe = %ctx.name, status = %ctx.hub.current(), "readiness changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASK: Duration = Duration::from_secs(1);

    fn three_node_feed() -> MembershipFeed {
        let feed = MembershipFeed::new(16);
        for node in ["a", "b", "c"] {
            feed.publish(MemberEvent::Up(node.to_string()));
        }
        feed
    }

    #[test]
    fn view_detects_isolation() {
        let mut view = ClusterView::new("a", ClusterSnapshot::default());
        view.apply(&MemberEvent::Up("a".into()));
        assert!(!view.is_alone());

        view.apply(&MemberEvent::Up("b".into()));
        view.apply(&MemberEvent::Up("c".into()));
        view.apply(&MemberEvent::Unreachable("b".into()));
        assert!(!view.is_alone());

        view.apply(&MemberEvent::Unreachable("c".into()));
        assert!(view.is_alone());

        view.apply(&MemberEvent::Reachable("c".into()));
        assert!(!view.is_alone());
    }

    #[test]
    fn liveness_messages_distinguish_causes() {
        let mut view = ClusterView::new("a", ClusterSnapshot::default());
        assert!(view.liveness().message.contains("not joined"));

        view.apply(&MemberEvent::Up("a".into()));
        assert!(view.liveness().up);

        view.apply(&MemberEvent::Removed("a".into()));
        let status = view.liveness();
        assert!(!status.up);
        assert!(status.message.contains("removed"));
    }

    #[tokio::test]
    async fn liveness_follows_membership() {
        let feed = MembershipFeed::standalone("a");
        let probe = spawn_cluster_liveness("a", &feed);

        let mut subscription = probe.subscribe().unwrap();
        assert!(subscription.recv().await.unwrap().up);

        feed.publish(MemberEvent::Removed("a".into()));
        let status = subscription.recv().await.unwrap();
        assert!(!status.up);
        assert!(status.message.contains("removed"));
    }

    #[tokio::test]
    async fn liveness_waits_for_join() {
        let feed = MembershipFeed::new(16);
        let probe = spawn_cluster_liveness("a", &feed);

        let mut subscription = probe.subscribe().unwrap();
        assert!(!subscription.recv().await.unwrap().up);

        feed.publish(MemberEvent::Up("b".into()));
        feed.publish(MemberEvent::Up("a".into()));
        assert!(subscription.recv().await.unwrap().up);
    }

    #[test]
    fn resync_marks_vanished_member_removed() {
        let mut view = ClusterView::new("a", ClusterSnapshot::default());
        let mut fresh = ClusterSnapshot::default();
        fresh.apply(&MemberEvent::Up("b".into()));
        view.resync(fresh.clone());
        assert!(view.liveness().message.contains("not joined"));

        view.apply(&MemberEvent::Up("a".into()));
        view.resync(fresh);
        assert!(view.liveness().message.contains("removed"));
    }

    #[tokio::test]
    async fn liveness_catches_up_after_lagging() {
        let feed = MembershipFeed::new(1);
        feed.publish(MemberEvent::Up("a".into()));
        let handle = spawn_cluster_liveness("a", &feed);

        let mut subscription = handle.subscribe().unwrap();
        assert!(subscription.recv().await.unwrap().up);

        // Burst past the channel capacity; the removal itself is dropped.
        feed.publish(MemberEvent::Removed("a".into()));
        feed.publish(MemberEvent::Up("b".into()));
        let status = subscription.recv().await.unwrap();
        assert!(!status.up);
        assert!(status.message.contains("removed"));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_catches_up_after_lagging() {
        let feed = MembershipFeed::new(1);
        for node in ["a", "b", "c"] {
            feed.publish(MemberEvent::Up(node.to_string()));
        }
        let handle = spawn_cluster_readiness("a", &feed, Duration::from_secs(20));

        feed.publish(MemberEvent::Unreachable("b".into()));
        feed.publish(MemberEvent::Unreachable("c".into()));
        tokio::time::sleep(Duration::from_secs(21)).await;
        let status = handle.current(ASK).await.unwrap();
        assert!(!status.up);
        assert!(status.message.contains("isolated"));
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_goes_down_after_debounce() {
        let feed = three_node_feed();
        let probe = spawn_cluster_readiness("a", &feed, Duration::from_secs(20));
        assert!(probe.current(ASK).await.unwrap().up);

        feed.publish(MemberEvent::Unreachable("b".into()));
        feed.publish(MemberEvent::Unreachable("c".into()));

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(probe.current(ASK).await.unwrap().up);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = probe.current(ASK).await.unwrap();
        assert!(!status.up);
        assert!(status.message.contains("isolated"));
    }

    #[tokio::test(start_paused = true)]
    async fn reachable_peer_cancels_debounce() {
        let feed = three_node_feed();
        let probe = spawn_cluster_readiness("a", &feed, Duration::from_secs(20));

        feed.publish(MemberEvent::Unreachable("b".into()));
        feed.publish(MemberEvent::Unreachable("c".into()));
        tokio::time::sleep(Duration::from_secs(10)).await;

        feed.publish(MemberEvent::Reachable("b".into()));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(probe.current(ASK).await.unwrap().up);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_unreachable_does_not_rearm() {
        let feed = three_node_feed();
        let probe = spawn_cluster_readiness("a", &feed, Duration::from_secs(20));

        feed.publish(MemberEvent::Unreachable("b".into()));
        feed.publish(MemberEvent::Unreachable("c".into()));
        tokio::time::sleep(Duration::from_secs(15)).await;

        feed.publish(MemberEvent::Unreachable("c".into()));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!probe.current(ASK).await.unwrap().up);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_recovers_when_isolation_ends() {
        let feed = three_node_feed();
        let probe = spawn_cluster_readiness("a", &feed, Duration::from_secs(20));
        let mut subscription = probe.subscribe().unwrap();
        assert!(subscription.recv().await.unwrap().up);

        feed.publish(MemberEvent::Unreachable("b".into()));
        feed.publish(MemberEvent::Unreachable("c".into()));
        assert!(!subscription.recv().await.unwrap().up);

        feed.publish(MemberEvent::Reachable("c".into()));
        assert!(subscription.recv().await.unwrap().up);
    }

    #[tokio::test(start_paused = true)]
    async fn single_node_cluster_is_never_isolated() {
        let feed = MembershipFeed::standalone("a");
        let probe = spawn_cluster_readiness("a", &feed, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(probe.current(ASK).await.unwrap().up);
    }
}
