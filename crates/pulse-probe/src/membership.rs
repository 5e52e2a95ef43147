//! Membership events and the feed cluster probes read them from.
//!
//! A membership provider publishes [`MemberEvent`]s; cluster probes take a
//! consistent [`ClusterSnapshot`] plus a receiver for everything after it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

/// Identifier of a cluster member.
pub type NodeId = String;

/// A change reported by the membership provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    /// The node joined and is a full member.
    Up(NodeId),
    /// The node left or was downed.
    Removed(NodeId),
    /// Failure detection lost contact with the node.
    Unreachable(NodeId),
    /// Contact with a previously unreachable node was restored.
    Reachable(NodeId),
}

/// Membership as seen at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub members: BTreeSet<NodeId>,
    pub unreachable: BTreeSet<NodeId>,
}

impl ClusterSnapshot {
    /// Fold one event into the snapshot.
    pub fn apply(&mut self, event: &MemberEvent) {
        match event {
            MemberEvent::Up(node) => {
                self.members.insert(node.clone());
            }
            MemberEvent::Removed(node) => {
                self.members.remove(node);
                self.unreachable.remove(node);
            }
            MemberEvent::Unreachable(node) => {
                self.members.insert(node.clone());
                self.unreachable.insert(node.clone());
            }
            MemberEvent::Reachable(node) => {
                self.unreachable.remove(node);
            }
        }
    }
}

/// Publishes membership events to any number of probes.
///
/// Subscribing and publishing are serialized, so a subscriber never
/// misses an event between its snapshot and its receiver.
#[derive(Clone)]
pub struct MembershipFeed {
    tx: broadcast::Sender<MemberEvent>,
    state: Arc<Mutex<ClusterSnapshot>>,
}

impl MembershipFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            state: Arc::new(Mutex::new(ClusterSnapshot::default())),
        }
    }

    /// A single-node feed where `node` has already joined.
    pub fn standalone(node: &str) -> Self {
        let feed = Self::new(64);
        feed.publish(MemberEvent::Up(node.to_string()));
        feed
    }

    pub fn publish(&self, event: MemberEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.apply(&event);
        debug!(?event, "membership event");
        // No receivers is fine; late subscribers start from the snapshot.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> (ClusterSnapshot, broadcast::Receiver<MemberEvent>) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (state.clone(), self.tx.subscribe())
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Handle for catching up after a lagged receiver. Holding it does not
    /// keep the feed open.
    pub fn state(&self) -> MembershipState {
        MembershipState {
            state: self.state.clone(),
        }
    }
}

/// The feed's authoritative snapshot, detached from its sender.
#[derive(Clone)]
pub struct MembershipState {
    state: Arc<Mutex<ClusterSnapshot>>,
}

impl MembershipState {
    /// Current snapshot plus a receiver that starts right after it.
    ///
    /// Publishing holds the same lock, so no event falls between the two.
    pub fn resubscribe(
        &self,
        lagged: &broadcast::Receiver<MemberEvent>,
    ) -> (ClusterSnapshot, broadcast::Receiver<MemberEvent>) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (state.clone(), lagged.resubscribe())
    }
}
