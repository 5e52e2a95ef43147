//! The store seam used by the persistence probe.

use async_trait::async_trait;

use crate::error::JournalResult;
use crate::types::{JournalEntry, PruneStats, SnapshotRecord};

/// An append-only journal with snapshots.
///
/// Every method resolves to success, a failure, or
/// [`JournalError::Rejected`](crate::JournalError::Rejected).
/// Implementations must be safe to call from several tasks at once.
#[async_trait]
pub trait JournalStore: Send + Sync + 'static {
    /// Append an entry. `seq` must be greater than every stored seq for
    /// `persistence_id`.
    async fn append(&self, persistence_id: &str, seq: u64, payload: &str) -> JournalResult<()>;

    /// Save a snapshot covering the journal up to `seq`.
    async fn save_snapshot(&self, persistence_id: &str, seq: u64, payload: &str)
        -> JournalResult<()>;

    /// Replay all entries for `persistence_id`, in sequence order.
    async fn replay(&self, persistence_id: &str) -> JournalResult<Vec<JournalEntry>>;

    /// Load the most recent snapshot, if any.
    async fn load_snapshot(&self, persistence_id: &str) -> JournalResult<Option<SnapshotRecord>>;

    /// Delete entries and snapshots with a seq strictly below `below_seq`.
    async fn prune(&self, persistence_id: &str, below_seq: u64) -> JournalResult<PruneStats>;
}
