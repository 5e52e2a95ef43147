//! Record types stored in the journal.

use serde::{Deserialize, Serialize};

/// A single persisted journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub persistence_id: String,
    pub seq: u64,
    pub payload: String,
    /// Epoch seconds when the entry was written.
    pub written_at: u64,
}

/// A saved snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub persistence_id: String,
    /// Sequence number of the journal entry this snapshot covers.
    pub seq: u64,
    pub payload: String,
    pub saved_at: u64,
}

/// Counts of records removed by a prune.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub entries_removed: u32,
    pub snapshots_removed: u32,
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
