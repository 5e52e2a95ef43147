//! RedbJournal — redb-backed journal persistence for Pulse.
//!
//! Provides synchronous typed operations over the journal and snapshot
//! tables, plus a [`JournalStore`] implementation that moves each call
//! onto tokio's blocking pool. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{JournalError, JournalResult};
use crate::journal::JournalStore;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `JournalError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| JournalError::$variant(e.to_string())
    };
}

/// Thread-safe journal backed by redb.
#[derive(Clone)]
pub struct RedbJournal {
    db: Arc<Database>,
}

impl RedbJournal {
    /// Open (or create) a persistent journal at the given path.
    pub fn open(path: &Path) -> JournalResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "journal opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory journal (for testing).
    pub fn open_in_memory() -> JournalResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory journal opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> JournalResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOURNAL).map_err(map_err!(Table))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Journal ────────────────────────────────────────────────────

    /// Append an entry, rejecting sequence regressions.
    pub fn append_entry(&self, persistence_id: &str, seq: u64, payload: &str) -> JournalResult<()> {
        if persistence_id.is_empty() {
            return Err(JournalError::Rejected("empty persistence id".to_string()));
        }

        let entry = JournalEntry {
            persistence_id: persistence_id.to_string(),
            seq,
            payload: payload.to_string(),
            written_at: epoch_secs(),
        };
        let key = record_key(persistence_id, seq);
        let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOURNAL).map_err(map_err!(Table))?;
            let (start, end) = id_range(persistence_id);
            let highest = match table
                .range::<&str>(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
                .next_back()
            {
                Some(last) => {
                    let (_, value) = last.map_err(map_err!(Read))?;
                    let last: JournalEntry =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    Some(last.seq)
                }
                None => None,
            };

            if let Some(highest) = highest.filter(|highest| seq <= *highest) {
                return Err(JournalError::Rejected(format!(
                    "seq {seq} is not above stored seq {highest} for {persistence_id}"
                )));
            }

            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "journal entry appended");
        Ok(())
    }

    /// All entries for a persistence id, in sequence order.
    pub fn entries(&self, persistence_id: &str) -> JournalResult<Vec<JournalEntry>> {
        let (start, end) = id_range(persistence_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOURNAL).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range::<&str>(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let entry: JournalEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(entry);
        }
        Ok(results)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Insert or replace the snapshot at `seq`.
    pub fn put_snapshot(&self, persistence_id: &str, seq: u64, payload: &str) -> JournalResult<()> {
        if persistence_id.is_empty() {
            return Err(JournalError::Rejected("empty persistence id".to_string()));
        }

        let snapshot = SnapshotRecord {
            persistence_id: persistence_id.to_string(),
            seq,
            payload: payload.to_string(),
            saved_at: epoch_secs(),
        };
        let key = record_key(persistence_id, seq);
        let value = serde_json::to_vec(&snapshot).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "snapshot saved");
        Ok(())
    }

    /// The snapshot with the highest seq, if any.
    pub fn latest_snapshot(&self, persistence_id: &str) -> JournalResult<Option<SnapshotRecord>> {
        let (start, end) = id_range(persistence_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        match table
            .range::<&str>(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .next_back()
        {
            Some(last) => {
                let (_, value) = last.map_err(map_err!(Read))?;
                let snapshot: SnapshotRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    // ── Pruning ────────────────────────────────────────────────────

    /// Delete entries and snapshots with seq below `below_seq`.
    pub fn prune_below(&self, persistence_id: &str, below_seq: u64) -> JournalResult<PruneStats> {
        let start = record_key(persistence_id, 0);
        let end = record_key(persistence_id, below_seq);

        // Collect keys in a read transaction first.
        let (entry_keys, snapshot_keys) = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let journal = txn.open_table(JOURNAL).map_err(map_err!(Table))?;
            let snapshots = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            (
                keys_in_range(&journal, &start, &end)?,
                keys_in_range(&snapshots, &start, &end)?,
            )
        };

        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut journal = txn.open_table(JOURNAL).map_err(map_err!(Table))?;
            for key in &entry_keys {
                journal.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            let mut snapshots = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            for key in &snapshot_keys {
                snapshots.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;

        let stats = PruneStats {
            entries_removed: entry_keys.len() as u32,
            snapshots_removed: snapshot_keys.len() as u32,
        };
        debug!(
            %persistence_id,
            below_seq,
            entries = stats.entries_removed,
            snapshots = stats.snapshots_removed,
            "journal pruned"
        );
        Ok(stats)
    }
}

/// Keys of `table` within `[start, end)`.
fn keys_in_range(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    start: &str,
    end: &str,
) -> JournalResult<Vec<String>> {
    let mut keys = Vec::new();
    for entry in table.range::<&str>(start..end).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        keys.push(key.value().to_string());
    }
    Ok(keys)
}

/// Run a blocking redb call on tokio's blocking pool.
async fn blocking<T, F>(f: F) -> JournalResult<T>
where
    F: FnOnce() -> JournalResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(map_err!(Task))?
}

#[async_trait]
impl JournalStore for RedbJournal {
    async fn append(&self, persistence_id: &str, seq: u64, payload: &str) -> JournalResult<()> {
        let store = self.clone();
        let (pid, payload) = (persistence_id.to_string(), payload.to_string());
        blocking(move || store.append_entry(&pid, seq, &payload)).await
    }

    async fn save_snapshot(
        &self,
        persistence_id: &str,
        seq: u64,
        payload: &str,
    ) -> JournalResult<()> {
        let store = self.clone();
        let (pid, payload) = (persistence_id.to_string(), payload.to_string());
        blocking(move || store.put_snapshot(&pid, seq, &payload)).await
    }

    async fn replay(&self, persistence_id: &str) -> JournalResult<Vec<JournalEntry>> {
        let store = self.clone();
        let pid = persistence_id.to_string();
        blocking(move || store.entries(&pid)).await
    }

    async fn load_snapshot(&self, persistence_id: &str) -> JournalResult<Option<SnapshotRecord>> {
        let store = self.clone();
        let pid = persistence_id.to_string();
        blocking(move || store.latest_snapshot(&pid)).await
    }

    async fn prune(&self, persistence_id: &str, below_seq: u64) -> JournalResult<PruneStats> {
        let store = self.clone();
        let pid = persistence_id.to_string();
        blocking(move || store.prune_below(&pid, below_seq)).await
    }
}
