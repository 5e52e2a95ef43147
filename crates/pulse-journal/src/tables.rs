//! redb table definitions for the Pulse journal.
//!
//! Both tables use `&str` keys of the form `{persistence_id}:{seq:020}`
//! and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Journal entries.
pub const JOURNAL: TableDefinition<&str, &[u8]> = TableDefinition::new("journal");

/// Snapshots.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Build the table key for a record.
pub fn record_key(persistence_id: &str, seq: u64) -> String {
    format!("{persistence_id}:{seq:020}")
}

/// Half-open key range covering every record of one persistence id.
///
/// `;` sorts directly after `:`, so `[pid:, pid;)` spans exactly the ids
/// prefixed with `pid:`.
pub fn id_range(persistence_id: &str) -> (String, String) {
    (format!("{persistence_id}:"), format!("{persistence_id};"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sort_numerically() {
        let a = record_key("probe", 9);
        let b = record_key("probe", 10);
        assert!(a < b);
    }

    #[test]
    fn range_excludes_other_ids() {
        let (start, end) = id_range("probe");
        let own = record_key("probe", 1);
        let other = record_key("probe-2", 1);
        assert!(own.as_str() >= start.as_str() && own.as_str() < end.as_str());
        assert!(!(other.as_str() >= start.as_str() && other.as_str() < end.as_str()));
    }
}
