//! pulse-journal — durable journal and snapshot store for Pulse.
//!
//! Backed by [redb](https://docs.rs/redb). The persistence liveness probe
//! proves the store is healthy by writing a marker entry, saving a
//! snapshot, and reading both back on the next round trip.
//!
//! # Architecture
//!
//! Entries and snapshots live in two tables keyed by
//! `{persistence_id}:{seq:020}`, so a range scan over one persistence id
//! yields records in sequence order. Values are JSON-serialized into
//! redb's `&[u8]` value columns.
//!
//! The [`JournalStore`] trait is the seam the probe depends on; tests swap
//! in scripted stores, production uses [`RedbJournal`].

pub mod error;
pub mod journal;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{JournalError, JournalResult};
pub use journal::JournalStore;
pub use store::RedbJournal;
pub use types::*;
