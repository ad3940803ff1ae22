//! Durability layer for the atomledger engine
//!
//! Two stores, one inspector:
//!
//! - [`wal::WalStore`] - append-only, memory-mapped, segmented log with
//!   monotonic record indices and CRC-checked framing
//! - [`snapshot::SnapshotStore`] - atomic temp-file-plus-rename
//!   persistence of `(last_wal_index, state, filter)`
//! - [`inspect`] - offline paging over the WAL and snapshot dumps for
//!   operators
//!
//! Everything at this layer treats state, filters, and command payloads
//! as opaque bytes; typed encoding lives in the engine crate.

pub mod inspect;
pub mod record;
mod segment;
pub mod snapshot;
pub mod wal;

pub use inspect::{snapshot_dump, RecordPredicate, SnapshotDump, WalPage, WalReader};
pub use record::{encode_record, WalRecord};
pub use snapshot::{SnapshotData, SnapshotStore, SNAPSHOT_FILE, SNAPSHOT_TMP};
pub use wal::{WalCursor, WalStore};
