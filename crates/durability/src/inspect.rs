//! Offline WAL and snapshot inspection
//!
//! Read-only operator tooling: page through a partition's WAL forward or
//! backward with an optional predicate, and dump the snapshot header
//! without interpreting the state bytes. Nothing here takes locks or
//! talks to a running partition; the files are mapped independently, so
//! these calls are safe while the engine is live and useful when it is
//! not.

use crate::record::WalRecord;
use crate::snapshot::{SnapshotData, SnapshotStore};
use crate::wal::{list_segments, WalCursor};
use atomledger_core::error::Result;
use std::path::{Path, PathBuf};

/// Predicate applied to records during paging
pub type RecordPredicate<'a> = &'a dyn Fn(&WalRecord) -> bool;

/// One page of WAL records
#[derive(Debug)]
pub struct WalPage {
    /// Matching records, in ascending index order
    pub records: Vec<WalRecord>,
    /// Cursor for the next page: pass to `page_forward` as `after`, or to
    /// `page_backward` as `before`
    pub next_cursor: u64,
    /// True when the scan reached the end (or beginning) of the log
    pub done: bool,
}

/// Read-only view over a partition's WAL directory
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    /// Open a reader on a WAL directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(WalReader { dir: dir.into() })
    }

    /// Page forward: up to `limit` matching records with index > `after`
    pub fn page_forward(
        &self,
        after: u64,
        limit: usize,
        filter: Option<RecordPredicate<'_>>,
    ) -> Result<WalPage> {
        let mut cursor = self.cursor(after)?;
        let mut records = Vec::new();
        let mut next_cursor = after;
        let mut done = true;

        while let Some(rec) = cursor.next()? {
            next_cursor = rec.index;
            if filter.map_or(true, |accept| accept(&rec)) {
                records.push(rec);
                if records.len() >= limit {
                    done = false;
                    break;
                }
            }
        }

        Ok(WalPage {
            records,
            next_cursor,
            done,
        })
    }

    /// Page backward: the `limit` highest-indexed matching records with
    /// index < `before` (`before == 0` means "from the end of the log")
    ///
    /// Records are framed for forward scans, so this walks forward and
    /// keeps the last window; adequate for an offline diagnostic path.
    pub fn page_backward(
        &self,
        before: u64,
        limit: usize,
        filter: Option<RecordPredicate<'_>>,
    ) -> Result<WalPage> {
        let bound = if before == 0 { u64::MAX } else { before };
        let mut cursor = self.cursor(0)?;
        let mut window: Vec<WalRecord> = Vec::new();

        while let Some(rec) = cursor.next()? {
            if rec.index >= bound {
                break;
            }
            if filter.map_or(true, |accept| accept(&rec)) {
                window.push(rec);
                if window.len() > limit {
                    window.remove(0);
                }
            }
        }

        let next_cursor = window.first().map(|r| r.index).unwrap_or(0);
        let done = window.len() < limit || next_cursor <= 1;
        Ok(WalPage {
            records: window,
            next_cursor,
            done,
        })
    }

    fn cursor(&self, after: u64) -> Result<WalCursor> {
        Ok(WalCursor::new(list_segments(&self.dir)?, after))
    }
}

/// Snapshot contents plus size information, for diagnostics
#[derive(Debug)]
pub struct SnapshotDump {
    /// The decoded container
    pub data: SnapshotData,
    /// Size of the serialized state, in bytes
    pub state_bytes: usize,
    /// Size of the serialized filter, in bytes
    pub filter_bytes: usize,
}

/// Dump the snapshot in `dir`, if a valid one exists
pub fn snapshot_dump(dir: &Path) -> Result<Option<SnapshotDump>> {
    let store = SnapshotStore::open(dir)?;
    Ok(store.load().map(|data| {
        let state_bytes = data.state.len();
        let filter_bytes = data.filter.len();
        SnapshotDump {
            data,
            state_bytes,
            filter_bytes,
        }
    }))
}
