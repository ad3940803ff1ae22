//! Write-ahead log store
//!
//! Append-only, crash-safe sequence of records with strictly increasing
//! 64-bit indices, backed by memory-mapped segment files. One [`WalStore`]
//! belongs to exactly one partition and has exactly one writer (the
//! partition worker); cursors and offline readers map the same files
//! independently.
//!
//! ## Operations
//!
//! - [`WalStore::append`] - frame, copy into the tail segment, flush per
//!   the configured [`SyncPolicy`]; returns the record's index
//! - [`WalStore::scan_from`] - cursor positioned so the next record
//!   returned has an index greater than the argument
//! - [`WalStore::sync`] - force a durability boundary
//! - [`WalStore::close`] - final sync; further appends are refused
//!
//! ## Crash behavior
//!
//! Only the tail segment can hold a torn record. On open the tail is
//! scanned, the valid run is kept, and everything behind it is zeroed.
//! Corruption in a sealed segment is unrecoverable and surfaces as an
//! error from the cursor.

use crate::record::{decode_record, encode_record, Decoded, WalRecord};
use crate::segment::{parse_segment_file_name, Segment, HEADER_LEN};
use atomledger_core::config::{SyncPolicy, WalConfig};
use atomledger_core::error::{EngineError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// List a directory's WAL segments, sorted by first index
pub(crate) fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(first_index) = name.to_str().and_then(parse_segment_file_name) {
            segments.push((first_index, entry.path()));
        }
    }
    segments.sort_by_key(|(first_index, _)| *first_index);
    Ok(segments)
}

/// Append side of one partition's WAL
pub struct WalStore {
    dir: PathBuf,
    cfg: WalConfig,
    sealed: Vec<(u64, PathBuf)>,
    tail: Segment,
    next_index: u64,
    appends_since_sync: u64,
    closed: bool,
}

impl WalStore {
    /// Open the log in `dir`, creating it if empty
    pub fn open(dir: impl Into<PathBuf>, cfg: WalConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut segments = list_segments(&dir)?;
        let (sealed, tail, next_index) = match segments.pop() {
            None => {
                let tail = Segment::create(&dir, 1, cfg.segment_size)?;
                (Vec::new(), tail, 1)
            }
            Some((_, tail_path)) => {
                let (tail, next_index) = Segment::open_tail(&tail_path)?;
                (segments, tail, next_index)
            }
        };

        debug!(dir = %dir.display(), next_index, "WAL opened");
        Ok(WalStore {
            dir,
            cfg,
            sealed,
            tail,
            next_index,
            appends_since_sync: 0,
            closed: false,
        })
    }

    /// Append one record; returns its index
    ///
    /// After this returns under `SyncPolicy::Always`, the record survives
    /// a process crash.
    pub fn append(&mut self, type_key: &str, payload: &[u8]) -> Result<u64> {
        if self.closed {
            return Err(EngineError::wal("append on closed WAL"));
        }

        let encoded = encode_record(self.next_index, type_key, payload)?;
        if !self.tail.fits(encoded.len()) {
            self.roll_segment(encoded.len())?;
        }
        self.tail.append(&encoded);

        let index = self.next_index;
        self.next_index += 1;

        match self.cfg.sync {
            SyncPolicy::Always => self.tail.flush()?,
            SyncPolicy::EveryN(n) => {
                self.appends_since_sync += 1;
                if self.appends_since_sync >= n {
                    self.tail.flush()?;
                    self.appends_since_sync = 0;
                }
            }
        }

        Ok(index)
    }

    /// Index the next append will receive
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Index of the last appended record, 0 if the log is empty
    pub fn last_index(&self) -> u64 {
        self.next_index - 1
    }

    /// Force a durability boundary
    pub fn sync(&mut self) -> Result<()> {
        self.tail.flush()?;
        self.appends_since_sync = 0;
        Ok(())
    }

    /// Cursor over records with index greater than `after`
    ///
    /// `after == 0` scans from the beginning. The cursor maps the segment
    /// files independently and may outlive individual appends; records
    /// appended after the cursor was created may or may not be observed.
    pub fn scan_from(&self, after: u64) -> Result<WalCursor> {
        let mut segments = self.sealed.clone();
        segments.push((self.tail.first_index(), self.tail.path().to_path_buf()));
        Ok(WalCursor::new(segments, after))
    }

    /// Final sync; the store refuses appends afterwards
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.sync()?;
            self.closed = true;
            debug!(dir = %self.dir.display(), last_index = self.last_index(), "WAL closed");
        }
        Ok(())
    }

    /// Seal the tail and start a new segment sized for `needed` bytes
    fn roll_segment(&mut self, needed: usize) -> Result<()> {
        let capacity = self.cfg.segment_size.max(HEADER_LEN + needed + 4);

        if self.tail.is_empty() {
            // Nothing in the tail yet, so the replacement keeps its first
            // index and file name; the mapping stays valid across the
            // unlink until it is dropped below.
            let path = self.tail.path().to_path_buf();
            let first_index = self.tail.first_index();
            std::fs::remove_file(&path)?;
            self.tail = Segment::create(&self.dir, first_index, capacity)?;
            return Ok(());
        }

        self.tail.flush()?;
        let new_tail = Segment::create(&self.dir, self.next_index, capacity)?;
        let old = std::mem::replace(&mut self.tail, new_tail);
        self.sealed.push((old.first_index(), old.path().to_path_buf()));
        debug!(
            dir = %self.dir.display(),
            first_index = self.next_index,
            capacity,
            "WAL segment rolled"
        );
        Ok(())
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Forward scan over a WAL directory
///
/// Verifies CRCs and index continuity as it goes. A torn or unreadable
/// record in the tail segment ends the scan (crash leftovers); the same
/// condition in a sealed segment is corruption.
pub struct WalCursor {
    segments: Vec<(u64, PathBuf)>,
    seg_idx: usize,
    current: Option<Mmap>,
    offset: usize,
    after: u64,
    last_seen: u64,
}

impl WalCursor {
    pub(crate) fn new(segments: Vec<(u64, PathBuf)>, after: u64) -> Self {
        // Start at the last segment that can contain `after + 1`.
        let pos = segments.partition_point(|(first, _)| *first <= after.saturating_add(1));
        let seg_idx = pos.saturating_sub(1);
        WalCursor {
            segments,
            seg_idx,
            current: None,
            offset: 0,
            after,
            last_seen: 0,
        }
    }

    /// Next record, or `None` at end of log
    pub fn next(&mut self) -> Result<Option<WalRecord>> {
        loop {
            if self.seg_idx >= self.segments.len() {
                return Ok(None);
            }
            if self.current.is_none() {
                let (_, path) = &self.segments[self.seg_idx];
                let file = File::open(path)?;
                // Read-only view of a file the writer maps shared.
                let mmap = unsafe { Mmap::map(&file)? };
                if mmap.len() < HEADER_LEN {
                    return Err(EngineError::corruption(format!(
                        "segment {} shorter than its header",
                        path.display()
                    )));
                }
                self.offset = HEADER_LEN;
                self.current = Some(mmap);
            }
            let Some(mmap) = self.current.as_ref() else {
                continue;
            };
            let is_tail = self.seg_idx + 1 == self.segments.len();

            match decode_record(&mmap[self.offset..], self.offset as u64) {
                Ok(Decoded::Record(rec, consumed)) => {
                    if self.last_seen != 0 && rec.index != self.last_seen + 1 {
                        return Err(EngineError::corruption(format!(
                            "index discontinuity in {}: {} follows {}",
                            self.segments[self.seg_idx].1.display(),
                            rec.index,
                            self.last_seen
                        )));
                    }
                    self.last_seen = rec.index;
                    self.offset += consumed;
                    if rec.index > self.after {
                        return Ok(Some(rec));
                    }
                }
                Ok(Decoded::End) => {
                    self.seg_idx += 1;
                    self.current = None;
                }
                Ok(Decoded::Truncated) => {
                    if is_tail {
                        return Ok(None);
                    }
                    return Err(EngineError::corruption(format!(
                        "truncated record inside sealed segment {}",
                        self.segments[self.seg_idx].1.display()
                    )));
                }
                Err(e) => {
                    if is_tail {
                        warn!(error = %e, "unreadable tail record, ending scan");
                        return Ok(None);
                    }
                    return Err(e);
                }
            }
        }
    }
}
