//! Snapshot persistence
//!
//! A snapshot is the triple `(last_wal_index, state, filter)` for one
//! partition, written atomically so recovery either sees a fully valid
//! snapshot or none at all.
//!
//! ## Protocol
//!
//! 1. Serialize the container to `snapshot.tmp` in the snapshot directory
//! 2. Flush and close the temp file
//! 3. Rename temp over `snapshot.dat` (atomic replace on POSIX)
//!
//! ## File format
//!
//! ```text
//! [magic: "ALSS"][version: u16][reserved: u16][container: bincode][crc32: u32]
//! ```
//!
//! Loading is fail-safe: an absent file yields `None`; a file that fails
//! the magic, CRC, or decode yields a warning and `None`, which forces a
//! full WAL replay. The state and filter stay opaque bytes at this layer;
//! the engine owns their typed encoding.

use atomledger_core::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 4] = b"ALSS";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;

/// Canonical snapshot file name
pub const SNAPSHOT_FILE: &str = "snapshot.dat";
/// Transient file used during atomic replace
pub const SNAPSHOT_TMP: &str = "snapshot.tmp";

/// Serialized partition snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    /// Index of the last WAL record whose effect is reflected in `state`
    pub last_wal_index: u64,
    /// Serialized partition state
    pub state: Vec<u8>,
    /// Serialized idempotency filter, variant tag included
    pub filter: Vec<u8>,
}

/// Atomic save/load of one partition's snapshot
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open the store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(SnapshotStore { dir })
    }

    /// Path of the canonical snapshot file
    pub fn canonical_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Write `snapshot` atomically
    pub fn save(&self, snapshot: &SnapshotData) -> Result<()> {
        let body = bincode::serialize(snapshot)?;

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len() + CRC_LEN);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&body);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        let tmp_path = self.dir.join(SNAPSHOT_TMP);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.canonical_path())?;

        debug!(
            path = %self.canonical_path().display(),
            last_wal_index = snapshot.last_wal_index,
            bytes = buf.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load the canonical snapshot if one exists and is intact
    pub fn load(&self) -> Option<SnapshotData> {
        let path = self.canonical_path();
        if !path.exists() {
            return None;
        }
        match read_snapshot(&path) {
            Ok(snapshot) => Some(snapshot),
            Err(reason) => {
                warn!(
                    path = %path.display(),
                    reason,
                    "snapshot unreadable, falling back to full WAL replay"
                );
                None
            }
        }
    }
}

fn read_snapshot(path: &Path) -> std::result::Result<SnapshotData, String> {
    let buf = fs::read(path).map_err(|e| format!("read failed: {e}"))?;
    if buf.len() < HEADER_LEN + CRC_LEN {
        return Err(format!("file too short: {} bytes", buf.len()));
    }
    if &buf[0..4] != MAGIC {
        return Err("bad magic".to_string());
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != VERSION {
        return Err(format!("unsupported version {version}"));
    }

    let (framed, crc_bytes) = buf.split_at(buf.len() - CRC_LEN);
    let expected =
        u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(framed);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(format!("CRC mismatch: expected {expected:08x}, got {actual:08x}"));
    }

    bincode::deserialize(&framed[HEADER_LEN..]).map_err(|e| format!("decode failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SnapshotData {
        SnapshotData {
            last_wal_index: 500,
            state: vec![1, 2, 3, 4],
            filter: vec![9, 8, 7],
        }
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        store.save(&sample()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_load_without_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        store.save(&sample()).unwrap();
        let mut newer = sample();
        newer.last_wal_index = 1_000;
        store.save(&newer).unwrap();

        assert_eq!(store.load().unwrap().last_wal_index, 1_000);
        assert!(
            !dir.path().join(SNAPSHOT_TMP).exists(),
            "temp file must not linger after rename"
        );
    }

    #[test]
    fn test_corrupt_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.save(&sample()).unwrap();

        let path = store.canonical_path();
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(store.load().is_none());
    }

    #[test]
    fn test_truncated_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.save(&sample()).unwrap();

        let path = store.canonical_path();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(store.load().is_none());
    }

    #[test]
    fn test_garbage_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        std::fs::write(store.canonical_path(), b"not a snapshot").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_stale_tmp_file_is_ignored_and_replaced() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        // A crash between write and rename leaves snapshot.tmp behind.
        std::fs::write(dir.path().join(SNAPSHOT_TMP), b"half-written").unwrap();
        assert!(store.load().is_none());

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }
}
