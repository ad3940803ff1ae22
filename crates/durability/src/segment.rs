//! Memory-mapped WAL segment files
//!
//! A segment is a fixed-capacity, zero-filled file with a small header,
//! mapped writable by the owning partition. Appends are memcpys into the
//! map; durability is an msync. Segment files are named
//! `segment_<first_index>.wal` with the index zero-padded so lexicographic
//! order equals numeric order.
//!
//! ## Header
//!
//! ```text
//! [magic: "ALWS"][version: u16][reserved: u16][first_index: u64]
//! ```

use crate::record::{decode_record, Decoded};
use atomledger_core::error::{EngineError, Result};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::warn;

const MAGIC: &[u8; 4] = b"ALWS";
const VERSION: u16 = 1;
/// magic(4) + version(2) + reserved(2) + first_index(8)
pub(crate) const HEADER_LEN: usize = 16;

/// A writable WAL segment
pub(crate) struct Segment {
    path: PathBuf,
    first_index: u64,
    mmap: MmapMut,
    write_offset: usize,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("first_index", &self.first_index)
            .field("write_offset", &self.write_offset)
            .finish()
    }
}

/// File name for the segment starting at `first_index`
pub(crate) fn segment_file_name(first_index: u64) -> String {
    format!("segment_{first_index:020}.wal")
}

/// Parse `first_index` out of a segment file name
pub(crate) fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_prefix("segment_")?.strip_suffix(".wal")?;
    stem.parse().ok()
}

impl Segment {
    /// Create a fresh zero-filled segment of `capacity` bytes
    pub(crate) fn create(dir: &Path, first_index: u64, capacity: usize) -> Result<Self> {
        let path = dir.join(segment_file_name(first_index));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len(capacity as u64)?;

        // Exclusive writer per partition; readers map the file separately.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap[0..4].copy_from_slice(MAGIC);
        mmap[4..6].copy_from_slice(&VERSION.to_le_bytes());
        mmap[6..8].copy_from_slice(&0u16.to_le_bytes());
        mmap[8..16].copy_from_slice(&first_index.to_le_bytes());
        mmap.flush()?;

        Ok(Segment {
            path,
            first_index,
            mmap,
            write_offset: HEADER_LEN,
        })
    }

    /// Reopen the tail segment of an existing log
    ///
    /// Scans forward from the header to find the end of the valid record
    /// run. A record that is torn, fails its CRC, or carries an unexpected
    /// index ends the run: everything from there on is a casualty of the
    /// crash and gets zeroed so later appends cannot resurrect stale
    /// records behind a shorter rewrite.
    ///
    /// Returns the segment positioned for appending plus the next index
    /// to assign.
    pub(crate) fn open_tail(path: &Path) -> Result<(Self, u64)> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() < HEADER_LEN {
            return Err(EngineError::corruption(format!(
                "segment {} shorter than its header",
                path.display()
            )));
        }
        if &mmap[0..4] != MAGIC {
            return Err(EngineError::corruption(format!(
                "segment {} has bad magic",
                path.display()
            )));
        }
        let version = u16::from_le_bytes([mmap[4], mmap[5]]);
        if version != VERSION {
            return Err(EngineError::corruption(format!(
                "segment {} has unsupported version {}",
                path.display(),
                version
            )));
        }
        let first_index = u64::from_le_bytes(mmap[8..16].try_into().expect("fixed slice"));

        let mut offset = HEADER_LEN;
        let mut next_index = first_index;
        loop {
            match decode_record(&mmap[offset..], offset as u64) {
                Ok(Decoded::Record(rec, consumed)) => {
                    if rec.index != next_index {
                        warn!(
                            segment = %path.display(),
                            offset,
                            expected = next_index,
                            found = rec.index,
                            "index discontinuity at tail, truncating"
                        );
                        break;
                    }
                    next_index += 1;
                    offset += consumed;
                }
                Ok(Decoded::End) => break,
                Ok(Decoded::Truncated) => {
                    warn!(
                        segment = %path.display(),
                        offset,
                        "torn record at tail, truncating"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        segment = %path.display(),
                        offset,
                        error = %e,
                        "unreadable record at tail, truncating"
                    );
                    break;
                }
            }
        }

        // Clear whatever the crash left behind the valid run.
        if mmap[offset..].iter().any(|b| *b != 0) {
            mmap[offset..].fill(0);
            mmap.flush()?;
        }

        Ok((
            Segment {
                path: path.to_path_buf(),
                first_index,
                mmap,
                write_offset: offset,
            },
            next_index,
        ))
    }

    /// First WAL index stored in this segment
    pub(crate) fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Path of the backing file
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// True if no record has been appended yet
    pub(crate) fn is_empty(&self) -> bool {
        self.write_offset == HEADER_LEN
    }

    /// Whether an encoded record of `len` bytes fits
    ///
    /// A trailing zero length field must remain representable, hence the
    /// extra four bytes of headroom.
    pub(crate) fn fits(&self, len: usize) -> bool {
        self.write_offset + len + 4 <= self.mmap.len()
    }

    /// Copy an encoded record into the map
    pub(crate) fn append(&mut self, encoded: &[u8]) {
        debug_assert!(self.fits(encoded.len()));
        let end = self.write_offset + encoded.len();
        self.mmap[self.write_offset..end].copy_from_slice(encoded);
        self.write_offset = end;
    }

    /// msync the segment
    pub(crate) fn flush(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            EngineError::wal(format!("flush of {} failed: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_record;
    use tempfile::TempDir;

    #[test]
    fn test_segment_file_name_roundtrip() {
        let name = segment_file_name(123);
        assert_eq!(parse_segment_file_name(&name), Some(123));
        assert_eq!(parse_segment_file_name("segment_x.wal"), None);
        assert_eq!(parse_segment_file_name("other.wal"), None);
    }

    #[test]
    fn test_file_names_sort_numerically() {
        let mut names = vec![
            segment_file_name(100),
            segment_file_name(9),
            segment_file_name(10_000),
        ];
        names.sort();
        assert_eq!(
            names
                .iter()
                .map(|n| parse_segment_file_name(n).unwrap())
                .collect::<Vec<_>>(),
            vec![9, 100, 10_000]
        );
    }

    #[test]
    fn test_create_append_reopen() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut seg = Segment::create(dir.path(), 1, 4096).unwrap();
            path = seg.path().to_path_buf();
            for i in 1..=5u64 {
                let encoded = encode_record(i, "op", format!("p{i}").as_bytes()).unwrap();
                assert!(seg.fits(encoded.len()));
                seg.append(&encoded);
            }
            seg.flush().unwrap();
        }

        let (seg, next_index) = Segment::open_tail(&path).unwrap();
        assert_eq!(next_index, 6);
        assert_eq!(seg.first_index(), 1);
    }

    #[test]
    fn test_open_tail_truncates_torn_record() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut seg = Segment::create(dir.path(), 1, 4096).unwrap();
            path = seg.path().to_path_buf();
            seg.append(&encode_record(1, "op", b"first").unwrap());
            let torn = encode_record(2, "op", b"second").unwrap();
            // Write only part of the second record, as a crash would.
            let cut = &torn[..torn.len() - 4];
            let off = seg.write_offset;
            seg.mmap[off..off + cut.len()].copy_from_slice(cut);
            seg.flush().unwrap();
        }

        let (_seg, next_index) = Segment::open_tail(&path).unwrap();
        assert_eq!(next_index, 2, "only the intact record survives");
    }

    #[test]
    fn test_open_tail_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(segment_file_name(1));
        std::fs::write(&path, vec![0xAB; 64]).unwrap();

        let err = Segment::open_tail(&path).unwrap_err();
        assert!(matches!(err, EngineError::Corruption { .. }));
    }

    #[test]
    fn test_fits_accounts_for_terminator() {
        let dir = TempDir::new().unwrap();
        let seg = Segment::create(dir.path(), 1, 64).unwrap();
        // capacity 64, header 16: a 44-byte record would leave no room for
        // the trailing zero length field.
        assert!(!seg.fits(45));
        assert!(seg.fits(44));
    }
}
