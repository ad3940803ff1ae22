//! WAL record framing
//!
//! Every record in the log is framed as:
//!
//! ```text
//! [total_len: u32][index: u64][type_key_len: u16][type_key][payload][crc32: u32]
//! ```
//!
//! - **total_len**: size of everything after the length field
//! - **index**: the record's WAL index, stored explicitly so scans can
//!   verify monotonicity and the inspector can page backwards
//! - **type_key**: tag the codec registry dispatches on during recovery
//! - **crc32**: checksum over index + type_key + payload
//!
//! All integers are little-endian. A `total_len` of zero marks the end of
//! the written region of a segment (segments are zero-filled at creation),
//! which is why the minimum valid `total_len` is enforced strictly.

use atomledger_core::error::{EngineError, Result};
use crc32fast::Hasher;

/// Bytes before the payload-dependent part: index(8) + type_key_len(2)
const FIXED_HEAD: usize = 10;
/// Trailing checksum
const CRC_LEN: usize = 4;
/// Smallest legal total_len: head + empty type key + empty payload + crc
pub(crate) const MIN_TOTAL_LEN: usize = FIXED_HEAD + CRC_LEN;
/// The length field itself
pub(crate) const LEN_PREFIX: usize = 4;

/// One decoded WAL record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Monotonic index assigned by the store
    pub index: u64,
    /// Command type tag for decoder dispatch
    pub type_key: String,
    /// Serialized command
    pub payload: Vec<u8>,
}

/// Outcome of decoding at some offset
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A valid record and the total bytes it occupies (length field included)
    Record(WalRecord, usize),
    /// Zero length field: the written region of the segment ends here
    End,
    /// The buffer ends inside a record: a torn tail write
    Truncated,
}

/// Encode a record into its on-disk framing
pub fn encode_record(index: u64, type_key: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let key_bytes = type_key.as_bytes();
    if key_bytes.len() > u16::MAX as usize {
        return Err(EngineError::serialization(format!(
            "type key too long: {} bytes",
            key_bytes.len()
        )));
    }

    let total_len = FIXED_HEAD + key_bytes.len() + payload.len() + CRC_LEN;
    let mut buf = Vec::with_capacity(LEN_PREFIX + total_len);

    buf.extend_from_slice(&(total_len as u32).to_le_bytes());
    buf.extend_from_slice(&index.to_le_bytes());
    buf.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    buf.extend_from_slice(payload);

    let mut hasher = Hasher::new();
    hasher.update(&buf[LEN_PREFIX..]);
    let crc = hasher.finalize();
    buf.extend_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// Decode the record starting at `buf[0]`
///
/// `offset` is the absolute file offset of `buf[0]`, used in corruption
/// messages. CRC mismatches and impossible lengths are corruption; a
/// buffer that simply ends early is `Truncated` (expected at the tail of
/// the last segment after a crash).
pub(crate) fn decode_record(buf: &[u8], offset: u64) -> Result<Decoded> {
    if buf.len() < LEN_PREFIX {
        return Ok(Decoded::Truncated);
    }
    let total_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if total_len == 0 {
        return Ok(Decoded::End);
    }
    if total_len < MIN_TOTAL_LEN {
        return Err(EngineError::corruption(format!(
            "offset {}: record length {} below minimum {}",
            offset, total_len, MIN_TOTAL_LEN
        )));
    }
    if buf.len() < LEN_PREFIX + total_len {
        return Ok(Decoded::Truncated);
    }

    let body = &buf[LEN_PREFIX..LEN_PREFIX + total_len];
    let (framed, crc_bytes) = body.split_at(total_len - CRC_LEN);
    let expected_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    let mut hasher = Hasher::new();
    hasher.update(framed);
    let actual_crc = hasher.finalize();
    if actual_crc != expected_crc {
        return Err(EngineError::corruption(format!(
            "offset {}: CRC mismatch, expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    let index = u64::from_le_bytes(framed[0..8].try_into().expect("fixed slice"));
    let key_len = u16::from_le_bytes([framed[8], framed[9]]) as usize;
    if FIXED_HEAD + key_len > framed.len() {
        return Err(EngineError::corruption(format!(
            "offset {}: type key length {} exceeds record body",
            offset, key_len
        )));
    }
    let type_key = std::str::from_utf8(&framed[FIXED_HEAD..FIXED_HEAD + key_len])
        .map_err(|_| {
            EngineError::corruption(format!("offset {}: type key is not UTF-8", offset))
        })?
        .to_string();
    let payload = framed[FIXED_HEAD + key_len..].to_vec();

    Ok(Decoded::Record(
        WalRecord {
            index,
            type_key,
            payload,
        },
        LEN_PREFIX + total_len,
    ))
}
