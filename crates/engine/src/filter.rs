//! Idempotency filters
//!
//! Per-partition set of applied transaction IDs. `contains(tx_id)` before
//! application decides duplicate rejection; `add(tx_id)` after a
//! successful application records it. The filter travels inside the
//! snapshot, variant tag included, so a restored partition rejects the
//! same duplicates the crashed one would have.
//!
//! Two variants with different contracts:
//!
//! | Variant | `contains` semantics                      | Memory              |
//! |---------|-------------------------------------------|---------------------|
//! | Lru     | exact since the last eviction             | O(capacity)         |
//! | Bloom   | false positives possible, never negatives | O(expected_items)   |
//!
//! Bloom probes use seeded xxh3, which is stable across processes; a
//! hasher with per-process randomization would invalidate every snapshot.

use atomledger_core::config::FilterConfig;
use lru::LruCache;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Serializable idempotency filter, selected by configuration
#[derive(Debug, Serialize, Deserialize)]
pub enum IdempotencyFilter {
    /// Exact, bounded memory, forgets the least recently seen IDs
    Lru(LruFilter),
    /// Probabilistic, unbounded history, fixed memory
    Bloom(BloomFilter),
}

impl IdempotencyFilter {
    /// Build an empty filter for the configured variant
    pub fn from_config(cfg: &FilterConfig) -> Self {
        match *cfg {
            FilterConfig::Lru { capacity } => IdempotencyFilter::Lru(LruFilter::new(capacity)),
            FilterConfig::Bloom {
                expected_items,
                false_positive_rate,
            } => IdempotencyFilter::Bloom(BloomFilter::new(expected_items, false_positive_rate)),
        }
    }

    /// Whether `tx_id` was (probably) applied already
    ///
    /// A hit refreshes recency on the Lru variant, so an aggressively
    /// retried duplicate does not age out while it is still being seen.
    pub fn contains(&mut self, tx_id: &str) -> bool {
        match self {
            IdempotencyFilter::Lru(f) => f.contains(tx_id),
            IdempotencyFilter::Bloom(f) => f.contains(tx_id),
        }
    }

    /// Record `tx_id` as applied
    pub fn add(&mut self, tx_id: &str) {
        match self {
            IdempotencyFilter::Lru(f) => f.add(tx_id),
            IdempotencyFilter::Bloom(f) => f.add(tx_id),
        }
    }

    /// Drop all recorded IDs
    pub fn clear(&mut self) {
        match self {
            IdempotencyFilter::Lru(f) => f.clear(),
            IdempotencyFilter::Bloom(f) => f.clear(),
        }
    }

    /// Number of IDs recorded (exact for Lru, insert count for Bloom)
    pub fn len(&self) -> usize {
        match self {
            IdempotencyFilter::Lru(f) => f.len(),
            IdempotencyFilter::Bloom(f) => f.len(),
        }
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variant name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            IdempotencyFilter::Lru(_) => "lru",
            IdempotencyFilter::Bloom(_) => "bloom",
        }
    }
}

// ============================================================================
// Exact LRU variant
// ============================================================================

/// Exact filter over the `lru` crate
///
/// Serialized as `(capacity, keys oldest-first)` so that re-inserting in
/// order reproduces the recency order exactly.
pub struct LruFilter {
    inner: LruCache<String, ()>,
}

impl std::fmt::Debug for LruFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruFilter")
            .field("capacity", &self.inner.cap().get())
            .field("len", &self.inner.len())
            .finish()
    }
}

impl LruFilter {
    /// Create with room for `capacity` transaction IDs
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        LruFilter {
            inner: LruCache::new(capacity),
        }
    }

    fn contains(&mut self, tx_id: &str) -> bool {
        // get() refreshes recency on hit.
        self.inner.get(tx_id).is_some()
    }

    fn add(&mut self, tx_id: &str) {
        self.inner.put(tx_id.to_string(), ());
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[derive(Serialize)]
struct LruSnapshotRef<'a> {
    capacity: usize,
    keys: Vec<&'a String>,
}

#[derive(Deserialize)]
struct LruSnapshot {
    capacity: usize,
    keys: Vec<String>,
}

impl Serialize for LruFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // iter() walks most-recent first; persist oldest-first.
        let mut keys: Vec<&String> = self.inner.iter().map(|(k, _)| k).collect();
        keys.reverse();
        LruSnapshotRef {
            capacity: self.inner.cap().get(),
            keys,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LruFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let snap = LruSnapshot::deserialize(deserializer)?;
        let mut filter = LruFilter::new(snap.capacity);
        for key in snap.keys {
            filter.inner.put(key, ());
        }
        Ok(filter)
    }
}

// ============================================================================
// Probabilistic Bloom variant
// ============================================================================

/// Bloom filter sized from an expected item count and target error rate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
    inserted: u64,
}

impl BloomFilter {
    /// Size the bit array for `expected_items` at `false_positive_rate`
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        // m = -n * ln(p) / (ln 2)^2, k = (m / n) * ln 2
        let num_bits = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        let num_bits = num_bits.max(8);
        let num_hashes = ((num_bits as f64 / n) * ln2).round() as u32;
        let num_hashes = num_hashes.clamp(1, 30);

        BloomFilter {
            bits: vec![0u8; ((num_bits + 7) / 8) as usize],
            num_bits,
            num_hashes,
            inserted: 0,
        }
    }

    fn contains(&self, tx_id: &str) -> bool {
        (0..self.num_hashes).all(|i| {
            let bit = xxh3_64_with_seed(tx_id.as_bytes(), i as u64) % self.num_bits;
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    fn add(&mut self, tx_id: &str) {
        for i in 0..self.num_hashes {
            let bit = xxh3_64_with_seed(tx_id.as_bytes(), i as u64) % self.num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
        self.inserted += 1;
    }

    fn clear(&mut self) {
        self.bits.fill(0);
        self.inserted = 0;
    }

    fn len(&self) -> usize {
        self.inserted as usize
    }
}
