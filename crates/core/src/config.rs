//! Engine configuration
//!
//! All tunables live in [`EngineConfig`]; the builder calls
//! [`EngineConfig::validate`] before any file is touched. Defaults suit a
//! single-node engine with a few partitions; tests shrink the intervals
//! and segment sizes.
//!
//! ## On-disk layout
//!
//! ```text
//! <base_dir>/<engine_name>/[node-<id>/]<engine_name>-p<k>/
//!     wal/        segment_<first_index>.wal
//!     snapshot/   snapshot.dat (+ snapshot.tmp during atomic replace)
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Idempotency filter selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterConfig {
    /// Exact filter; remembers the `capacity` most recently seen IDs
    Lru {
        /// Maximum number of transaction IDs retained
        capacity: usize,
    },
    /// Probabilistic filter; never forgets, may rarely reject a new ID
    Bloom {
        /// Expected number of distinct transaction IDs
        expected_items: usize,
        /// Acceptable false-positive rate, e.g. 0.01
        false_positive_rate: f64,
    },
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::Lru { capacity: 100_000 }
    }
}

/// Routing strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingKind {
    /// `hash(key) % n`; fast, remaps almost everything when n changes
    Modulo,
    /// Highest-random-weight; remaps ~1/(n+1) of keys when n grows by one
    Rendezvous,
}

impl Default for RoutingKind {
    fn default() -> Self {
        RoutingKind::Modulo
    }
}

/// Cross-node ownership self-check
///
/// The engine does no networking; an external router is expected to send
/// each key to its owning node. With `total_nodes > 1` the engine verifies
/// that assumption on every submit and refuses misrouted keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of nodes the key space is spread over
    pub total_nodes: u32,
    /// This node's index in `[0, total_nodes)`
    pub node_id: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            total_nodes: 1,
            node_id: 0,
        }
    }
}

/// Durability boundary for WAL appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
    /// Flush after every append; an acknowledged command is on disk
    Always,
    /// Flush every `n` appends; bounded data loss window, higher throughput
    EveryN(u64),
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Always
    }
}

/// WAL store tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalConfig {
    /// Capacity of one memory-mapped segment file, in bytes
    ///
    /// A record larger than this gets a dedicated, appropriately sized
    /// segment.
    pub segment_size: usize,
    /// When appends become durable
    pub sync: SyncPolicy,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            segment_size: 64 * 1024 * 1024,
            sync: SyncPolicy::Always,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for all partition data
    pub base_dir: PathBuf,
    /// Subdirectory under `base_dir`; isolates multiple engines
    pub engine_name: String,
    /// Number of single-writer partitions
    pub partitions: usize,
    /// Capacity of each partition's inbound ring queue
    pub ring_size: usize,
    /// Capacity of each partition's async-writer FIFO
    pub queue_size: usize,
    /// Maximum batch handed to the persister in one call
    pub batch_size: usize,
    /// Snapshot after this many WAL records since the last snapshot
    pub snapshot_interval: u64,
    /// Enable the time-based snapshot trigger
    pub enable_time_snapshot: bool,
    /// Snapshot after this long since the last snapshot (if enabled)
    pub snapshot_time_interval: Duration,
    /// Heartbeat period; drives the time trigger under zero load
    pub heartbeat_interval: Duration,
    /// Idempotency filter variant
    pub idempotency: FilterConfig,
    /// Routing strategy variant
    pub routing: RoutingKind,
    /// Cross-node ownership self-check
    pub cluster: ClusterConfig,
    /// Prefix for emitted metric names
    pub metrics_prefix: String,
    /// WAL tuning
    pub wal: WalConfig,
}

impl EngineConfig {
    /// Config with defaults for everything but the location
    pub fn new(base_dir: impl Into<PathBuf>, engine_name: impl Into<String>) -> Self {
        EngineConfig {
            base_dir: base_dir.into(),
            engine_name: engine_name.into(),
            partitions: 4,
            ring_size: 8_192,
            queue_size: 1_024,
            batch_size: 128,
            snapshot_interval: 10_000,
            enable_time_snapshot: false,
            snapshot_time_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(10),
            idempotency: FilterConfig::default(),
            routing: RoutingKind::default(),
            cluster: ClusterConfig::default(),
            metrics_prefix: "atomledger".to_string(),
            wal: WalConfig::default(),
        }
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine_name.is_empty() {
            return Err(EngineError::init("engine_name must not be empty"));
        }
        if self.engine_name.contains('/') || self.engine_name.contains('\\') {
            return Err(EngineError::init(format!(
                "engine_name {:?} must not contain path separators",
                self.engine_name
            )));
        }
        if self.partitions == 0 {
            return Err(EngineError::init("partitions must be at least 1"));
        }
        if self.ring_size == 0 || self.queue_size == 0 || self.batch_size == 0 {
            return Err(EngineError::init(
                "ring_size, queue_size and batch_size must be at least 1",
            ));
        }
        if self.snapshot_interval == 0 {
            return Err(EngineError::init("snapshot_interval must be at least 1"));
        }
        if self.cluster.total_nodes == 0 {
            return Err(EngineError::init("cluster.total_nodes must be at least 1"));
        }
        if self.cluster.node_id >= self.cluster.total_nodes {
            return Err(EngineError::init(format!(
                "cluster.node_id {} out of range for {} nodes",
                self.cluster.node_id, self.cluster.total_nodes
            )));
        }
        match self.idempotency {
            FilterConfig::Lru { capacity } if capacity == 0 => {
                return Err(EngineError::init("lru capacity must be at least 1"));
            }
            FilterConfig::Bloom {
                expected_items,
                false_positive_rate,
            } => {
                if expected_items == 0 {
                    return Err(EngineError::init("bloom expected_items must be at least 1"));
                }
                if !(false_positive_rate > 0.0 && false_positive_rate < 0.5) {
                    return Err(EngineError::init(format!(
                        "bloom false_positive_rate {} must be in (0, 0.5)",
                        false_positive_rate
                    )));
                }
            }
            _ => {}
        }
        if self.wal.segment_size < 4_096 {
            return Err(EngineError::init("wal.segment_size must be at least 4096"));
        }
        if let SyncPolicy::EveryN(0) = self.wal.sync {
            return Err(EngineError::init("wal sync EveryN(0) is meaningless"));
        }
        Ok(())
    }

    /// Directory holding this engine's data, node subdirectory included
    /// when the engine is part of a multi-node deployment
    pub fn engine_dir(&self) -> PathBuf {
        let mut dir = self.base_dir.join(&self.engine_name);
        if self.cluster.total_nodes > 1 {
            dir = dir.join(format!("node-{}", self.cluster.node_id));
        }
        dir
    }

    /// Directory holding one partition's WAL and snapshot
    pub fn partition_dir(&self, partition: usize) -> PathBuf {
        self.engine_dir()
            .join(format!("{}-p{}", self.engine_name, partition))
    }

    /// A partition's WAL directory
    pub fn wal_dir(&self, partition: usize) -> PathBuf {
        self.partition_dir(partition).join("wal")
    }

    /// A partition's snapshot directory
    pub fn snapshot_dir(&self, partition: usize) -> PathBuf {
        self.partition_dir(partition).join("snapshot")
    }
}
