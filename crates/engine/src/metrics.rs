//! Metric registration
//!
//! The engine emits through the `metrics` facade; the host decides where
//! the numbers go by installing a recorder. Three instruments per
//! partition, all tagged with `engine` and `partition`:
//!
//! - `<prefix>_ring_remaining_capacity` (gauge) - free slots in the
//!   partition's inbound ring
//! - `<prefix>_writer_queue_depth` (gauge) - entities waiting in the
//!   async-writer FIFO
//! - `<prefix>_persist_batch_seconds` (histogram) - latency of successful
//!   `persist` calls

use metrics::{gauge, histogram, Gauge, Histogram};

/// Per-partition instrument handles, registered once at startup
#[derive(Clone)]
pub(crate) struct PartitionMetrics {
    pub ring_remaining: Gauge,
    pub writer_queue_depth: Gauge,
    pub persist_batch_seconds: Histogram,
}

impl PartitionMetrics {
    pub(crate) fn register(prefix: &str, engine: &str, partition: usize) -> Self {
        let engine = engine.to_string();
        let partition = partition.to_string();
        PartitionMetrics {
            ring_remaining: gauge!(
                format!("{prefix}_ring_remaining_capacity"),
                "engine" => engine.clone(),
                "partition" => partition.clone(),
            ),
            writer_queue_depth: gauge!(
                format!("{prefix}_writer_queue_depth"),
                "engine" => engine.clone(),
                "partition" => partition.clone(),
            ),
            persist_batch_seconds: histogram!(
                format!("{prefix}_persist_batch_seconds"),
                "engine" => engine,
                "partition" => partition,
            ),
        }
    }
}
