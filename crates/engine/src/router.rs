//! Engine router
//!
//! [`LedgerEngine`] owns an ordered vector of partitions and a routing
//! strategy. `submit` maps the command's routing key to a partition and
//! enqueues; `query` runs a closure against a read-consistent view of the
//! owning partition's state. Reads are point-in-time consistent for that
//! partition only; there is no cross-partition transaction or ordering.
//!
//! When the engine is one node of a larger deployment the same strategy
//! is evaluated over `total_nodes` first, and a key owned by a different
//! node is refused instead of enqueued.

use crate::partition::PartitionHandle;
use crate::recovery::RecoveryStats;
use crate::routing::RoutingStrategy;
use atomledger_core::command::LedgerCommand;
use atomledger_core::completion::{completion_pair, CompletionHandle};
use atomledger_core::config::EngineConfig;
use atomledger_core::error::{EngineError, Result};
use atomledger_core::traits::Processor;
use atomledger_durability::inspect::{snapshot_dump, SnapshotDump, WalReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A running ledger engine
pub struct LedgerEngine<P: Processor> {
    cfg: EngineConfig,
    strategy: Arc<dyn RoutingStrategy>,
    partitions: Vec<PartitionHandle<P>>,
    running: AtomicBool,
}

impl<P: Processor> std::fmt::Debug for LedgerEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("cfg", &self.cfg)
            .field("partitions", &self.partitions.len())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl<P: Processor> LedgerEngine<P> {
    pub(crate) fn new(
        cfg: EngineConfig,
        strategy: Arc<dyn RoutingStrategy>,
        partitions: Vec<PartitionHandle<P>>,
    ) -> Self {
        info!(
            engine = %cfg.engine_name,
            partitions = partitions.len(),
            routing = strategy.name(),
            "engine running"
        );
        LedgerEngine {
            cfg,
            strategy,
            partitions,
            running: AtomicBool::new(true),
        }
    }

    /// Submit a command and receive a completion handle
    ///
    /// Routing failures and unavailable partitions surface here,
    /// synchronously; duplicate and processor rejections arrive through
    /// the handle once the partition reaches the command. The call blocks
    /// while the target partition's ring is full.
    pub fn submit(&self, cmd: P::Command) -> Result<CompletionHandle> {
        let partition = self.route(cmd.routing_key())?;
        let (completion, handle) = completion_pair();
        self.partitions[partition].enqueue(cmd, Some(completion))?;
        Ok(handle)
    }

    /// Fire-and-forget submit; failures are logged, not returned
    pub fn submit_forget(&self, cmd: P::Command) {
        let tx_id = cmd.tx_id().to_string();
        let outcome = self
            .route(cmd.routing_key())
            .and_then(|partition| self.partitions[partition].enqueue(cmd, None));
        if let Err(e) = outcome {
            warn!(tx_id, error = %e, "fire-and-forget submit dropped");
        }
    }

    /// Run `f` against the state of the partition owning `key`
    ///
    /// The read sees a consistent point in time for that partition; a
    /// command mid-application blocks the read until it finishes.
    pub fn query<R>(&self, key: &str, f: impl FnOnce(&P::State) -> R) -> Result<R> {
        let partition = self.route(key)?;
        Ok(self.partitions[partition].read_state(f))
    }

    /// The partition index `key` routes to on this node
    pub fn partition_of(&self, key: &str) -> usize {
        self.strategy.partition_of(key, self.partitions.len())
    }

    /// Number of partitions
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Engine name from the configuration
    pub fn name(&self) -> &str {
        &self.cfg.engine_name
    }

    /// Per-partition recovery statistics from the last start
    pub fn recovery_stats(&self) -> Vec<RecoveryStats> {
        self.partitions
            .iter()
            .map(|p| p.recovery_stats().clone())
            .collect()
    }

    /// Read-only WAL pager for one partition (operator tooling)
    pub fn wal_reader(&self, partition: usize) -> Result<WalReader> {
        self.check_partition(partition)?;
        WalReader::open(self.cfg.wal_dir(partition))
    }

    /// Diagnostic dump of one partition's snapshot file
    pub fn snapshot_dump(&self, partition: usize) -> Result<Option<SnapshotDump>> {
        self.check_partition(partition)?;
        snapshot_dump(&self.cfg.snapshot_dir(partition))
    }

    /// Stop all partitions in order; idempotent
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        info!(engine = %self.cfg.engine_name, "engine shutting down");

        let mut first_error = None;
        for partition in &mut self.partitions {
            if let Err(e) = partition.shutdown() {
                warn!(partition = partition.index(), error = %e, "partition shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn route(&self, key: &str) -> Result<usize> {
        if !self.running.load(Ordering::Acquire) {
            return Err(EngineError::partition_unavailable(0, "engine stopped"));
        }
        let cluster = self.cfg.cluster;
        if cluster.total_nodes > 1 {
            let owner = self.strategy.partition_of(key, cluster.total_nodes as usize) as u32;
            if owner != cluster.node_id {
                return Err(EngineError::routing(key, owner, cluster.node_id));
            }
        }
        Ok(self.strategy.partition_of(key, self.partitions.len()))
    }

    fn check_partition(&self, partition: usize) -> Result<()> {
        if partition >= self.partitions.len() {
            return Err(EngineError::init(format!(
                "partition {partition} out of range, engine has {}",
                self.partitions.len()
            )));
        }
        Ok(())
    }
}
