//! Partition recovery
//!
//! One-shot reconstruction of a partition's state on start:
//!
//! 1. Load the snapshot; absent or unreadable means cold start from
//!    [`Bootstrap::initial_state`] with a fresh filter
//! 2. Replay WAL records with index greater than the snapshot's
//!    `last_wal_index`, decoding each through the codec registry and
//!    re-running the processor
//!
//! Replay is the normal application path with persistence switched off:
//! duplicates are filtered, processor rejections are counted and skipped
//! (they rejected the first time too), and no entities reach the async
//! writer. Any record that cannot be decoded or read fails the recovery;
//! a partially replayed partition must not serve traffic.

use crate::filter::IdempotencyFilter;
use atomledger_core::command::{CodecRegistry, LedgerCommand};
use atomledger_core::config::FilterConfig;
use atomledger_core::error::{EngineError, Result};
use atomledger_core::traits::{Bootstrap, Processor};
use atomledger_durability::snapshot::SnapshotStore;
use atomledger_durability::wal::WalStore;
use tracing::{info, warn};

/// What recovery did, for logs and operator visibility
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Partition these stats belong to
    pub partition: usize,
    /// `last_wal_index` of the snapshot used, 0 on cold start
    pub snapshot_index: u64,
    /// WAL records replayed after the snapshot point
    pub records_replayed: u64,
    /// Replayed records skipped because the filter already knew them
    pub duplicates_skipped: u64,
    /// Replayed records the processor rejected again
    pub rejected_replays: u64,
}

/// Outcome of a successful recovery
#[derive(Debug)]
pub(crate) struct Recovered<S> {
    pub state: S,
    pub filter: IdempotencyFilter,
    pub last_wal_index: u64,
    pub stats: RecoveryStats,
}

pub(crate) fn recover_partition<P: Processor>(
    partition: usize,
    wal: &WalStore,
    snapshots: &SnapshotStore,
    processor: &P,
    bootstrap: &dyn Bootstrap<State = P::State>,
    registry: &CodecRegistry<P::Command>,
    filter_cfg: &FilterConfig,
) -> Result<Recovered<P::State>> {
    let mut stats = RecoveryStats {
        partition,
        ..RecoveryStats::default()
    };

    let (mut state, mut filter, snapshot_index) = match snapshots.load() {
        Some(snap) => {
            match (
                bincode::deserialize::<P::State>(&snap.state),
                bincode::deserialize::<IdempotencyFilter>(&snap.filter),
            ) {
                (Ok(state), Ok(filter)) => (state, filter, snap.last_wal_index),
                (state_res, filter_res) => {
                    // Valid envelope, stale or foreign contents. Same
                    // treatment as a corrupt file: full replay.
                    let reason = state_res
                        .err()
                        .map(|e| e.to_string())
                        .or_else(|| filter_res.err().map(|e| e.to_string()))
                        .unwrap_or_default();
                    warn!(
                        partition,
                        reason = %reason,
                        "snapshot contents undecodable, cold-starting with full replay"
                    );
                    (
                        bootstrap.initial_state(),
                        IdempotencyFilter::from_config(filter_cfg),
                        0,
                    )
                }
            }
        }
        None => (
            bootstrap.initial_state(),
            IdempotencyFilter::from_config(filter_cfg),
            0,
        ),
    };
    stats.snapshot_index = snapshot_index;

    let mut last_wal_index = snapshot_index.max(wal.last_index());
    let mut cursor = wal
        .scan_from(snapshot_index)
        .map_err(|e| EngineError::recovery(format!("partition {partition}: {e}")))?;
    loop {
        let record = cursor
            .next()
            .map_err(|e| EngineError::recovery(format!("partition {partition}: {e}")))?;
        let Some(record) = record else { break };

        let cmd = registry
            .decode(&record.type_key, &record.payload)
            .map_err(|e| {
                EngineError::recovery(format!(
                    "partition {partition}: record {} undecodable: {e}",
                    record.index
                ))
            })?;
        stats.records_replayed += 1;
        last_wal_index = record.index;

        if filter.contains(cmd.tx_id()) {
            stats.duplicates_skipped += 1;
            continue;
        }
        match processor.process(&mut state, &cmd) {
            Ok(_entity) => {
                // Entities are not re-persisted during replay; the sink
                // already saw them or will tolerate their absence (the
                // WAL is the authoritative record).
                filter.add(cmd.tx_id());
            }
            Err(_) => stats.rejected_replays += 1,
        }
    }

    info!(
        partition,
        snapshot_index = stats.snapshot_index,
        replayed = stats.records_replayed,
        duplicates = stats.duplicates_skipped,
        rejected = stats.rejected_replays,
        "partition recovered"
    );

    Ok(Recovered {
        state,
        filter,
        last_wal_index,
        stats,
    })
}
