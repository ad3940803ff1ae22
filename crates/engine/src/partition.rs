//! Single-writer partition
//!
//! A partition is a self-contained shard: inbound ring, state, WAL,
//! snapshot store, idempotency filter, and async writer, all owned by one
//! worker thread. Routers enqueue events; the worker applies them in
//! order. Nothing else ever mutates the state, which is what makes the
//! whole engine lock-free on the application path (the state lives behind
//! a read-write lock only so `query` can take a consistent read).
//!
//! ## Event handling
//!
//! For each command: encode, append to the WAL (the durability point),
//! check the idempotency filter, apply the processor, record the tx ID,
//! hand any produced entity to the async writer (blocking when its FIFO
//! is full), complete the handle. A heartbeat event only runs the
//! snapshot check, so the time trigger fires under zero load.
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Recovering -> Running -> Draining -> Stopped
//!                             |
//!                             +-- fatal WAL error / processor panic --> Failed
//! ```
//!
//! Shutdown ordering is exact: stop the heartbeat, drain the ring
//! synchronously, force a final snapshot, stop the async writer (drains
//! its FIFO), close the WAL.

use crate::filter::IdempotencyFilter;
use crate::metrics::PartitionMetrics;
use crate::recovery::{recover_partition, RecoveryStats};
use crate::writer::AsyncBatchWriter;
use atomledger_core::command::{CodecRegistry, LedgerCommand};
use atomledger_core::completion::{CommandReceipt, Completion};
use atomledger_core::config::EngineConfig;
use atomledger_core::error::{EngineError, Result};
use atomledger_core::traits::{Bootstrap, Persister, Processor};
use atomledger_durability::snapshot::{SnapshotData, SnapshotStore};
use atomledger_durability::wal::WalStore;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

// Lifecycle states, stored in an AtomicU8 shared with the router.
const CREATED: u8 = 0;
const RECOVERING: u8 = 1;
const RUNNING: u8 = 2;
const DRAINING: u8 = 3;
const STOPPED: u8 = 4;
const FAILED: u8 = 5;

fn state_name(state: u8) -> &'static str {
    match state {
        CREATED => "created",
        RECOVERING => "recovering",
        RUNNING => "running",
        DRAINING => "draining",
        STOPPED => "stopped",
        _ => "failed",
    }
}

/// Events flowing through a partition's ring
pub(crate) enum PartitionEvent<C> {
    /// A submitted command with its optional completion
    Command {
        cmd: C,
        completion: Option<Completion>,
    },
    /// Sentinel injected by the heartbeat thread
    Heartbeat,
    /// Begin the drain-and-stop sequence
    Shutdown,
}

/// Router-facing side of one partition
pub(crate) struct PartitionHandle<P: Processor> {
    index: usize,
    ring_size: usize,
    tx: Sender<PartitionEvent<P::Command>>,
    state: Arc<RwLock<P::State>>,
    lifecycle: Arc<AtomicU8>,
    metrics: PartitionMetrics,
    worker: Option<JoinHandle<()>>,
    heartbeat_stop: Option<Sender<()>>,
    heartbeat: Option<JoinHandle<()>>,
    recovery_stats: RecoveryStats,
}

impl<P: Processor> PartitionHandle<P> {
    /// Recover the partition from disk and start its threads
    pub(crate) fn start<Per>(
        index: usize,
        cfg: &EngineConfig,
        processor: Arc<P>,
        persister: Arc<Per>,
        bootstrap: &dyn Bootstrap<State = P::State>,
        registry: &CodecRegistry<P::Command>,
    ) -> Result<Self>
    where
        Per: Persister<Entity = P::Entity> + ?Sized,
    {
        let lifecycle = Arc::new(AtomicU8::new(CREATED));
        let metrics = PartitionMetrics::register(&cfg.metrics_prefix, &cfg.engine_name, index);

        let wal = WalStore::open(cfg.wal_dir(index), cfg.wal.clone())?;
        let snapshots = SnapshotStore::open(cfg.snapshot_dir(index))?;

        lifecycle.store(RECOVERING, Ordering::Release);
        let recovered = recover_partition(
            index,
            &wal,
            &snapshots,
            processor.as_ref(),
            bootstrap,
            registry,
            &cfg.idempotency,
        )?;
        let recovery_stats = recovered.stats.clone();

        let writer = AsyncBatchWriter::spawn(
            &cfg.engine_name,
            index,
            cfg.queue_size,
            cfg.batch_size,
            persister,
            metrics.clone(),
        )?;

        let state = Arc::new(RwLock::new(recovered.state));
        let (tx, rx) = bounded(cfg.ring_size);

        let mut worker_body = Worker {
            index,
            processor,
            state: Arc::clone(&state),
            filter: recovered.filter,
            wal,
            snapshots,
            writer,
            lifecycle: Arc::clone(&lifecycle),
            metrics: metrics.clone(),
            ring_size: cfg.ring_size,
            snapshot_interval: cfg.snapshot_interval,
            enable_time_snapshot: cfg.enable_time_snapshot,
            snapshot_time_interval: cfg.snapshot_time_interval,
            last_wal_index: recovered.last_wal_index,
            last_snapshot_index: recovered.stats.snapshot_index,
            last_snapshot_time: Instant::now(),
        };

        let worker = thread::Builder::new()
            .name(format!("{}-p{}", cfg.engine_name, index))
            .spawn(move || worker_body.run(rx))
            .map_err(|e| EngineError::init(format!("failed to spawn partition worker: {e}")))?;

        // Heartbeat: sentinel events so the time trigger fires with no
        // traffic. Stops when its channel sender is dropped.
        let (heartbeat_stop, stop_rx) = bounded::<()>(0);
        let heartbeat_tx = tx.clone();
        let heartbeat_interval = cfg.heartbeat_interval;
        let heartbeat = thread::Builder::new()
            .name(format!("{}-p{}-heartbeat", cfg.engine_name, index))
            .spawn(move || loop {
                match stop_rx.recv_timeout(heartbeat_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        // A full ring means plenty of traffic; the count
                        // trigger covers snapshotting in that case.
                        let _ = heartbeat_tx.try_send(PartitionEvent::Heartbeat);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| EngineError::init(format!("failed to spawn heartbeat: {e}")))?;

        lifecycle.store(RUNNING, Ordering::Release);
        info!(partition = index, "partition running");

        Ok(PartitionHandle {
            index,
            ring_size: cfg.ring_size,
            tx,
            state,
            lifecycle,
            metrics,
            worker: Some(worker),
            heartbeat_stop: Some(heartbeat_stop),
            heartbeat: Some(heartbeat),
            recovery_stats,
        })
    }

    /// Enqueue a command; blocks while the ring is full
    pub(crate) fn enqueue(&self, cmd: P::Command, completion: Option<Completion>) -> Result<()> {
        let lifecycle = self.lifecycle.load(Ordering::Acquire);
        if lifecycle != RUNNING {
            return Err(EngineError::partition_unavailable(
                self.index,
                state_name(lifecycle),
            ));
        }
        self.tx
            .send(PartitionEvent::Command { cmd, completion })
            .map_err(|_| EngineError::partition_unavailable(self.index, "stopped"))?;
        self.metrics
            .ring_remaining
            .set((self.ring_size - self.tx.len()) as f64);
        Ok(())
    }

    /// Read-only access to this partition's state
    pub(crate) fn read_state<R>(&self, f: impl FnOnce(&P::State) -> R) -> R {
        f(&self.state.read())
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }

    /// Drain and stop; idempotent
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        // 1. Stop the heartbeat.
        self.heartbeat_stop = None;
        if let Some(hb) = self.heartbeat.take() {
            let _ = hb.join();
        }

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        // 2..5. The worker runs the rest of the ordered sequence when it
        // sees the Shutdown event; a Failed worker has already exited.
        let _ = self.tx.send(PartitionEvent::Shutdown);
        worker
            .join()
            .map_err(|_| EngineError::internal(format!("partition {} worker panicked", self.index)))
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker<P: Processor> {
    index: usize,
    processor: Arc<P>,
    state: Arc<RwLock<P::State>>,
    filter: IdempotencyFilter,
    wal: WalStore,
    snapshots: SnapshotStore,
    writer: AsyncBatchWriter<P::Entity>,
    lifecycle: Arc<AtomicU8>,
    metrics: PartitionMetrics,
    ring_size: usize,
    snapshot_interval: u64,
    enable_time_snapshot: bool,
    snapshot_time_interval: std::time::Duration,
    last_wal_index: u64,
    last_snapshot_index: u64,
    last_snapshot_time: Instant,
}

enum Step {
    Continue,
    Drain,
    Fail,
}

impl<P: Processor> Worker<P> {
    fn run(&mut self, rx: Receiver<PartitionEvent<P::Command>>) {
        loop {
            let event = match rx.recv() {
                Ok(event) => event,
                Err(_) => {
                    // All senders gone without a Shutdown event: the
                    // handle was dropped. Exit without the drain sequence;
                    // the WAL already holds everything acknowledged.
                    warn!(partition = self.index, "ring disconnected, worker exiting");
                    return;
                }
            };

            // One blocking take, then drain the burst that arrived
            // behind it. The snapshot check runs at the batch boundary.
            let mut burst = 0usize;
            let mut next = Some(event);
            loop {
                let step = match next.take() {
                    Some(PartitionEvent::Command { cmd, completion }) => {
                        self.handle_command(cmd, completion)
                    }
                    Some(PartitionEvent::Heartbeat) => Step::Continue,
                    Some(PartitionEvent::Shutdown) => Step::Drain,
                    None => break,
                };
                match step {
                    Step::Continue => {}
                    Step::Drain => {
                        self.drain_and_stop(&rx);
                        return;
                    }
                    Step::Fail => {
                        self.fail(&rx);
                        return;
                    }
                }
                burst += 1;
                if burst >= self.ring_size {
                    break;
                }
                next = rx.try_recv().ok();
            }

            self.metrics
                .ring_remaining
                .set((self.ring_size - rx.len()) as f64);
            self.maybe_snapshot();
        }
    }

    /// WAL append, then apply. Returns `Fail` only for faults that must
    /// take the partition down.
    fn handle_command(&mut self, cmd: P::Command, completion: Option<Completion>) -> Step {
        let payload = match cmd.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(partition = self.index, tx_id = cmd.tx_id(), error = %e, "command encode failed");
                if let Some(completion) = completion {
                    completion.fail(e);
                }
                return Step::Continue;
            }
        };

        let index = match self.wal.append(cmd.type_key(), &payload) {
            Ok(index) => index,
            Err(e) => {
                // No durability, no ledger. Partition goes down.
                error!(partition = self.index, error = %e, "WAL append failed, failing partition");
                if let Some(completion) = completion {
                    completion.fail(e);
                }
                return Step::Fail;
            }
        };
        self.last_wal_index = index;

        self.apply(cmd, completion, index, false)
    }

    /// Idempotency check, processor, filter add, writer enqueue
    fn apply(
        &mut self,
        cmd: P::Command,
        completion: Option<Completion>,
        wal_index: u64,
        recovery: bool,
    ) -> Step {
        if self.filter.contains(cmd.tx_id()) {
            if let Some(completion) = completion {
                completion.fail(EngineError::duplicate(cmd.tx_id()));
            } else {
                debug!(partition = self.index, tx_id = cmd.tx_id(), "duplicate dropped");
            }
            return Step::Continue;
        }

        let outcome = {
            let mut state = self.state.write();
            catch_unwind(AssertUnwindSafe(|| {
                self.processor.process(&mut state, &cmd)
            }))
        };

        match outcome {
            Ok(Ok(entity)) => {
                self.filter.add(cmd.tx_id());
                if let Some(entity) = entity {
                    if !recovery {
                        // Blocking on a full FIFO is the designed
                        // pressure valve toward a slow sink.
                        if let Err(e) = self.writer.enqueue(entity) {
                            warn!(partition = self.index, error = %e, "entity dropped");
                        }
                        self.metrics
                            .writer_queue_depth
                            .set(self.writer.queue_len() as f64);
                    }
                }
                if let Some(completion) = completion {
                    completion.complete(CommandReceipt {
                        partition: self.index,
                        wal_index,
                    });
                }
                Step::Continue
            }
            Ok(Err(e)) => {
                // Business rejection: no state change, no filter entry,
                // so the same tx ID may be retried.
                let err = match e {
                    already @ EngineError::Processor { .. } => already,
                    other => EngineError::processor(cmd.tx_id(), other.to_string()),
                };
                if let Some(completion) = completion {
                    completion.fail(err);
                } else {
                    debug!(partition = self.index, tx_id = cmd.tx_id(), error = %err, "command rejected");
                }
                Step::Continue
            }
            Err(_panic) => {
                error!(
                    partition = self.index,
                    tx_id = cmd.tx_id(),
                    "processor panicked, failing partition"
                );
                if let Some(completion) = completion {
                    completion.fail(EngineError::internal("processor panicked"));
                }
                Step::Fail
            }
        }
    }

    fn maybe_snapshot(&mut self) {
        let count_due = self.last_wal_index - self.last_snapshot_index >= self.snapshot_interval;
        let time_due = self.enable_time_snapshot
            && self.last_snapshot_time.elapsed() >= self.snapshot_time_interval;
        if count_due || time_due {
            self.take_snapshot();
        }
    }

    /// Serialize `(last_wal_index, state, filter)` and save atomically.
    /// Failure is logged and absorbed: the WAL remains authoritative and
    /// the next trigger retries.
    fn take_snapshot(&mut self) {
        let serialized = {
            let state = self.state.read();
            bincode::serialize(&*state).and_then(|state_bytes| {
                bincode::serialize(&self.filter).map(|filter_bytes| (state_bytes, filter_bytes))
            })
        };
        let (state_bytes, filter_bytes) = match serialized {
            Ok(parts) => parts,
            Err(e) => {
                warn!(partition = self.index, error = %e, "snapshot serialization failed");
                return;
            }
        };

        let snapshot = SnapshotData {
            last_wal_index: self.last_wal_index,
            state: state_bytes,
            filter: filter_bytes,
        };
        match self.snapshots.save(&snapshot) {
            Ok(()) => {
                self.last_snapshot_index = self.last_wal_index;
                self.last_snapshot_time = Instant::now();
                debug!(
                    partition = self.index,
                    last_wal_index = snapshot.last_wal_index,
                    "snapshot taken"
                );
            }
            Err(e) => {
                warn!(partition = self.index, error = %e, "snapshot save failed, continuing");
            }
        }
    }

    /// Ordered stop: drain ring, final snapshot, writer drain, WAL close
    fn drain_and_stop(&mut self, rx: &Receiver<PartitionEvent<P::Command>>) {
        self.lifecycle.store(DRAINING, Ordering::Release);

        while let Ok(event) = rx.try_recv() {
            if let PartitionEvent::Command { cmd, completion } = event {
                match self.handle_command(cmd, completion) {
                    Step::Fail => {
                        self.fail(rx);
                        return;
                    }
                    _ => {}
                }
            }
        }

        if let Err(e) = self.wal.sync() {
            error!(partition = self.index, error = %e, "final WAL sync failed");
        }
        self.take_snapshot();
        self.writer.shutdown();
        if let Err(e) = self.wal.close() {
            error!(partition = self.index, error = %e, "WAL close failed");
        }

        self.lifecycle.store(STOPPED, Ordering::Release);
        info!(partition = self.index, "partition stopped");
    }

    /// Fatal path: reject everything still queued and stop
    fn fail(&mut self, rx: &Receiver<PartitionEvent<P::Command>>) {
        self.lifecycle.store(FAILED, Ordering::Release);

        while let Ok(event) = rx.try_recv() {
            if let PartitionEvent::Command { completion, .. } = event {
                if let Some(completion) = completion {
                    completion.fail(EngineError::partition_unavailable(self.index, "failed"));
                }
            }
        }
        self.writer.shutdown();
        error!(partition = self.index, "partition failed");
    }
}
