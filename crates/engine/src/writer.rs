//! Asynchronous batch writer
//!
//! Decouples the in-memory application path from the high-latency
//! persistence sink. Each partition owns one writer: a bounded FIFO plus
//! a dedicated worker thread that drains it in batches and calls the
//! host's [`Persister`].
//!
//! ## Backpressure
//!
//! [`AsyncBatchWriter::enqueue`] blocks when the FIFO is full. The caller
//! is the single partition worker, so a slow sink deliberately stalls the
//! whole partition instead of growing memory without bound. Queue
//! fullness is flow control, not an error.
//!
//! ## Delivery
//!
//! The worker takes one entity (with a poll timeout so it can observe
//! shutdown), then opportunistically drains up to `batch_size - 1` more
//! without blocking, and hands the batch to `persist`. A failed persist
//! is logged and retried after a fixed backoff, same batch, forever:
//! at-least-once delivery into a sink that must be idempotent per
//! business key. If shutdown arrives while the writer is backing off
//! between retries, the remaining batch is abandoned; the WAL stays the
//! authoritative record.

use crate::metrics::PartitionMetrics;
use atomledger_core::error::{EngineError, Result};
use atomledger_core::traits::Persister;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How long the worker waits on an empty FIFO before re-checking shutdown
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Backoff between retries of a failed persist
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Bounded FIFO plus drain thread in front of a persistence sink
pub(crate) struct AsyncBatchWriter<E: Send + 'static> {
    tx: Option<Sender<E>>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl<E: Send + 'static> AsyncBatchWriter<E> {
    /// Spawn the drain thread
    pub(crate) fn spawn<P>(
        engine: &str,
        partition: usize,
        queue_size: usize,
        batch_size: usize,
        persister: Arc<P>,
        metrics: PartitionMetrics,
    ) -> Result<Self>
    where
        P: Persister<Entity = E> + ?Sized,
    {
        let (tx, rx) = bounded(queue_size);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let worker = thread::Builder::new()
            .name(format!("{engine}-p{partition}-writer"))
            .spawn(move || {
                drain_loop(rx, batch_size, persister, shutdown_flag, metrics);
            })
            .map_err(|e| EngineError::init(format!("failed to spawn writer thread: {e}")))?;

        Ok(AsyncBatchWriter {
            tx: Some(tx),
            worker: Some(worker),
            shutdown,
        })
    }

    /// Hand an entity to the writer; blocks while the FIFO is full
    pub(crate) fn enqueue(&self, entity: E) -> Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(entity)
                .map_err(|_| EngineError::internal("async writer is gone")),
            None => Err(EngineError::internal("async writer already shut down")),
        }
    }

    /// Entities currently queued
    pub(crate) fn queue_len(&self) -> usize {
        self.tx.as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    /// Stop the worker after draining the FIFO (best effort under a
    /// persistently failing sink)
    pub(crate) fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Dropping the sender lets the worker drain to Disconnected.
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("async writer thread panicked");
            }
        }
    }
}

impl<E: Send + 'static> Drop for AsyncBatchWriter<E> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

fn drain_loop<E, P>(
    rx: Receiver<E>,
    batch_size: usize,
    persister: Arc<P>,
    shutdown: Arc<AtomicBool>,
    metrics: PartitionMetrics,
) where
    E: Send + 'static,
    P: Persister<Entity = E> + ?Sized,
{
    loop {
        let first = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(entity) => entity,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(entity) => batch.push(entity),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        metrics.writer_queue_depth.set(rx.len() as f64);

        if !deliver(&batch, persister.as_ref(), &shutdown, &metrics) {
            warn!(abandoned = batch.len(), "writer gave up on batch during shutdown");
            break;
        }
    }
    metrics.writer_queue_depth.set(rx.len() as f64);
    debug!("async writer drained and stopped");
}

/// Deliver one batch with infinite retry; false means shutdown won
fn deliver<E, P>(
    batch: &[E],
    persister: &P,
    shutdown: &AtomicBool,
    metrics: &PartitionMetrics,
) -> bool
where
    P: Persister<Entity = E> + ?Sized,
{
    loop {
        let started = Instant::now();
        match persister.persist(batch) {
            Ok(()) => {
                metrics
                    .persist_batch_seconds
                    .record(started.elapsed().as_secs_f64());
                return true;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    batch = batch.len(),
                    backoff_ms = RETRY_BACKOFF.as_millis() as u64,
                    "persist failed, will retry same batch"
                );
                thread::sleep(RETRY_BACKOFF);
                if shutdown.load(Ordering::Acquire) {
                    return false;
                }
            }
        }
    }
}
