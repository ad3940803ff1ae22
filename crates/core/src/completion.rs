//! One-shot command completion
//!
//! A submitted command carries an optional completion: a single-assignment
//! cell the partition worker fills exactly once, with either a receipt or
//! an error. The submitter holds the other end and may wait on it, poll
//! it, or drop it; dropping the consumer never blocks or leaks the
//! producer side.
//!
//! Built on a bounded(1) channel: `Completion::complete`/`fail` consume
//! self, so the type system enforces single assignment.

use crate::error::{EngineError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Success value delivered for an applied command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReceipt {
    /// Partition the command was applied on
    pub partition: usize,
    /// WAL index the command occupies
    pub wal_index: u64,
}

/// Producer side, owned by the partition worker
pub struct Completion {
    tx: Sender<Result<CommandReceipt>>,
}

/// Consumer side, returned to the submitter
#[derive(Debug)]
pub struct CompletionHandle {
    rx: Receiver<Result<CommandReceipt>>,
}

/// Create a connected completion pair
pub fn completion_pair() -> (Completion, CompletionHandle) {
    let (tx, rx) = bounded(1);
    (Completion { tx }, CompletionHandle { rx })
}

impl Completion {
    /// Complete with a receipt
    ///
    /// A dropped consumer is fine; the value is discarded.
    pub fn complete(self, receipt: CommandReceipt) {
        let _ = self.tx.send(Ok(receipt));
    }

    /// Complete exceptionally
    pub fn fail(self, err: EngineError) {
        let _ = self.tx.send(Err(err));
    }
}

impl CompletionHandle {
    /// Block until the command completes
    ///
    /// Returns `Internal` if the engine dropped the command without
    /// completing it (worker death before the command was reached).
    pub fn wait(self) -> Result<CommandReceipt> {
        match self.rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::internal(
                "command dropped before completion",
            )),
        }
    }

    /// Block with a timeout
    ///
    /// `Ok(None)` means the timeout elapsed; the command may still
    /// complete later and the handle remains usable.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<CommandReceipt>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(receipt)) => Ok(Some(receipt)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::internal(
                "command dropped before completion",
            )),
        }
    }

    /// Non-blocking poll
    pub fn try_wait(&self) -> Result<Option<CommandReceipt>> {
        match self.rx.try_recv() {
            Ok(Ok(receipt)) => Ok(Some(receipt)),
            Ok(Err(e)) => Err(e),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EngineError::internal(
                "command dropped before completion",
            )),
        }
    }
}
