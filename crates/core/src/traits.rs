//! Host-supplied capabilities
//!
//! An engine is assembled from three host implementations plus the codec
//! registry: the [`Processor`] applies commands to in-memory state, the
//! [`Persister`] writes incremental entities to the system of record, and
//! the [`Bootstrap`] produces the initial state on cold start.
//!
//! The partition worker calls `process` with exclusive access to the
//! state; nothing else observes the state between two applications on the
//! same partition.

use crate::command::LedgerCommand;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Applies one command to partition state
///
/// Must be pure with respect to everything except `state`: no I/O, no
/// sleeping, no locks. It runs on the partition's hot path and again,
/// record by record, during recovery; a `process` that touches the
/// outside world breaks recovery equivalence.
///
/// Returning `Err` rejects the command: the state and the idempotency
/// filter are left untouched and the submitter sees the error through the
/// completion handle. Returning `Ok(Some(entity))` hands the entity to
/// the async writer for persistence.
pub trait Processor: Send + Sync + 'static {
    /// In-memory state of one partition, serializable as a whole
    type State: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Command type this processor accepts
    type Command: LedgerCommand;
    /// Persistable delta produced by an applied command
    type Entity: Send + 'static;

    /// Apply `cmd` to `state`, optionally producing a persistable entity
    fn process(&self, state: &mut Self::State, cmd: &Self::Command) -> Result<Option<Self::Entity>>;
}

/// Writes batches of entities to the external system of record
///
/// May perform I/O and may fail; the async writer retries a failed batch
/// indefinitely, so the sink must tolerate the same batch arriving more
/// than once (idempotent per business key).
pub trait Persister: Send + Sync + 'static {
    /// Entity type accepted by the sink
    type Entity: Send + 'static;

    /// Persist one batch; `Err` triggers a retry of the same batch
    fn persist(&self, batch: &[Self::Entity]) -> Result<()>;
}

/// Produces the initial state for a partition with no snapshot and no WAL
pub trait Bootstrap: Send + Sync + 'static {
    /// Same state type as the engine's processor
    type State;

    /// Called once per partition, on cold start only
    fn initial_state(&self) -> Self::State;
}
