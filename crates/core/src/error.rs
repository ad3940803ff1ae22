//! Error types for the ledger engine
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Categories
//!
//! - **Rejections**: the submitter did something the engine refuses
//!   (`Routing`, `Duplicate`, `Processor`) - non-fatal, reported per command
//! - **Absorbed**: failures the engine retries internally (`Persist`)
//! - **Degraded**: failures the partition survives (`Snapshot` save errors)
//! - **Fatal**: failures that take a partition down (`Wal`, `Corruption`,
//!   `Recovery`)
//!
//! ## Usage
//!
//! ```ignore
//! match handle.wait() {
//!     Err(e) if e.is_duplicate() => { /* already applied, safe to ignore */ }
//!     Err(e) if e.is_rejection() => { /* bad command, report to caller */ }
//!     Err(e) => { /* engine-side failure */ }
//!     Ok(receipt) => println!("applied at WAL index {}", receipt.wal_index),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Unified error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad configuration or missing collaborator at construction time
    #[error("initialization error: {message}")]
    Init {
        /// What is wrong with the setup
        message: String,
    },

    /// The routing key belongs to a different node of the cluster
    ///
    /// Raised only when `cluster.total_nodes > 1` and the ownership
    /// self-check fails. The external router sent the command to the
    /// wrong node; the submit is refused before anything is enqueued.
    #[error("key {key:?} routes to node {owner_node}, local node is {local_node}")]
    Routing {
        /// The offending routing key
        key: String,
        /// Node that owns the key per the routing strategy
        owner_node: u32,
        /// This node's identity
        local_node: u32,
    },

    /// The transaction ID was already applied on this partition
    ///
    /// With the Bloom filter variant this may be a false positive; the
    /// configured false-positive rate bounds how often a genuinely new
    /// command is refused.
    #[error("duplicate transaction: {tx_id}")]
    Duplicate {
        /// Transaction ID the idempotency filter matched
        tx_id: String,
    },

    /// User code rejected the command during `process`
    ///
    /// The WAL record for the command exists (append happens first), but
    /// neither the state nor the idempotency filter was touched, so the
    /// same transaction ID may be retried.
    #[error("processor rejected command {tx_id}: {message}")]
    Processor {
        /// Transaction ID of the rejected command
        tx_id: String,
        /// The processor's reason
        message: String,
    },

    /// User code failed during `persist`
    ///
    /// Never surfaced to submitters; the async writer absorbs this with
    /// infinite retry. Visible in logs and metrics only.
    #[error("persist failed: {message}")]
    Persist {
        /// The persister's reason
        message: String,
    },

    /// WAL append or sync failed
    ///
    /// Fatal to the owning partition: a ledger that cannot write its log
    /// must stop accepting commands.
    #[error("WAL write failed: {message}")]
    Wal {
        /// What failed
        message: String,
    },

    /// Snapshot save or load I/O failed
    ///
    /// Non-fatal on save (the WAL remains authoritative and the next
    /// trigger retries); load failures degrade to a full WAL replay.
    #[error("snapshot I/O failed: {message}")]
    Snapshot {
        /// What failed
        message: String,
    },

    /// Recovery could not reconstruct a partition
    ///
    /// A partition that cannot finish replay must not serve traffic, so
    /// this fails the engine start.
    #[error("recovery failed: {message}")]
    Recovery {
        /// What broke during replay
        message: String,
    },

    /// Data integrity check failed (CRC mismatch, bad framing)
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption, including the file offset
        message: String,
    },

    /// Encoding or decoding of a command, state, or filter failed
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// No decoder registered for a WAL record's type key
    #[error("unknown command type key: {type_key}")]
    UnknownTypeKey {
        /// The unrecognized type key
        type_key: String,
    },

    /// The target partition is not accepting commands
    #[error("partition {partition} unavailable ({state})")]
    PartitionUnavailable {
        /// Partition index
        partition: usize,
        /// Lifecycle state the partition is in
        state: &'static str,
    },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected internal state; indicates a bug
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl EngineError {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create an Init error
    pub fn init(message: impl Into<String>) -> Self {
        EngineError::Init {
            message: message.into(),
        }
    }

    /// Create a Routing error
    pub fn routing(key: impl Into<String>, owner_node: u32, local_node: u32) -> Self {
        EngineError::Routing {
            key: key.into(),
            owner_node,
            local_node,
        }
    }

    /// Create a Duplicate error
    pub fn duplicate(tx_id: impl Into<String>) -> Self {
        EngineError::Duplicate {
            tx_id: tx_id.into(),
        }
    }

    /// Create a Processor error
    pub fn processor(tx_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Processor {
            tx_id: tx_id.into(),
            message: message.into(),
        }
    }

    /// Create a Persist error
    pub fn persist(message: impl Into<String>) -> Self {
        EngineError::Persist {
            message: message.into(),
        }
    }

    /// Create a Wal error
    pub fn wal(message: impl Into<String>) -> Self {
        EngineError::Wal {
            message: message.into(),
        }
    }

    /// Create a Snapshot error
    pub fn snapshot(message: impl Into<String>) -> Self {
        EngineError::Snapshot {
            message: message.into(),
        }
    }

    /// Create a Recovery error
    pub fn recovery(message: impl Into<String>) -> Self {
        EngineError::Recovery {
            message: message.into(),
        }
    }

    /// Create a Corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        EngineError::Corruption {
            message: message.into(),
        }
    }

    /// Create a Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        EngineError::Serialization {
            message: message.into(),
        }
    }

    /// Create an UnknownTypeKey error
    pub fn unknown_type_key(type_key: impl Into<String>) -> Self {
        EngineError::UnknownTypeKey {
            type_key: type_key.into(),
        }
    }

    /// Create a PartitionUnavailable error
    pub fn partition_unavailable(partition: usize, state: &'static str) -> Self {
        EngineError::PartitionUnavailable { partition, state }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Per-command rejection delivered to the submitter; the engine is healthy
    ///
    /// Returns true for: `Routing`, `Duplicate`, `Processor`.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::Routing { .. }
                | EngineError::Duplicate { .. }
                | EngineError::Processor { .. }
        )
    }

    /// Check if this is a duplicate rejection
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EngineError::Duplicate { .. })
    }

    /// Failure that takes a partition down or blocks its start
    ///
    /// Returns true for: `Wal`, `Corruption`, `Recovery`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Wal { .. } | EngineError::Corruption { .. } | EngineError::Recovery { .. }
        )
    }

    /// Failure the async writer retries until it succeeds
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Persist { .. })
    }
}

impl From<bincode::Error> for EngineError {
    fn from(e: bincode::Error) -> Self {
        EngineError::Serialization {
            message: e.to_string(),
        }
    }
}
