//! Atomledger: an embeddable transactional ledger engine
//!
//! Clients submit business commands; the engine routes each one to a
//! single-writer partition, appends it to a memory-mapped write-ahead
//! log, applies it to in-memory state behind an idempotency filter, and
//! streams the resulting entities to a host-supplied persistence sink
//! with batching and backpressure. Snapshots bound recovery time; after
//! a crash each partition reloads its snapshot and replays the WAL tail.
//!
//! ## Guarantees
//!
//! - Commands with the same routing key are applied in submission order
//! - An acknowledged command survives a process crash
//! - A transaction ID is applied at most once per engine lifetime
//!   (a Bloom filter may strengthen this to "possibly zero" at the
//!   configured false-positive rate)
//!
//! ## Assembling an engine
//!
//! ```ignore
//! use atomledger::{CodecRegistry, EngineBuilder, EngineConfig};
//!
//! let registry = CodecRegistry::new()
//!     .with("credit", |bytes| Ok(bincode::deserialize(bytes)?));
//!
//! let mut engine = EngineBuilder::new(EngineConfig::new("/var/lib/ledger", "wallet"))
//!     .processor(WalletProcessor)
//!     .persister(SqlPersister::connect(url)?)
//!     .bootstrap(EmptyWallets)
//!     .codec(registry)
//!     .build()?;
//!
//! let receipt = engine.submit(credit)?.wait()?;
//! engine.shutdown()?;
//! ```

pub use atomledger_core::{
    completion_pair, Bootstrap, ClusterConfig, CodecRegistry, CommandReceipt, Completion,
    CompletionHandle, EngineConfig, EngineError, FilterConfig, LedgerCommand, Persister, Processor,
    Result, RoutingKind, SyncPolicy, WalConfig,
};
pub use atomledger_durability::{
    snapshot_dump, SnapshotData, SnapshotDump, SnapshotStore, WalPage, WalReader, WalRecord,
    WalStore,
};
pub use atomledger_engine::{
    admin, BloomFilter, EngineBuilder, IdempotencyFilter, LedgerEngine, LruFilter, ModuloRouting,
    RecoveryStats, RendezvousRouting, RoutingStrategy,
};
