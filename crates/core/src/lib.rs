//! Core types for the atomledger engine
//!
//! This crate holds everything the other layers agree on: the unified
//! error type, the configuration, the host-facing capability traits
//! (processor, persister, bootstrap), the command trait with its codec
//! registry, and the one-shot completion handle.
//!
//! Nothing here performs I/O; the durability and engine crates build on
//! these definitions.

pub mod command;
pub mod completion;
pub mod config;
pub mod error;
pub mod traits;

pub use command::{CodecRegistry, DecodeFn, LedgerCommand};
pub use completion::{completion_pair, CommandReceipt, Completion, CompletionHandle};
pub use config::{
    ClusterConfig, EngineConfig, FilterConfig, RoutingKind, SyncPolicy, WalConfig,
};
pub use error::{EngineError, Result};
pub use traits::{Bootstrap, Persister, Processor};
