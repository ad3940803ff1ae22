//! Atomledger execution engine
//!
//! The router-over-partitions core: routing strategies, idempotency
//! filters, the async batch writer, the single-writer partition worker,
//! recovery, and the builder that wires host collaborators into a running
//! [`LedgerEngine`].
//!
//! ## Data flow
//!
//! ```text
//! submit -> route(key) -> partition ring -> WAL append -> filter check
//!        -> processor -> filter add -> async writer -> completion
//! ```
//!
//! Each partition is fully independent: its own ring, WAL directory,
//! snapshot file, state, filter, and persistence FIFO. Ordering holds per
//! routing key; nothing is ordered across partitions.

pub mod admin;
pub mod builder;
pub mod filter;
mod metrics;
mod partition;
pub mod recovery;
pub mod router;
pub mod routing;
mod writer;

pub use builder::EngineBuilder;
pub use filter::{BloomFilter, IdempotencyFilter, LruFilter};
pub use recovery::RecoveryStats;
pub use router::LedgerEngine;
pub use routing::{strategy_for, ModuloRouting, RendezvousRouting, RoutingStrategy};
