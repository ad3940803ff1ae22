//! Routing strategies
//!
//! A strategy is a pure function `(key, n) -> index in [0, n)`. The router
//! uses one for intra-node partition selection and, when the engine is
//! part of a multi-node deployment, the same function over `total_nodes`
//! for the cross-node ownership self-check.
//!
//! Two built-in variants:
//!
//! - [`ModuloRouting`]: `(xxh32(key) & 0x7fff_ffff) % n`. Fast; a change
//!   of `n` remaps almost every key.
//! - [`RendezvousRouting`]: highest random weight. Each candidate index is
//!   scored with a seeded 64-bit hash and the best score wins, so growing
//!   `n` by one moves only ~`1/(n+1)` of the keys.

use atomledger_core::config::RoutingKind;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64_with_seed;
use xxhash_rust::xxh32::xxh32;

/// Pure, stateless key-to-index mapping
pub trait RoutingStrategy: Send + Sync + 'static {
    /// Map `key` to an index in `[0, n)`; `n` is at least 1
    fn partition_of(&self, key: &str, n: usize) -> usize;

    /// Strategy name, for logs and diagnostics
    fn name(&self) -> &'static str;
}

/// Hash-modulo routing
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuloRouting;

impl RoutingStrategy for ModuloRouting {
    fn partition_of(&self, key: &str, n: usize) -> usize {
        let h = xxh32(key.as_bytes(), 0) & 0x7fff_ffff;
        (h as usize) % n
    }

    fn name(&self) -> &'static str {
        "modulo"
    }
}

/// Highest-random-weight (rendezvous) routing
#[derive(Debug, Default, Clone, Copy)]
pub struct RendezvousRouting;

impl RoutingStrategy for RendezvousRouting {
    fn partition_of(&self, key: &str, n: usize) -> usize {
        let bytes = key.as_bytes();
        let mut best = 0usize;
        let mut best_weight = xxh3_64_with_seed(bytes, 0);
        for i in 1..n {
            let weight = xxh3_64_with_seed(bytes, i as u64);
            // Strict comparison breaks ties toward the lowest index.
            if weight > best_weight {
                best = i;
                best_weight = weight;
            }
        }
        best
    }

    fn name(&self) -> &'static str {
        "rendezvous"
    }
}

/// Built-in strategy for a configuration value
pub fn strategy_for(kind: RoutingKind) -> Arc<dyn RoutingStrategy> {
    match kind {
        RoutingKind::Modulo => Arc::new(ModuloRouting),
        RoutingKind::Rendezvous => Arc::new(RendezvousRouting),
    }
}
