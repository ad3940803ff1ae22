//! Administrative helpers
//!
//! Glue between the untyped WAL inspector and the host's command types:
//! predicates that decode each record through the codec registry and
//! match on the fields operators actually search by.
//!
//! ```ignore
//! let reader = engine.wal_reader(0)?;
//! let page = reader.page_forward(0, 50, Some(&admin::tx_id_is(&registry, "tx-42")))?;
//! ```

use atomledger_core::command::{CodecRegistry, LedgerCommand};
use atomledger_durability::record::WalRecord;

/// Predicate matching records whose command carries `tx_id`
///
/// Records that fail to decode are excluded rather than erroring; an
/// operator paging a log with a half-registered codec set still sees the
/// records that do decode.
pub fn tx_id_is<'a, C: LedgerCommand>(
    registry: &'a CodecRegistry<C>,
    tx_id: &'a str,
) -> impl Fn(&WalRecord) -> bool + 'a {
    move |record| {
        registry
            .decode(&record.type_key, &record.payload)
            .map(|cmd| cmd.tx_id() == tx_id)
            .unwrap_or(false)
    }
}

/// Predicate matching records whose command carries `routing_key`
pub fn routing_key_is<'a, C: LedgerCommand>(
    registry: &'a CodecRegistry<C>,
    routing_key: &'a str,
) -> impl Fn(&WalRecord) -> bool + 'a {
    move |record| {
        registry
            .decode(&record.type_key, &record.payload)
            .map(|cmd| cmd.routing_key() == routing_key)
            .unwrap_or(false)
    }
}
