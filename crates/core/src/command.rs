//! Command trait and the codec registry
//!
//! Commands are host types; the engine only needs four things from them:
//! a stable transaction ID (identifies the attempt), a stable routing key
//! (identifies the aggregate), a type key, and a byte encoding.
//!
//! The type key is written into every WAL record. During recovery the
//! engine looks the key up in a [`CodecRegistry`] populated by the host at
//! construction time and dispatches to the matching decoder. This replaces
//! runtime class tokens with an explicit registry.
//!
//! ## Example
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Credit { tx: String, account: String, amount: i64 }
//!
//! impl LedgerCommand for Credit {
//!     fn tx_id(&self) -> &str { &self.tx }
//!     fn routing_key(&self) -> &str { &self.account }
//!     fn type_key(&self) -> &'static str { "credit" }
//!     fn encode(&self) -> Result<Vec<u8>> { Ok(bincode::serialize(self)?) }
//! }
//!
//! let registry = CodecRegistry::new()
//!     .with("credit", |bytes| Ok(bincode::deserialize::<Credit>(bytes)?));
//! ```

use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Capability every submitted command must provide
///
/// The routing key and transaction ID are semantically distinct: the key
/// identifies the aggregate (all commands for one aggregate land on one
/// partition, in order), the transaction ID identifies the attempt (the
/// idempotency filter rejects a second application of the same ID).
pub trait LedgerCommand: Send + Sized + 'static {
    /// Unique identifier of this submission attempt, stable across retries
    fn tx_id(&self) -> &str;

    /// Stable identifier of the business aggregate this command targets
    fn routing_key(&self) -> &str;

    /// Tag written into the WAL record so recovery can pick a decoder
    fn type_key(&self) -> &'static str;

    /// Serialize the command for the WAL
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Decoder for one concrete command type
pub type DecodeFn<C> = Arc<dyn Fn(&[u8]) -> Result<C> + Send + Sync>;

/// Registry of WAL decoders, keyed by command type key
///
/// Built by the host before engine construction; consulted during recovery
/// and by the offline WAL inspector. A WAL record whose type key has no
/// registered decoder fails recovery (the log cannot be replayed past it).
pub struct CodecRegistry<C> {
    decoders: HashMap<&'static str, DecodeFn<C>>,
}

impl<C: LedgerCommand> CodecRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        CodecRegistry {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder, builder style
    pub fn with(
        mut self,
        type_key: &'static str,
        decode: impl Fn(&[u8]) -> Result<C> + Send + Sync + 'static,
    ) -> Self {
        self.register(type_key, decode);
        self
    }

    /// Register a decoder for `type_key`, replacing any previous one
    pub fn register(
        &mut self,
        type_key: &'static str,
        decode: impl Fn(&[u8]) -> Result<C> + Send + Sync + 'static,
    ) {
        self.decoders.insert(type_key, Arc::new(decode));
    }

    /// Decode a WAL payload tagged with `type_key`
    pub fn decode(&self, type_key: &str, payload: &[u8]) -> Result<C> {
        match self.decoders.get(type_key) {
            Some(decode) => decode(payload),
            None => Err(EngineError::unknown_type_key(type_key)),
        }
    }

    /// Check whether a decoder exists for `type_key`
    pub fn contains(&self, type_key: &str) -> bool {
        self.decoders.contains_key(type_key)
    }

    /// Number of registered decoders
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// True if no decoder has been registered
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl<C: LedgerCommand> Default for CodecRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
