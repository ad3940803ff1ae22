//! Shared fixtures for the integration tests
//!
//! A small wallet domain: credit/debit commands over per-account `i64`
//! balances, a recording persister with failure and latency knobs, and a
//! config helper pointed at a temp directory.

use atomledger::{
    Bootstrap, CodecRegistry, EngineConfig, EngineError, FilterConfig, LedgerCommand, Persister,
    Processor, Result, SyncPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub type Balances = HashMap<String, i64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerOp {
    pub tx: String,
    pub account: String,
    /// Positive credits, negative debits, in minimum units
    pub amount: i64,
}

impl LedgerOp {
    pub fn credit(tx: impl Into<String>, account: impl Into<String>, amount: i64) -> Self {
        LedgerOp {
            tx: tx.into(),
            account: account.into(),
            amount,
        }
    }

    pub fn debit(tx: impl Into<String>, account: impl Into<String>, amount: i64) -> Self {
        Self::credit(tx, account, -amount)
    }
}

impl LedgerCommand for LedgerOp {
    fn tx_id(&self) -> &str {
        &self.tx
    }
    fn routing_key(&self) -> &str {
        &self.account
    }
    fn type_key(&self) -> &'static str {
        "ledger-op"
    }
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

pub fn registry() -> CodecRegistry<LedgerOp> {
    CodecRegistry::new().with("ledger-op", |bytes| Ok(bincode::deserialize(bytes)?))
}

/// Applies ops to balances; rejects zero amounts and overdrafts
pub struct WalletProcessor;

impl Processor for WalletProcessor {
    type State = Balances;
    type Command = LedgerOp;
    type Entity = LedgerOp;

    fn process(&self, state: &mut Balances, cmd: &LedgerOp) -> Result<Option<LedgerOp>> {
        if cmd.amount == 0 {
            return Err(EngineError::processor(&cmd.tx, "zero amount"));
        }
        let balance = state.entry(cmd.account.clone()).or_insert(0);
        if *balance + cmd.amount < 0 {
            return Err(EngineError::processor(&cmd.tx, "insufficient funds"));
        }
        *balance += cmd.amount;
        Ok(Some(cmd.clone()))
    }
}

pub struct EmptyWallets;

impl Bootstrap for EmptyWallets {
    type State = Balances;
    fn initial_state(&self) -> Balances {
        HashMap::new()
    }
}

/// Records every persisted entity; can inject latency and failures
pub struct RecordingSink {
    entities: Mutex<Vec<LedgerOp>>,
    fail_first: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink {
            entities: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        RecordingSink {
            entities: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn failing_first(times: usize) -> Self {
        RecordingSink {
            entities: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(times),
            delay: None,
        }
    }

    pub fn count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn tx_ids(&self) -> Vec<String> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.tx.clone())
            .collect()
    }
}

/// Shares the recording across the engine and the test body
pub struct SharedSink(pub std::sync::Arc<RecordingSink>);

impl Persister for SharedSink {
    type Entity = LedgerOp;

    fn persist(&self, batch: &[LedgerOp]) -> Result<()> {
        if let Some(delay) = self.0.delay {
            std::thread::sleep(delay);
        }
        loop {
            let remaining = self.0.fail_first.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if self
                .0
                .fail_first
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(EngineError::persist("induced sink failure"));
            }
        }
        self.0
            .entities
            .lock()
            .unwrap()
            .extend_from_slice(batch);
        Ok(())
    }
}

/// Install a subscriber once so engine logs show up under --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::INFO)
        .with_test_writer()
        .try_init();
}

/// Fast-test configuration rooted at `dir`
pub fn test_config(dir: &Path, partitions: usize) -> EngineConfig {
    init_tracing();
    let mut cfg = EngineConfig::new(dir, "testledger");
    cfg.partitions = partitions;
    cfg.ring_size = 256;
    cfg.queue_size = 256;
    cfg.batch_size = 16;
    cfg.snapshot_interval = 10_000;
    cfg.heartbeat_interval = Duration::from_millis(200);
    cfg.idempotency = FilterConfig::Lru { capacity: 10_000 };
    cfg.wal.segment_size = 64 * 1024;
    cfg.wal.sync = SyncPolicy::Always;
    cfg
}
