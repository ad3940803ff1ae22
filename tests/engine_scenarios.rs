//! End-to-end engine scenarios: submit, duplicate rejection, isolation

mod common;

use atomledger::{EngineBuilder, EngineError, RoutingStrategy};
use common::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn engine_with(
    dir: &TempDir,
    partitions: usize,
    sink: Arc<RecordingSink>,
) -> atomledger::LedgerEngine<WalletProcessor> {
    EngineBuilder::new(test_config(dir.path(), partitions))
        .processor(WalletProcessor)
        .persister(SharedSink(Arc::clone(&sink)))
        .bootstrap(EmptyWallets)
        .codec(registry())
        .build()
        .unwrap()
}

#[test]
fn single_key_credit() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut engine = engine_with(&dir, 4, Arc::clone(&sink));

    let receipt = engine
        .submit(LedgerOp::credit("tx-a", "u1", 100))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(receipt.wal_index, 1);

    let balance = engine.query("u1", |s| s.get("u1").copied()).unwrap();
    assert_eq!(balance, Some(100));

    engine.shutdown().unwrap();
    assert_eq!(sink.count(), 1, "exactly one entity persisted");
    assert_eq!(sink.tx_ids(), vec!["tx-a"]);
}

#[test]
fn duplicate_rejection() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut engine = engine_with(&dir, 4, Arc::clone(&sink));

    engine
        .submit(LedgerOp::credit("tx-a", "u1", 100))
        .unwrap()
        .wait()
        .unwrap();

    let second = engine
        .submit(LedgerOp::credit("tx-a", "u1", 100))
        .unwrap()
        .wait();
    match second {
        Err(EngineError::Duplicate { tx_id }) => assert_eq!(tx_id, "tx-a"),
        other => panic!("expected Duplicate, got {other:?}"),
    }

    let balance = engine.query("u1", |s| s.get("u1").copied()).unwrap();
    assert_eq!(balance, Some(100), "duplicate must not change the balance");

    engine.shutdown().unwrap();
    assert_eq!(sink.count(), 1, "duplicate must not reach the sink");
}

#[test]
fn processor_rejection_is_retryable() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut engine = engine_with(&dir, 2, Arc::clone(&sink));

    // Overdraft rejected, balance untouched.
    let err = engine
        .submit(LedgerOp::debit("tx-1", "u1", 50))
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(err, EngineError::Processor { .. }));

    // Same tx ID succeeds once the business rule is satisfied: a
    // rejection leaves no trace in the idempotency filter.
    engine
        .submit(LedgerOp::credit("tx-0", "u1", 100))
        .unwrap()
        .wait()
        .unwrap();
    engine
        .submit(LedgerOp::debit("tx-1", "u1", 50))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 50);
    engine.shutdown().unwrap();
}

#[test]
fn cross_partition_isolation() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let engine = Arc::new(engine_with(&dir, 4, Arc::clone(&sink)));

    // Fund u2 so the concurrent debits never overdraw.
    engine
        .submit(LedgerOp::credit("seed-u2", "u2", 1_000_000))
        .unwrap()
        .wait()
        .unwrap();

    let mut producers = Vec::new();
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        producers.push(thread::spawn(move || {
            for i in 0..25 {
                engine
                    .submit(LedgerOp::credit(format!("c-{t}-{i}"), "u1", 1))
                    .unwrap()
                    .wait()
                    .unwrap();
                engine
                    .submit(LedgerOp::debit(format!("d-{t}-{i}"), "u2", 1))
                    .unwrap()
                    .wait()
                    .unwrap();
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }

    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 100);
    assert_eq!(engine.query("u2", |s| s["u2"]).unwrap(), 1_000_000 - 100);

    let mut engine = Arc::into_inner(engine).unwrap();
    engine.shutdown().unwrap();
    assert_eq!(sink.count(), 201);
}

#[test]
fn single_partition_serializes_everything() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let engine = Arc::new(engine_with(&dir, 1, Arc::clone(&sink)));

    let mut producers = Vec::new();
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        producers.push(thread::spawn(move || {
            for i in 0..50 {
                engine
                    .submit(LedgerOp::credit(format!("t{t}-{i}"), format!("acct-{i}"), 1))
                    .unwrap()
                    .wait()
                    .unwrap();
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }

    // 200 distinct accounts, all on partition 0.
    let total: i64 = engine
        .query("acct-0", |s| s.values().copied().sum())
        .unwrap();
    assert_eq!(total, 200);

    let mut engine = Arc::into_inner(engine).unwrap();
    engine.shutdown().unwrap();
}

#[test]
fn per_key_ordering_under_concurrency() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let engine = Arc::new(engine_with(&dir, 4, Arc::clone(&sink)));

    // One producer per key submits a strictly increasing sequence;
    // fire-and-forget keeps the partition pipeline full.
    let mut producers = Vec::new();
    for k in 0..4 {
        let engine = Arc::clone(&engine);
        producers.push(thread::spawn(move || {
            for i in 0..100 {
                engine.submit_forget(LedgerOp::credit(
                    format!("k{k}-{i}"),
                    format!("key-{k}"),
                    1,
                ));
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }

    let mut engine = Arc::into_inner(engine).unwrap();
    engine.shutdown().unwrap();

    // Shutdown drained everything; per-key sequences must be in order.
    for k in 0..4 {
        let prefix = format!("k{k}-");
        let seen: Vec<usize> = sink
            .tx_ids()
            .iter()
            .filter_map(|tx| tx.strip_prefix(&prefix).and_then(|n| n.parse().ok()))
            .collect();
        assert_eq!(seen.len(), 100, "key {k} lost commands");
        assert!(
            seen.windows(2).all(|w| w[0] < w[1]),
            "key {k} applied out of order: {seen:?}"
        );
    }
}

#[test]
fn fire_and_forget_duplicates_are_dropped_silently() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut engine = engine_with(&dir, 2, Arc::clone(&sink));

    for _ in 0..5 {
        engine.submit_forget(LedgerOp::credit("same-tx", "u1", 10));
    }
    engine.shutdown().unwrap();

    assert_eq!(sink.count(), 1);
}

#[test]
fn shutdown_is_idempotent_and_rejects_new_submits() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut engine = engine_with(&dir, 2, Arc::clone(&sink));

    engine
        .submit(LedgerOp::credit("tx-1", "u1", 1))
        .unwrap()
        .wait()
        .unwrap();

    engine.shutdown().unwrap();
    engine.shutdown().unwrap();

    assert!(engine.submit(LedgerOp::credit("tx-2", "u1", 1)).is_err());
}

#[test]
fn cross_node_misroute_is_refused() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut cfg = test_config(dir.path(), 2);
    cfg.cluster = atomledger::ClusterConfig {
        total_nodes: 4,
        node_id: 0,
    };
    let mut engine = EngineBuilder::new(cfg)
        .processor(WalletProcessor)
        .persister(SharedSink(Arc::clone(&sink)))
        .bootstrap(EmptyWallets)
        .codec(registry())
        .build()
        .unwrap();

    // With 4 nodes, some keys must belong elsewhere; find one and make
    // sure it bounces with a routing error.
    let foreign = (0..1_000)
        .map(|i| format!("acct-{i}"))
        .find(|key| {
            atomledger::ModuloRouting
                .partition_of(key, 4)
                != 0
        })
        .expect("some key routes to another node");

    match engine.submit(LedgerOp::credit("tx-x", &foreign, 1)) {
        Err(EngineError::Routing { key, local_node, .. }) => {
            assert_eq!(key, foreign);
            assert_eq!(local_node, 0);
        }
        other => panic!("expected Routing error, got {other:?}"),
    }

    engine.shutdown().unwrap();
}

#[test]
fn builder_rejects_missing_collaborators() {
    let dir = TempDir::new().unwrap();
    let err = EngineBuilder::<WalletProcessor>::new(test_config(dir.path(), 1))
        .processor(WalletProcessor)
        .build()
        .unwrap_err();
    assert!(matches!(err, EngineError::Init { .. }));

    let err = EngineBuilder::new(test_config(dir.path(), 1))
        .processor(WalletProcessor)
        .persister(SharedSink(Arc::new(RecordingSink::new())))
        .bootstrap(EmptyWallets)
        .codec(atomledger::CodecRegistry::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, EngineError::Init { .. }), "empty registry");
}

#[test]
fn persister_failures_are_absorbed() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::failing_first(1));
    let mut engine = engine_with(&dir, 1, Arc::clone(&sink));

    // The submit acknowledges even though the first persist attempt
    // fails; the writer retries behind the scenes.
    engine
        .submit(LedgerOp::credit("tx-1", "u1", 5))
        .unwrap()
        .wait()
        .unwrap();

    // Let the retry backoff elapse before shutting down, since shutdown
    // during the backoff legitimately abandons the batch.
    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.count() < 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(sink.count(), 1, "retry must eventually deliver");

    engine.shutdown().unwrap();
}
