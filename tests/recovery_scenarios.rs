//! Crash recovery and snapshot policy scenarios
//!
//! A "crash" here is dropping the engine without calling `shutdown`: the
//! worker threads exit without taking a final snapshot, exactly like a
//! killed process, while the WAL (synced on every append) stays behind.

mod common;

use atomledger::{EngineBuilder, EngineError, LedgerEngine};
use common::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn build_engine(
    dir: &TempDir,
    sink: Arc<RecordingSink>,
    tweak: impl FnOnce(&mut atomledger::EngineConfig),
) -> LedgerEngine<WalletProcessor> {
    let mut cfg = test_config(dir.path(), 2);
    tweak(&mut cfg);
    EngineBuilder::new(cfg)
        .processor(WalletProcessor)
        .persister(SharedSink(Arc::clone(&sink)))
        .bootstrap(EmptyWallets)
        .codec(registry())
        .build()
        .unwrap()
}

/// Drop without shutdown, then give detached workers a moment to exit.
fn crash(engine: LedgerEngine<WalletProcessor>) {
    drop(engine);
    thread::sleep(Duration::from_millis(100));
}

#[test]
fn crash_recovery_replays_the_tail() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());

    // 1000 credits with a snapshot forced around the midpoint.
    {
        let engine = build_engine(&dir, Arc::clone(&sink), |cfg| {
            cfg.partitions = 1;
            cfg.snapshot_interval = 500;
        });
        for i in 0..1_000 {
            engine
                .submit(LedgerOp::credit(format!("tx-{i}"), "u1", 1))
                .unwrap()
                .wait()
                .unwrap();
        }
        crash(engine);
    }

    // Restart: snapshot plus WAL tail must reproduce the full balance.
    {
        let sink2 = Arc::new(RecordingSink::new());
        let mut engine = build_engine(&dir, Arc::clone(&sink2), |cfg| {
            cfg.partitions = 1;
            cfg.snapshot_interval = 500;
        });

        let stats = engine.recovery_stats();
        assert_eq!(stats.len(), 1);
        assert!(
            stats[0].snapshot_index >= 500,
            "snapshot should cover at least the first trigger: {stats:?}"
        );
        assert!(
            stats[0].records_replayed <= 500,
            "replay should cover only the tail: {stats:?}"
        );

        assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 1_000);

        // Every original tx ID is known: re-submitting any is a duplicate.
        for probe in ["tx-0", "tx-499", "tx-500", "tx-999"] {
            let err = engine
                .submit(LedgerOp::credit(probe, "u1", 1))
                .unwrap()
                .wait()
                .unwrap_err();
            assert!(err.is_duplicate(), "{probe} must be rejected after recovery");
        }
        assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 1_000);

        // Recovery itself must not re-persist anything.
        assert_eq!(sink2.count(), 0);
        engine.shutdown().unwrap();
    }
}

#[test]
fn recovery_equivalence_with_and_without_snapshot() {
    // The same WAL replayed from a snapshot midpoint and from scratch
    // must agree on the final state.
    let dir_snap = TempDir::new().unwrap();
    let dir_full = TempDir::new().unwrap();
    let ops: Vec<LedgerOp> = (0..300)
        .map(|i| LedgerOp::credit(format!("tx-{i}"), format!("acct-{}", i % 7), 3))
        .collect();

    for (dir, interval) in [(&dir_snap, 100u64), (&dir_full, 1_000_000u64)] {
        let sink = Arc::new(RecordingSink::new());
        let engine = build_engine(dir, sink, |cfg| {
            cfg.partitions = 1;
            cfg.snapshot_interval = interval;
        });
        for op in &ops {
            engine.submit(op.clone()).unwrap().wait().unwrap();
        }
        crash(engine);
    }

    let sink = Arc::new(RecordingSink::new());
    let mut with_snapshot = build_engine(&dir_snap, Arc::clone(&sink), |cfg| cfg.partitions = 1);
    let mut full_replay = build_engine(&dir_full, Arc::clone(&sink), |cfg| cfg.partitions = 1);

    assert!(with_snapshot.recovery_stats()[0].snapshot_index > 0);
    assert_eq!(full_replay.recovery_stats()[0].snapshot_index, 0);

    let a = with_snapshot.query("any", |s| s.clone()).unwrap();
    let b = full_replay.query("any", |s| s.clone()).unwrap();
    assert_eq!(a, b, "snapshot+tail must equal full replay");
    assert_eq!(a.values().sum::<i64>(), 900);

    with_snapshot.shutdown().unwrap();
    full_replay.shutdown().unwrap();
}

#[test]
fn clean_shutdown_leaves_nothing_to_replay() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    {
        let mut engine = build_engine(&dir, Arc::clone(&sink), |cfg| cfg.partitions = 1);
        for i in 0..50 {
            engine
                .submit(LedgerOp::credit(format!("tx-{i}"), "u1", 2))
                .unwrap()
                .wait()
                .unwrap();
        }
        engine.shutdown().unwrap();
    }

    let sink2 = Arc::new(RecordingSink::new());
    let mut engine = build_engine(&dir, sink2, |cfg| cfg.partitions = 1);
    let stats = engine.recovery_stats();
    assert_eq!(
        stats[0].records_replayed, 0,
        "final snapshot covers the whole log: {stats:?}"
    );
    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 100);
    engine.shutdown().unwrap();
}

#[test]
fn snapshot_interval_of_one_still_makes_progress() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut engine = build_engine(&dir, Arc::clone(&sink), |cfg| {
        cfg.partitions = 1;
        cfg.snapshot_interval = 1;
    });

    for i in 0..25 {
        engine
            .submit(LedgerOp::credit(format!("tx-{i}"), "u1", 1))
            .unwrap()
            .wait()
            .unwrap();
    }
    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 25);

    let dump = engine.snapshot_dump(0).unwrap();
    assert!(dump.is_some(), "snapshots must exist with interval 1");
    engine.shutdown().unwrap();
}

#[test]
fn heartbeat_fires_time_snapshot_under_zero_load() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let mut engine = build_engine(&dir, Arc::clone(&sink), |cfg| {
        cfg.partitions = 1;
        cfg.enable_time_snapshot = true;
        cfg.snapshot_time_interval = Duration::from_millis(300);
        cfg.heartbeat_interval = Duration::from_millis(100);
    });

    // No commands at all; the heartbeat alone must produce a snapshot.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut dumped = None;
    while dumped.is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
        dumped = engine.snapshot_dump(0).unwrap();
    }

    let dump = dumped.expect("time-triggered snapshot never appeared");
    assert_eq!(dump.data.last_wal_index, 0);
    engine.shutdown().unwrap();
}

#[test]
fn corrupt_snapshot_degrades_to_full_replay() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    {
        let mut engine = build_engine(&dir, Arc::clone(&sink), |cfg| {
            cfg.partitions = 1;
            cfg.snapshot_interval = 10;
        });
        for i in 0..40 {
            engine
                .submit(LedgerOp::credit(format!("tx-{i}"), "u1", 1))
                .unwrap()
                .wait()
                .unwrap();
        }
        engine.shutdown().unwrap();
    }

    // Vandalize the snapshot; the WAL is intact.
    let snap_path = test_config(dir.path(), 1)
        .snapshot_dir(0)
        .join("snapshot.dat");
    let mut bytes = std::fs::read(&snap_path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    std::fs::write(&snap_path, bytes).unwrap();

    let sink2 = Arc::new(RecordingSink::new());
    let mut engine = build_engine(&dir, sink2, |cfg| cfg.partitions = 1);
    let stats = engine.recovery_stats();
    assert_eq!(stats[0].snapshot_index, 0, "corrupt snapshot ignored");
    assert_eq!(stats[0].records_replayed, 40, "full replay");
    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 40);
    engine.shutdown().unwrap();
}

#[test]
fn rejected_commands_reject_again_on_replay() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    {
        let engine = build_engine(&dir, Arc::clone(&sink), |cfg| cfg.partitions = 1);
        engine
            .submit(LedgerOp::credit("tx-good", "u1", 10))
            .unwrap()
            .wait()
            .unwrap();
        // Overdraft occupies a WAL record despite being rejected.
        let err = engine
            .submit(LedgerOp::debit("tx-bad", "u1", 999))
            .unwrap()
            .wait()
            .unwrap_err();
        assert!(matches!(err, EngineError::Processor { .. }));
        crash(engine);
    }

    let sink2 = Arc::new(RecordingSink::new());
    let mut engine = build_engine(&dir, sink2, |cfg| cfg.partitions = 1);
    let stats = engine.recovery_stats();
    assert_eq!(stats[0].records_replayed, 2, "rejected record is replayed");
    assert_eq!(stats[0].rejected_replays, 1, "and rejected again");
    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 10);

    // The rejected tx ID is still usable, exactly as before the crash.
    engine
        .submit(LedgerOp::debit("tx-bad", "u1", 5))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 5);
    engine.shutdown().unwrap();
}

#[test]
fn bloom_filter_survives_recovery() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let bloom = |cfg: &mut atomledger::EngineConfig| {
        cfg.partitions = 1;
        cfg.idempotency = atomledger::FilterConfig::Bloom {
            expected_items: 10_000,
            false_positive_rate: 0.01,
        };
        cfg.snapshot_interval = 100;
    };

    {
        let engine = build_engine(&dir, Arc::clone(&sink), bloom);
        for i in 0..300 {
            engine
                .submit(LedgerOp::credit(format!("tx-{i}"), "u1", 1))
                .unwrap()
                .wait()
                .unwrap();
        }
        crash(engine);
    }

    let sink2 = Arc::new(RecordingSink::new());
    let mut engine = build_engine(&dir, sink2, bloom);
    assert_eq!(engine.query("u1", |s| s["u1"]).unwrap(), 300);
    let err = engine
        .submit(LedgerOp::credit("tx-0", "u1", 1))
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(err.is_duplicate());
    engine.shutdown().unwrap();
}
