//! Concurrency scenarios for the transactional core
//!
//! Each test drives full clients over an in-process coordinator, usually
//! from many threads at once, and asserts the cross-cluster invariants:
//! per-ref version chains only ever extend, multi-ref commits are
//! all-or-nothing, and readers never observe values newer than their read
//! point.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dstm::{
    ContainerMode, Coordinator, CoordinatorContainer, Error, MemoryCoordinator, StateContainer,
    StmClient, StmConfig, TRef,
};
use dstm_concurrency::{DistributedRwLock, TxnRuntime};
use dstm_core::paths;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_config() -> StmConfig {
    // Generous deadline so heavily contended tests never trip it.
    StmConfig::default().with_transaction_timeout_ms(60_000)
}

fn connect(service: &MemoryCoordinator, config: StmConfig) -> StmClient {
    let coord: Arc<dyn Coordinator> = Arc::new(service.session());
    StmClient::connect(coord, config).unwrap()
}

fn test_client() -> StmClient {
    init_tracing();
    connect(&MemoryCoordinator::new(), test_config())
}

// === Scenario 1: counter + log invariant ===

#[test]
fn counter_and_log_stay_coupled_under_contention() {
    let client = test_client();
    let counter = client.stm_ref("c", Some(0i64)).unwrap();
    let log = client.stm_ref("d", Some(Vec::<i64>::new())).unwrap();

    let threads: Vec<_> = (0..25)
        .map(|_| {
            let client = client.clone();
            let counter = counter.clone();
            let log = log.clone();
            thread::spawn(move || {
                client
                    .transact(|tx| {
                        let n = counter.alter(tx, |v| v + 1)?;
                        log.alter(tx, |mut entries| {
                            entries.push(n);
                            entries
                        })?;
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(counter.read().unwrap(), 25);
    let mut entries = log.read().unwrap();
    assert_eq!(entries.len(), 25);
    entries.sort_unstable();
    assert_eq!(entries, (1..=25).collect::<Vec<i64>>());
}

// === Scenario 2: two-ref coupled increment ===

#[test]
fn coupled_increments_commit_atomically() {
    let client = test_client();
    let a = client.stm_ref("a", Some(0i64)).unwrap();
    let b = client.stm_ref("b", Some(0i64)).unwrap();

    let threads: Vec<_> = (0..6)
        .map(|_| {
            let client = client.clone();
            let a = a.clone();
            let b = b.clone();
            thread::spawn(move || {
                client
                    .transact(|tx| {
                        a.alter(tx, |v| v + 1)?;
                        b.alter(tx, |v| v + 1)?;
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(a.read().unwrap(), 6);
    assert_eq!(b.read().unwrap(), 6);
}

// === Scenario 3: cross-ref derived value ===

#[test]
fn derived_value_sees_in_transaction_writes() {
    let client = test_client();
    let a = client.stm_ref("a", Some(1i64)).unwrap();
    let b = client.stm_ref("b", Some(10i64)).unwrap();

    let k = 3;
    for _ in 0..k {
        client
            .transact(|tx| {
                a.alter(tx, |v| v + 1)?;
                let sum = a.get(tx)? + b.get(tx)?;
                b.set(tx, sum)?;
                Ok(())
            })
            .unwrap();
    }

    // a = 1 + k; b = 10 + sum_{i=1..k} (1 + i)
    assert_eq!(a.read().unwrap(), 1 + k);
    let expected_b = 10 + (1..=k).map(|i| 1 + i).sum::<i64>();
    assert_eq!(b.read().unwrap(), expected_b);
}

#[test]
fn version_chains_strictly_increase() {
    let client = test_client();
    let r = client.stm_ref("chained", Some(0i64)).unwrap();
    for i in 1..=5i64 {
        client
            .transact(|tx| {
                r.set(tx, i)?;
                Ok(())
            })
            .unwrap();
    }

    let container = CoordinatorContainer::new(
        client.coordinator(),
        r.path(),
        client.config().history_retention,
    );
    let versions = container.versions().unwrap();
    assert!(!versions.is_empty());
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
}

// === Scenario 4: validator rejection ===

#[test]
fn validator_rejection_aborts_and_preserves_value() {
    let client = test_client();
    let r = client.stm_ref("guarded", Some(0i64)).unwrap();
    r.set_validator(|v| *v >= 0);

    let result = client.transact(|tx| {
        r.set(tx, -1)?;
        Ok(())
    });
    assert!(matches!(result, Err(Error::ValidatorFailure { .. })));
    assert_eq!(r.read().unwrap(), 0);

    // A conforming write still goes through.
    client
        .transact(|tx| {
            r.set(tx, 7)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(r.read().unwrap(), 7);
}

// === Scenario 6: session loss mid-commit ===

#[test]
fn dead_committers_locks_release_and_leave_no_versions() {
    init_tracing();
    let service = MemoryCoordinator::new();
    let config = test_config();

    let session_a = service.session();
    let doomed_session = session_a.session_id();
    let coord_a: Arc<dyn Coordinator> = Arc::new(session_a);
    let client_a = StmClient::connect(Arc::clone(&coord_a), config.clone()).unwrap();
    let x = client_a.stm_ref("x", Some(0i64)).unwrap();
    let y = client_a.stm_ref("y", Some(0i64)).unwrap();

    // A committer that gets as far as holding both writer locks with a
    // transaction id allocated, then loses its session before writing any
    // version entry.
    let runtime = TxnRuntime::new(Arc::clone(&coord_a), config.clone());
    let far = Instant::now() + Duration::from_secs(30);
    let doomed_txn = runtime.begin(far).unwrap();
    let lock_x = DistributedRwLock::new(Arc::clone(&coord_a), paths::ref_lock(x.path()));
    let lock_y = DistributedRwLock::new(Arc::clone(&coord_a), paths::ref_lock(y.path()));
    let guard_x = lock_x.write(far).unwrap();
    let guard_y = lock_y.write(far).unwrap();

    service.expire(doomed_session);

    // Another client can take both locks (the ephemerals are gone) and
    // commit.
    let client_b = connect(&service, config.clone());
    let xb: TRef<i64> = client_b.stm_ref("x", None).unwrap();
    let yb: TRef<i64> = client_b.stm_ref("y", None).unwrap();
    client_b
        .transact(|tx| {
            xb.alter(tx, |v| v + 1)?;
            yb.alter(tx, |v| v + 1)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(xb.read().unwrap(), 1);
    assert_eq!(yb.read().unwrap(), 1);

    // Neither ref carries a version tagged by the killed transaction.
    for path in [xb.path(), yb.path()] {
        let container =
            CoordinatorContainer::new(client_b.coordinator(), path, config.history_retention);
        assert!(container
            .versions()
            .unwrap()
            .iter()
            .all(|v| *v != doomed_txn.id()));
    }

    // Dropping the dead session's guards is a quiet no-op.
    drop(guard_x);
    drop(guard_y);
}

// === Boundary: maxRetries = 1 surfaces retry exhaustion ===

#[test]
fn retry_budget_of_one_surfaces_exhaustion_under_contention() {
    init_tracing();
    let service = MemoryCoordinator::new();
    let config = StmConfig::default()
        .with_max_retries(1)
        .with_backoff_ms(1, 5)
        .with_transaction_timeout_ms(60_000);
    let client = connect(&service, config);
    let contended = client.stm_ref("contended", Some(0i64)).unwrap();

    let (attempt_tx, attempt_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();

    let reader_client = client.clone();
    let reader_ref = contended.clone();
    let reader = thread::spawn(move || {
        reader_client.transact(move |tx| {
            let _ = reader_ref.get(tx)?;
            attempt_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
            Ok(())
        })
    });

    // Invalidate the reader's read set during both of its attempts.
    for _ in 0..2 {
        attempt_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("reader attempt did not start");
        client
            .transact(|tx| {
                contended.alter(tx, |v| v + 1)?;
                Ok(())
            })
            .unwrap();
        resume_tx.send(()).unwrap();
    }

    let result = reader.join().unwrap();
    assert!(matches!(result, Err(Error::RetryExhausted { attempts: 2 })));
}

// === Boundary: historyRetention = 1 surfaces stale reads ===

#[test]
fn long_running_reader_observes_stale_read() {
    init_tracing();
    let service = MemoryCoordinator::new();
    let config = StmConfig::default()
        .with_history_retention(1)
        .with_transaction_timeout_ms(60_000);
    let client = connect(&service, config);
    let r = client.stm_ref("churning", Some(0i64)).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();

    let reader_client = client.clone();
    let reader_ref = r.clone();
    let reader = thread::spawn(move || {
        reader_client.transact(move |tx| {
            started_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
            reader_ref.get(tx).map(|_| ())
        })
    });

    started_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("reader did not start");
    // Push the seed value out of retention while the reader's read point
    // still precedes every surviving version.
    for i in 1..=3i64 {
        client
            .transact(|tx| {
                r.set(tx, i)?;
                Ok(())
            })
            .unwrap();
    }
    resume_tx.send(()).unwrap();

    let result = reader.join().unwrap();
    assert!(matches!(result, Err(Error::StaleRead { .. })));
}

// === Read semantics ===

#[test]
fn plain_read_outside_transaction_sees_latest_commit() {
    let client = test_client();
    let r = client.stm_ref("plain", Some(5i64)).unwrap();
    assert_eq!(r.read().unwrap(), 5);
    client
        .transact(|tx| {
            r.set(tx, 6)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(r.read().unwrap(), 6);
}

#[test]
fn structured_values_round_trip_through_refs() {
    let client = test_client();
    let doc = client
        .stm_ref(
            "doc",
            Some(serde_json::json!({"title": "plan", "steps": ["a", "b"]})),
        )
        .unwrap();
    client
        .transact(|tx| {
            doc.alter(tx, |mut v| {
                v["steps"].as_array_mut().unwrap().push("c".into());
                v
            })?;
            Ok(())
        })
        .unwrap();
    assert_eq!(doc.read().unwrap()["steps"].as_array().unwrap().len(), 3);
}

#[test]
fn local_container_refs_transact_in_process() {
    let client = test_client();
    let r = client
        .stm_ref_in("local-backed", ContainerMode::Local, Some(0i64))
        .unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            let r = r.clone();
            thread::spawn(move || {
                client
                    .transact(|tx| {
                        r.alter(tx, |v| v + 1)?;
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(r.read().unwrap(), 4);
}

// === Watches on refs ===

#[test]
fn ref_watches_fire_with_old_and_new() {
    use std::sync::atomic::{AtomicI64, Ordering};
    let client = test_client();
    let r = client.stm_ref("watched", Some(10i64)).unwrap();

    let seen = Arc::new(AtomicI64::new(0));
    let sum = Arc::clone(&seen);
    r.add_watch("sum", move |old, new| {
        sum.fetch_add(old.copied().unwrap_or(0) + new, Ordering::SeqCst);
    });

    client
        .transact(|tx| {
            r.set(tx, 32)?;
            Ok(())
        })
        .unwrap();
    client.await_watches();
    assert_eq!(seen.load(Ordering::SeqCst), 42);

    assert!(r.remove_watch("sum"));
    client
        .transact(|tx| {
            r.set(tx, 1)?;
            Ok(())
        })
        .unwrap();
    client.await_watches();
    assert_eq!(seen.load(Ordering::SeqCst), 42);
}
