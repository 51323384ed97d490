//! End-to-end scenarios driving the full `compute` path against the
//! `bridge_guest_fixture` binary over a real TCP loopback connection.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bridge_accumulator::{LocalAccumulatorSink, RemoteAccumulatorSink};
use bridge_pool::{PoolKey, WorkerPool};
use bridge_protocol::{read_frame, read_int32, Broadcast};
use bridge_runtime::{compute, ComputeConfig};

use support::{default_config, guest_spec, short_timeout, FixtureContext, FixtureStorage, NoopMemory};

fn base_config(spec: bridge_pool::SpawnSpec, partition_index: i32) -> ComputeConfig {
    ComputeConfig {
        spawn: spec,
        partition_index,
        working_dir: "/tmp/work".to_string(),
        include_paths: vec![],
        required_broadcasts: vec![],
        command_blob: vec![0xAA],
        connect_timeout: short_timeout(),
        monitor_poll_interval: Duration::from_millis(50),
    }
}

/// S1 - happy path: partition 3, no includes, no broadcasts, command
/// 0xAA, input records ["hi", "there"]. The worker echoes them
/// uppercased; `compute` yields exactly [b"HI", b"THERE"] and the
/// worker is released, not destroyed.
#[test]
fn s1_happy_path() {
    let pool = Arc::new(WorkerPool::new());
    let (spec, env) = guest_spec(&[]);
    let key = PoolKey::new(spec.executable.clone(), env);
    let context = Arc::new(FixtureContext::default());

    let records = vec![
        bridge_runtime::Record::Bytes(b"hi".to_vec()),
        bridge_runtime::Record::Bytes(b"there".to_vec()),
    ];

    let mut iter = compute(
        key.clone(),
        base_config(spec.clone(), 3),
        records,
        pool.clone(),
        context.clone(),
        Arc::new(FixtureStorage { dirs: vec![] }),
        Arc::new(NoopMemory),
        Arc::new(default_config()),
        Arc::new(LocalAccumulatorSink),
    )
    .unwrap();

    let collected: Vec<_> = iter.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(collected, vec![b"HI".to_vec(), b"THERE".to_vec()]);

    let worker_id = iter.worker_id();
    context.run_completion_hooks();
    drop(iter);

    // Released, not destroyed: a fresh acquire against the same key pops
    // the same worker out of the idle bucket instead of spawning a new
    // process.
    let options = bridge_pool::AcquireOptions {
        local_dirs: vec![],
        reuse: true,
        connect_timeout: short_timeout(),
    };
    let reused = pool.acquire(&key, &spec, &options).unwrap();
    assert_eq!(reused.id(), worker_id);
}

/// S2 - user error: as S1 but the worker raises after the first record.
/// `compute` yields `b"HI"`, then the next `next()` raises `UserError`
/// with message `"boom"`; the worker is closed, not released.
#[test]
fn s2_user_error_closes_the_worker() {
    let pool = Arc::new(WorkerPool::new());
    let (spec, env) = guest_spec(&[("FIXTURE_RAISE_AFTER", "1")]);
    let key = PoolKey::new(spec.executable.clone(), env);
    let context = Arc::new(FixtureContext::default());

    let records = vec![
        bridge_runtime::Record::Bytes(b"hi".to_vec()),
        bridge_runtime::Record::Bytes(b"there".to_vec()),
    ];

    let mut iter = compute(
        key.clone(),
        base_config(spec.clone(), 3),
        records,
        pool.clone(),
        context.clone(),
        Arc::new(FixtureStorage { dirs: vec![] }),
        Arc::new(NoopMemory),
        Arc::new(default_config()),
        Arc::new(LocalAccumulatorSink),
    )
    .unwrap();

    assert_eq!(iter.next().unwrap().unwrap(), b"HI".to_vec());
    match iter.next() {
        Some(Err(bridge_runtime::BridgeError::UserError { message, .. })) => {
            assert_eq!(message, "boom")
        }
        other => panic!("expected UserError(\"boom\"), got {other:?}"),
    }
    assert!(iter.next().is_none());

    let worker_id = iter.worker_id();
    context.run_completion_hooks();
    drop(iter);

    // Closed, not released: a fresh acquire must spawn a brand new
    // worker rather than reusing the failed one.
    let options = bridge_pool::AcquireOptions {
        local_dirs: vec![],
        reuse: true,
        connect_timeout: short_timeout(),
    };
    let fresh = pool.acquire(&key, &spec, &options).unwrap();
    assert_ne!(fresh.id(), worker_id);
}

/// S3 - timing: the worker interleaves a `TimingData` frame between
/// records. Metrics gain the reported spill counters; data output is
/// unchanged.
#[test]
fn s3_timing_frame_does_not_perturb_data() {
    let pool = Arc::new(WorkerPool::new());
    let (spec, env) = guest_spec(&[("FIXTURE_TIMING", "0,100,150,4096,8192")]);
    let key = PoolKey::new(spec.executable.clone(), env);
    let context = Arc::new(FixtureContext::default());

    let records = vec![
        bridge_runtime::Record::Bytes(b"hi".to_vec()),
        bridge_runtime::Record::Bytes(b"there".to_vec()),
    ];

    let mut iter = compute(
        key,
        base_config(spec, 0),
        records,
        pool,
        context.clone(),
        Arc::new(FixtureStorage { dirs: vec![] }),
        Arc::new(NoopMemory),
        Arc::new(default_config()),
        Arc::new(LocalAccumulatorSink),
    )
    .unwrap();

    let collected: Vec<_> = iter.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(collected, vec![b"HI".to_vec(), b"THERE".to_vec()]);
    context.run_completion_hooks();
    drop(iter);

    let timings = context.timings.lock().unwrap();
    assert_eq!(timings.len(), 1);
    assert_eq!(timings[0].memory_bytes_spilled, 4096);
    assert_eq!(timings[0].disk_bytes_spilled, 8192);
}

/// S4 - broadcast reuse: session 1 registers {10, 20}; session 2, against
/// the same pool key, requests {20, 30} and reuses the same pooled
/// worker. The resident set on that worker ends up {20, 30}.
#[test]
fn s4_broadcast_reuse_across_pooled_sessions() {
    let pool = Arc::new(WorkerPool::new());
    let (spec, env) = guest_spec(&[]);
    let key = PoolKey::new(spec.executable.clone(), env);

    let context1 = Arc::new(FixtureContext::default());
    let mut config1 = base_config(spec.clone(), 0);
    config1.required_broadcasts = vec![
        Broadcast { id: 10, payload: vec![] },
        Broadcast { id: 20, payload: vec![] },
    ];
    let mut iter1 = compute(
        key.clone(),
        config1,
        vec![],
        pool.clone(),
        context1.clone(),
        Arc::new(FixtureStorage { dirs: vec![] }),
        Arc::new(NoopMemory),
        Arc::new(default_config()),
        Arc::new(LocalAccumulatorSink),
    )
    .unwrap();
    for item in iter1.by_ref() {
        item.unwrap();
    }
    let worker1_id = iter1.worker_id();
    context1.run_completion_hooks();
    drop(iter1);

    let context2 = Arc::new(FixtureContext::default());
    let mut config2 = base_config(spec, 0);
    config2.required_broadcasts = vec![
        Broadcast { id: 20, payload: vec![] },
        Broadcast { id: 30, payload: vec![9] },
    ];
    let iter2 = compute(
        key,
        config2,
        vec![],
        pool.clone(),
        context2.clone(),
        Arc::new(FixtureStorage { dirs: vec![] }),
        Arc::new(NoopMemory),
        Arc::new(default_config()),
        Arc::new(LocalAccumulatorSink),
    )
    .unwrap();

    assert_eq!(iter2.worker_id(), worker1_id, "session 2 must reuse the pooled worker");
    let resident = pool.broadcasts_snapshot(&iter2.worker());
    assert_eq!(resident, HashSet::from([20, 30]));

    context2.run_completion_hooks();
    drop(iter2);
}

/// S5 - cancellation liveness: the worker hangs without ever reading or
/// writing again. Once `context.is_cancelled()` flips, the monitor
/// destroys the worker well within its poll interval, and the blocked
/// reader thread observes the resulting I/O error as `TaskCancelled`
/// rather than `WorkerCrashed`.
#[test]
fn s5_cancellation_unblocks_a_hung_reader() {
    let pool = Arc::new(WorkerPool::new());
    let (spec, env) = guest_spec(&[("FIXTURE_MODE", "hang")]);
    let key = PoolKey::new(spec.executable.clone(), env);
    let context = Arc::new(FixtureContext::default());

    let mut config = base_config(spec, 0);
    config.monitor_poll_interval = Duration::from_millis(20);

    let mut iter = compute(
        key,
        config,
        vec![],
        pool,
        context.clone(),
        Arc::new(FixtureStorage { dirs: vec![] }),
        Arc::new(NoopMemory),
        Arc::new(default_config()),
        Arc::new(LocalAccumulatorSink),
    )
    .unwrap();

    let handle = std::thread::spawn(move || iter.next());

    std::thread::sleep(Duration::from_millis(100));
    context.cancel();

    let result = handle
        .join()
        .expect("reader thread must not panic while unblocking");
    assert!(
        matches!(result, Some(Err(bridge_runtime::BridgeError::TaskCancelled))),
        "expected TaskCancelled, got {result:?}"
    );
}

/// S6 - accumulator ack: driver-side mode against a mock aggregator that
/// echoes one ack byte per batch, exercised through the full `compute`
/// path (the worker fixture emits two accumulator-section frames).
#[test]
fn s6_accumulator_ack_through_compute() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let aggregator = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let count = read_int32(&mut reader).unwrap();
        assert_eq!(count, 2);
        for _ in 0..count {
            let len = read_int32(&mut reader).unwrap();
            let _ = read_frame(&mut reader, len as u32).unwrap();
        }
        std::io::Write::write_all(&mut writer, &[1u8]).unwrap();
    });

    let pool = Arc::new(WorkerPool::new());
    let (spec, env) = guest_spec(&[("FIXTURE_ACCUM_COUNT", "2")]);
    let key = PoolKey::new(spec.executable.clone(), env);
    let context = Arc::new(FixtureContext::default());

    let sink = Arc::new(RemoteAccumulatorSink::new("127.0.0.1", addr.port()));

    let mut iter = compute(
        key,
        base_config(spec, 0),
        vec![],
        pool,
        context.clone(),
        Arc::new(FixtureStorage { dirs: vec![] }),
        Arc::new(NoopMemory),
        Arc::new(default_config()),
        sink,
    )
    .unwrap();

    assert!(iter.next().is_none(), "no data records expected in this scenario");
    context.run_completion_hooks();
    drop(iter);

    aggregator.join().expect("aggregator thread must observe exactly one batch and ack it");
}
