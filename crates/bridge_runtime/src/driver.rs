//! Task bridge driver (C6): composes the frame codec, worker pool,
//! feeder, reader, and monitor into `compute(partition, context)`.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use bridge_accumulator::AccumulatorSink;
use bridge_pool::{AcquireOptions, PoolKey, SpawnSpec, Worker, WorkerPool};
use bridge_protocol::{compute_delta, Broadcast, ConfigStore};

use crate::error::{BridgeError, BridgeResult};
use crate::feeder::{new_feeder_slot, spawn_feeder, FeederConfig, Record};
use crate::host::{LocalStorage, MemoryManagers, TaskContext};
use crate::monitor::spawn_monitor;
use crate::reader::Reader;

/// Everything `compute` needs beyond what it draws from the host
/// traits: the worker identity, task header fields, and the required
/// broadcasts for this task.
pub struct ComputeConfig {
    pub spawn: SpawnSpec,
    pub partition_index: i32,
    pub working_dir: String,
    pub include_paths: Vec<String>,
    pub required_broadcasts: Vec<Broadcast>,
    pub command_blob: Vec<u8>,
    pub connect_timeout: Duration,
    pub monitor_poll_interval: Duration,
}

/// State the completion hook and `Drop` both need, shared by `Arc` so
/// either path can run the (idempotent) teardown exactly once.
struct Teardown {
    pool: Arc<WorkerPool>,
    key: PoolKey,
    worker: Worker,
    reuse: bool,
    clean: Arc<AtomicBool>,
    feeder_handle: Mutex<Option<JoinHandle<()>>>,
    finished: AtomicBool,
}

impl Teardown {
    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        // (i) signal the feeder to stop by interrupting it: a feeder
        // blocked mid-write to a slow or unresponsive worker will not
        // notice a cancelled task or an abandoned iterator on its own,
        // so half-close the write side from here rather than wait for
        // the feeder to get there itself.
        self.worker.shutdown_write();
        // (ii) wait for the feeder to exit, now that it is unblocked.
        if let Some(handle) = self.feeder_handle.lock().expect("feeder handle lock poisoned").take() {
            let _ = handle.join();
        }
        // (iii) release for reuse only if the reader also reached a
        // clean end of stream; otherwise tear the worker down.
        if self.reuse && self.clean.load(Ordering::SeqCst) {
            self.pool.release(&self.key, self.worker.clone());
        } else {
            self.pool.destroy(&self.worker);
        }
    }
}

/// The iterator `compute` returns: the reader's output sequence, wrapped
/// so any `next()` fails fast with `TaskCancelled` once the host's
/// cancellation flag flips, even if the underlying read hasn't
/// unblocked yet.
pub struct BridgeIterator {
    reader: Reader<TcpStream>,
    context: Arc<dyn TaskContext>,
    teardown: Arc<Teardown>,
    done: bool,
}

impl BridgeIterator {
    /// The identity of the pooled worker backing this session, for
    /// diagnostics and tests that want to confirm reuse-vs-respawn.
    pub fn worker_id(&self) -> bridge_pool::WorkerId {
        self.teardown.worker.id()
    }

    /// The pooled worker backing this session. Cheap: `Worker` is an
    /// `Arc`-backed clone handle.
    pub fn worker(&self) -> Worker {
        self.teardown.worker.clone()
    }
}

impl Iterator for BridgeIterator {
    type Item = Result<Vec<u8>, BridgeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.context.is_cancelled() {
            self.done = true;
            return Some(Err(BridgeError::TaskCancelled));
        }
        match self.reader.next() {
            Some(item) => Some(item),
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl Drop for BridgeIterator {
    fn drop(&mut self) {
        // Backstop: the primary teardown path is the completion hook
        // `compute` registers with the host's `TaskContext`. `finish` is
        // idempotent, so running it again here if the host never calls
        // the hook (e.g. in a test harness with no host loop) is safe.
        self.teardown.finish();
    }
}

/// Implements the external contract `compute(partition, context) ->
/// iterator<bytes>`: acquire a worker, start the feeder and monitor,
/// and return the reader's iterator.
#[allow(clippy::too_many_arguments)]
pub fn compute(
    key: PoolKey,
    config: ComputeConfig,
    records: Vec<Record>,
    pool: Arc<WorkerPool>,
    context: Arc<dyn TaskContext>,
    local_storage: Arc<dyn LocalStorage>,
    memory: Arc<dyn MemoryManagers>,
    config_store: Arc<dyn ConfigStore>,
    accumulator_sink: Arc<dyn AccumulatorSink>,
) -> BridgeResult<BridgeIterator> {
    let start = Instant::now();

    let options = AcquireOptions {
        local_dirs: local_storage.local_dirs(),
        reuse: config_store.worker_reuse(),
        connect_timeout: config.connect_timeout,
    };

    let worker = pool.acquire(&key, &config.spawn, &options)?;
    debug!(
        worker_id = worker.id(),
        elapsed_ms = start.elapsed().as_millis(),
        "acquired worker"
    );

    let broadcast_delta =
        pool.with_broadcasts(&worker, |resident| compute_delta(resident, &config.required_broadcasts));

    let feeder_slot = new_feeder_slot();

    let feeder_stream = worker.try_clone_stream()?;
    let reader_stream = worker.try_clone_stream()?;

    let feeder_config = FeederConfig {
        partition_index: config.partition_index,
        working_dir: config.working_dir,
        include_paths: config.include_paths,
        broadcast_delta,
        command_blob: config.command_blob,
        buffer_size: config_store.io_buffer_size(),
    };
    let feeder_handle = spawn_feeder(feeder_stream, feeder_config, records, feeder_slot.clone(), memory);

    // The monitor is advisory and self-terminating; it is not joined by
    // the completion hook (only the feeder is, per the driver sequence).
    let _monitor_handle = spawn_monitor(
        worker.clone(),
        pool.clone(),
        context.clone(),
        config.monitor_poll_interval,
    );

    let reader = Reader::new(
        reader_stream,
        config_store.io_buffer_size(),
        feeder_slot,
        context.clone(),
        accumulator_sink,
    );
    let clean = reader.clean_flag();

    let teardown = Arc::new(Teardown {
        pool,
        key,
        worker,
        reuse: options.reuse,
        clean,
        feeder_handle: Mutex::new(Some(feeder_handle)),
        finished: AtomicBool::new(false),
    });

    let hook_teardown = teardown.clone();
    context.add_completion_hook(Box::new(move || hook_teardown.finish()));

    Ok(BridgeIterator {
        reader,
        context,
        teardown,
        done: false,
    })
}
