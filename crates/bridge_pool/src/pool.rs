//! Worker pool (component C2): acquire, release, and destroy pooled
//! worker subprocesses keyed by `(executable, env)`, with per-worker
//! broadcast residency tracked alongside.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::PoolResult;
use crate::key::PoolKey;
use crate::worker::{
    spawn_and_connect, SpawnSpec, Worker, WorkerId, LOCAL_DIRS_ENV, REUSE_WORKER_ENV,
};

/// Host-supplied context the pool needs on every `acquire`: where to
/// point the guest's local scratch space, whether to pool at all, and
/// how long to wait for the connect-back handshake.
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub local_dirs: Vec<PathBuf>,
    pub reuse: bool,
    pub connect_timeout: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            local_dirs: Vec::new(),
            reuse: true,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

struct PoolState {
    idle: HashMap<PoolKey, Vec<Worker>>,
    broadcasts: HashMap<WorkerId, HashSet<i64>>,
}

/// Process-wide cache of idle worker subprocesses. One instance is
/// constructed per host and shared across all concurrently running
/// tasks; all mutation is serialized by a single internal lock
/// (`spec.md` §4.2, §5).
pub struct WorkerPool {
    state: Mutex<PoolState>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: HashMap::new(),
                broadcasts: HashMap::new(),
            }),
        }
    }

    /// Acquire a connected worker for `spec`/`key`, reusing an idle one
    /// when available. Populates `LOCAL_DIRS` always, and
    /// `REUSE_WORKER=1` when `options.reuse` is set, before spawning.
    pub fn acquire(
        &self,
        key: &PoolKey,
        spawn: &SpawnSpec,
        options: &AcquireOptions,
    ) -> PoolResult<Worker> {
        if let Some(worker) = self.pop_idle(key) {
            info!(executable = key.executable(), "reused idle worker");
            return Ok(worker);
        }

        let mut env = key.env().clone();
        populate_required_env(&mut env, options);

        spawn_and_connect(spawn, &env, options.connect_timeout)
    }

    fn pop_idle(&self, key: &PoolKey) -> Option<Worker> {
        let mut state = self.state.lock().expect("pool lock poisoned");
        let bucket = state.idle.get_mut(key)?;
        let worker = bucket.pop();
        if bucket.is_empty() {
            state.idle.remove(key);
        }
        worker.filter(|w| !w.is_destroyed())
    }

    /// Return a worker to the idle pool. Only valid once the worker has
    /// emitted its terminal frame for the task just finished
    /// (`spec.md` §4.2).
    pub fn release(&self, key: &PoolKey, worker: Worker) {
        if worker.is_destroyed() {
            return;
        }
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.idle.entry(key.clone()).or_default().push(worker);
    }

    /// Forcibly terminate a worker. Idempotent: a future `acquire` with
    /// the same key will never return this instance again, and the
    /// worker's broadcast residency is discarded here (the "weak
    /// association" in `spec.md` §9, implemented as explicit removal).
    pub fn destroy(&self, worker: &Worker) {
        worker.kill();
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.broadcasts.remove(&worker.id());
        for bucket in state.idle.values_mut() {
            bucket.retain(|w| w.id() != worker.id());
        }
    }

    /// Run `f` against this worker's resident broadcast-id set, created
    /// empty on first use. The whole operation runs under the pool's
    /// lock so the feeder's read-compute-write of the delta is atomic
    /// with respect to a concurrent `destroy` from the monitor.
    pub fn with_broadcasts<R>(&self, worker: &Worker, f: impl FnOnce(&mut HashSet<i64>) -> R) -> R {
        let mut state = self.state.lock().expect("pool lock poisoned");
        let set = state.broadcasts.entry(worker.id()).or_default();
        f(set)
    }

    /// Read-only snapshot, for tests and diagnostics.
    pub fn broadcasts_snapshot(&self, worker: &Worker) -> HashSet<i64> {
        let state = self.state.lock().expect("pool lock poisoned");
        state.broadcasts.get(&worker.id()).cloned().unwrap_or_default()
    }

    /// Close every idle worker. Call once at host shutdown; do not rely
    /// on `Drop` for socket/process cleanup timing (`spec.md` §9).
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        for bucket in state.idle.values() {
            for worker in bucket {
                worker.kill();
            }
        }
        state.idle.clear();
        state.broadcasts.clear();
        warn!("worker pool shut down, all idle workers destroyed");
    }
}

fn populate_required_env(env: &mut BTreeMap<String, String>, options: &AcquireOptions) {
    let dirs = options
        .local_dirs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",");
    env.insert(LOCAL_DIRS_ENV.to_string(), dirs);

    if options.reuse {
        env.insert(REUSE_WORKER_ENV.to_string(), "1".to_string());
    } else {
        env.remove(REUSE_WORKER_ENV);
    }
}
