//! Worker pool (component C2): acquire/release/destroy pooled guest
//! subprocesses keyed by `(executable, env)`, with per-worker broadcast
//! residency tracked alongside and discarded on destroy.

mod error;
mod key;
mod pool;
mod worker;

pub use error::{PoolError, PoolResult};
pub use key::PoolKey;
pub use pool::{AcquireOptions, WorkerPool};
pub use worker::{
    spawn_and_connect, SpawnSpec, Worker, WorkerId, CONNECT_PORT_ENV, LOCAL_DIRS_ENV,
    REUSE_WORKER_ENV,
};
