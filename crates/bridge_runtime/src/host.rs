//! Traits the enclosing host framework must implement for `compute` to
//! run. None of these exist in the framework this crate ships with —
//! they are the seam a real scheduler/executor plugs into.

use std::path::PathBuf;

use bridge_protocol::TimingMetrics;

/// Per-task state the driver and monitor observe, and the mechanism for
/// registering a cleanup hook that runs on every exit path.
pub trait TaskContext: Send + Sync + 'static {
    fn is_cancelled(&self) -> bool;
    fn is_completed(&self) -> bool;
    /// True once the enclosing host runtime has begun shutting down.
    /// I/O errors observed after this flips are swallowed rather than
    /// surfaced, since no downstream consumer remains to care.
    fn is_host_shutting_down(&self) -> bool;
    fn add_completion_hook(&self, hook: Box<dyn FnOnce() + Send>);
    /// Record boot/init/finish timestamps and spill counters observed
    /// in a `TimingData` control frame.
    fn record_timing(&self, timing: TimingMetrics);
}

/// Local working directories available to the worker, surfaced to the
/// pool as the `LOCAL_DIRS` environment entry.
pub trait LocalStorage: Send + Sync + 'static {
    fn local_dirs(&self) -> Vec<PathBuf>;
}

/// Block/shuffle memory release hooks. The bridge only ever calls the
/// release half of this contract, keyed by the feeder thread's identity.
pub trait MemoryManagers: Send + Sync + 'static {
    fn release_shuffle_memory_for_current_thread(&self);
    fn release_unroll_memory_for_current_thread(&self);
}

// `ConfigStore` (io.buffer.size / worker.reuse) lives in
// `bridge_protocol::config` and is re-exported from this crate's root.
