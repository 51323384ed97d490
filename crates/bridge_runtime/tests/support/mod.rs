//! Shared fixtures for the integration tests: minimal `TaskContext`,
//! `LocalStorage`, `MemoryManagers`, and `ConfigStore` implementations,
//! plus a helper that spawns `bridge_guest_fixture` with a given set of
//! environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bridge_protocol::{StaticConfig, TimingMetrics};
use bridge_runtime::{LocalStorage, MemoryManagers, TaskContext};

pub struct FixtureContext {
    cancelled: AtomicBool,
    completed: AtomicBool,
    shutting_down: AtomicBool,
    hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    pub timings: Mutex<Vec<TimingMetrics>>,
}

impl Default for FixtureContext {
    fn default() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
            timings: Mutex::new(Vec::new()),
        }
    }
}

impl FixtureContext {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    /// Drain and invoke every completion hook registered so far, mimicking
    /// what a real host does once it decides the task is finished.
    pub fn run_completion_hooks(&self) {
        let hooks: Vec<_> = std::mem::take(&mut self.hooks.lock().unwrap());
        for hook in hooks {
            hook();
        }
    }
}

impl TaskContext for FixtureContext {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
    fn is_host_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
    fn add_completion_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        self.hooks.lock().unwrap().push(hook);
    }
    fn record_timing(&self, timing: TimingMetrics) {
        self.timings.lock().unwrap().push(timing);
    }
}

pub struct FixtureStorage {
    pub dirs: Vec<PathBuf>,
}

impl LocalStorage for FixtureStorage {
    fn local_dirs(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }
}

pub struct NoopMemory;

impl MemoryManagers for NoopMemory {
    fn release_shuffle_memory_for_current_thread(&self) {}
    fn release_unroll_memory_for_current_thread(&self) {}
}

pub fn default_config() -> StaticConfig {
    StaticConfig::new()
}

pub fn guest_spec(extra_env: &[(&str, &str)]) -> (bridge_pool::SpawnSpec, BTreeMap<String, String>) {
    let spec = bridge_pool::SpawnSpec {
        executable: env!("CARGO_BIN_EXE_bridge_guest_fixture").to_string(),
        args: vec![],
    };
    let mut env = BTreeMap::new();
    for (k, v) in extra_env {
        env.insert((*k).to_string(), (*v).to_string());
    }
    (spec, env)
}

pub fn short_timeout() -> Duration {
    Duration::from_secs(5)
}
