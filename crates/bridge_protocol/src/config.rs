//! Host-supplied configuration (§6): a small key-value contract rather
//! than a global, so the codec and pool stay testable without a real
//! config service.

use std::collections::HashMap;

use crate::frame::{DEFAULT_BUFFER_SIZE, IO_BUFFER_SIZE_KEY, WORKER_REUSE_KEY};

/// Key-value configuration store the host exposes to the bridge.
/// Unrecognized keys simply fall back to the caller-supplied default.
pub trait ConfigStore: Send + Sync {
    fn get_int(&self, key: &str, default: i64) -> i64;
    fn get_bool(&self, key: &str, default: bool) -> bool;

    fn io_buffer_size(&self) -> usize {
        self.get_int(IO_BUFFER_SIZE_KEY, DEFAULT_BUFFER_SIZE as i64).max(1) as usize
    }

    fn worker_reuse(&self) -> bool {
        self.get_bool(WORKER_REUSE_KEY, true)
    }
}

/// A plain in-memory config store, for tests and small embedders that
/// don't have a real host configuration service.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    ints: HashMap<String, i64>,
    bools: HashMap<String, bool>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.ints.insert(key.into(), value);
        self
    }

    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.bools.insert(key.into(), value);
        self
    }
}

impl ConfigStore for StaticConfig {
    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.ints.get(key).copied().unwrap_or(default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.bools.get(key).copied().unwrap_or(default)
    }
}
