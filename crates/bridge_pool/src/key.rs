use std::collections::BTreeMap;

/// Pool bucket key: `(executable, env)`. `env` equality is by full map
/// contents (`spec.md` §4.2), so the env is stored sorted in a
/// `BTreeMap` rather than a `HashMap` to get a stable, hashable key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    executable: String,
    env: BTreeMap<String, String>,
}

impl PoolKey {
    pub fn new(executable: impl Into<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            executable: executable.into(),
            env,
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}
