use std::collections::{BTreeMap, HashMap};

/// Read access to environment variables.
///
/// The pipeline never touches `std::env` directly; callers hand in a lookup so
/// discovery and argument assembly stay deterministic under test.
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;

    /// The value of `key`, treating unset, empty and whitespace-only alike.
    fn get_non_blank(&self, key: &str) -> Option<String> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }
}

/// Lookup backed by the current process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}
