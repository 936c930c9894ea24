use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

pub mod file;

pub use file::JsonFileStore;

pub const ACCOUNT_CACHE_KEY: &str = "accountCache";
pub const ACCOUNT_RATE_LIMIT_KEY: &str = "accountRateLimitUntil";
pub const QUOTE_RATE_LIMIT_KEY: &str = "quoteRateLimitUntil";
pub const CUSTOM_WATCHLIST_KEY: &str = "customWatchlist";
pub const SNAPSHOT_KEY: &str = "watchlistSnapshot";

/// Durable key-value collaborator. Missing keys are simply absent from `get`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;
    fn set(&self, entries: HashMap<String, Value>) -> Result<()>;
}

/// Read and decode a single key.
pub fn load_value<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let mut values = store.get(&[key])?;
    match values.remove(key) {
        Some(Value::Null) | None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Encode and write a single key.
pub fn save_value<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store.set(HashMap::from([(key.to_string(), value)]))
}

/// Process-local store used by tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    fn set(&self, values: HashMap<String, Value>) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(values);
        Ok(())
    }
}
