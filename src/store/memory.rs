//! In-memory store for tests and rehearsal runs.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use cirun_common::StateStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// A [`StateStore`] backed by a plain map. Nothing survives the process;
/// used wherever durability is not the point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the present keys, for assertions.
    pub fn keys(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}
