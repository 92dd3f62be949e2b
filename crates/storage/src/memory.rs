use std::collections::HashMap;
use std::sync::Mutex;

use super::error::{LockPoisonedSnafu, StorageResult};
use super::{KeyValueStore, validate_key};

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key, "memory-get-validate-key")?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| LockPoisonedSnafu { stage: "memory-get" }.build())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key, "memory-set-validate-key")?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LockPoisonedSnafu { stage: "memory-set" }.build())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key, "memory-remove-validate-key")?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LockPoisonedSnafu { stage: "memory-remove" }.build())?;
        entries.remove(key);
        Ok(())
    }
}
