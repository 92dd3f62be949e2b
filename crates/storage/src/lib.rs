pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

pub use error::{StorageError, StorageResult};
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use error::InvalidKeySnafu;

/// Durable string key-value storage, the local-storage analogue for the chat client.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Which adapter backs the key-value store, and where it keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    JsonFiles(PathBuf),
    Sqlite(String),
}

pub async fn open_store(location: StoreLocation) -> StorageResult<Arc<dyn KeyValueStore>> {
    match location {
        StoreLocation::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreLocation::JsonFiles(directory) => Ok(Arc::new(JsonFileStore::new(directory))),
        StoreLocation::Sqlite(database_location) => {
            Ok(Arc::new(SqliteStore::open(&database_location).await?))
        }
    }
}

/// Keys double as file names for the JSON adapter, so they stay in a portable charset.
pub(crate) fn validate_key(key: &str, stage: &'static str) -> StorageResult<()> {
    if key.is_empty() {
        return InvalidKeySnafu {
            stage,
            key: key.to_string(),
            details: "key must not be empty",
        }
        .fail();
    }

    let portable = key
        .chars()
        .all(|character| character.is_ascii_alphanumeric() || matches!(character, '_' | '-' | '.'));
    if !portable || key.starts_with('.') {
        return InvalidKeySnafu {
            stage,
            key: key.to_string(),
            details: "key may only contain ASCII alphanumerics, '_', '-' and '.' and must not start with '.'",
        }
        .fail();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_portable_keys() {
        assert!(validate_key("chatbot_conversations", "test").is_ok());
        assert!(validate_key("chatbot_conversations.corrupt", "test").is_ok());
        assert!(validate_key("settings-v2", "test").is_ok());
    }

    #[test]
    fn rejects_empty_and_path_like_keys() {
        for key in ["", "../escape", "a/b", ".hidden", "white space"] {
            let error = validate_key(key, "test").expect_err("key should be rejected");
            assert!(matches!(error, StorageError::InvalidKey { .. }), "{key}");
        }
    }

    #[tokio::test]
    async fn open_store_builds_memory_adapter() {
        let store = open_store(StoreLocation::Memory)
            .await
            .expect("memory store opens");
        store.set("k", "v").expect("set works");
        assert_eq!(store.get("k").expect("get works").as_deref(), Some("v"));
    }
}
