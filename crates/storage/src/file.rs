use std::path::{Path, PathBuf};

use snafu::ResultExt;

use super::error::{
    CreateDirectorySnafu, ReadFileSnafu, RemoveFileSnafu, RenameTempFileSnafu, StorageResult,
    WriteFileSnafu,
};
use super::{KeyValueStore, validate_key};

const VALUE_FILE_EXTENSION: &str = "json";
const TEMP_FILE_EXTENSION: &str = "json.tmp";

/// Stores each key as `<directory>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{key}.{VALUE_FILE_EXTENSION}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.{TEMP_FILE_EXTENSION}"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key, "file-get-validate-key")?;
        let path = self.value_path(key);

        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadFileSnafu {
                stage: "file-get-read",
                path: display_path(&path),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key, "file-set-validate-key")?;
        std::fs::create_dir_all(&self.directory).context(CreateDirectorySnafu {
            stage: "file-set-create-directory",
            path: display_path(&self.directory),
        })?;

        // Readers never observe a half-written value: write aside, then swap in.
        let temp_path = self.temp_path(key);
        let value_path = self.value_path(key);
        std::fs::write(&temp_path, value).context(WriteFileSnafu {
            stage: "file-set-write-temp",
            path: display_path(&temp_path),
        })?;
        std::fs::rename(&temp_path, &value_path).context(RenameTempFileSnafu {
            stage: "file-set-rename-temp",
            from: display_path(&temp_path),
            to: display_path(&value_path),
        })?;

        tracing::trace!(key, path = %value_path.display(), "stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key, "file-remove-validate-key")?;
        let path = self.value_path(key);

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(source).context(RemoveFileSnafu {
                stage: "file-remove",
                path: display_path(&path),
            }),
        }
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_directory(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos());
        std::env::temp_dir().join(format!(
            "wayground-file-store-{name}-{}-{nanos}",
            std::process::id()
        ))
    }

    #[test]
    fn missing_key_reads_as_none_without_creating_directory() {
        let directory = scratch_directory("missing");
        let store = JsonFileStore::new(&directory);

        assert!(store.get("chatbot_conversations").expect("read").is_none());
        assert!(!directory.exists());
    }

    #[test]
    fn set_then_get_survives_a_new_handle() {
        let directory = scratch_directory("roundtrip");
        JsonFileStore::new(&directory)
            .set("chatbot_conversations", "[{\"id\":\"a\"}]")
            .expect("write");

        let reopened = JsonFileStore::new(&directory);
        assert_eq!(
            reopened.get("chatbot_conversations").expect("read").as_deref(),
            Some("[{\"id\":\"a\"}]")
        );
        assert!(!directory.join("chatbot_conversations.json.tmp").exists());

        let _ = std::fs::remove_dir_all(directory);
    }

    #[test]
    fn remove_deletes_the_value_file() {
        let directory = scratch_directory("remove");
        let store = JsonFileStore::new(&directory);
        store.set("k", "v").expect("write");
        store.remove("k").expect("remove");
        store.remove("k").expect("remove twice");

        assert!(store.get("k").expect("read").is_none());
        let _ = std::fs::remove_dir_all(directory);
    }
}
