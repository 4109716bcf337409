use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use super::storage::{SaveBundle, Storage, StorageError};

/// Single-file backend: the whole save bundle lives in one JSON object,
/// replaced atomically (tmp file, then rename) on every write so a crash
/// mid-save never leaves a half-written file behind.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn initialize(&self) -> Result<(), StorageError> {
        let path = self.path.clone();
        run_blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            Ok(())
        })
        .await
    }

    async fn load(&self, keys: &[&str]) -> Result<SaveBundle, StorageError> {
        let path = self.path.clone();
        let requested: Vec<String> = keys.iter().map(|key| (*key).to_string()).collect();
        run_blocking(move || {
            let mut entries = read_entries(&path)?;
            entries.retain(|key, _| requested.iter().any(|wanted| wanted == key));
            Ok(entries)
        })
        .await
    }

    async fn save(&self, bundle: SaveBundle) -> Result<(), StorageError> {
        let path = self.path.clone();
        run_blocking(move || {
            // An unreadable save file cannot block future saves forever;
            // rebuild it from this bundle. Io errors stay fatal.
            let mut entries = match read_entries(&path) {
                Ok(entries) => entries,
                Err(StorageError::Format { .. }) => {
                    warn!(path = %path.display(), "save_file_unreadable_rebuilding");
                    SaveBundle::new()
                }
                Err(error) => return Err(error),
            };
            entries.extend(bundle);
            let text = serde_json::to_string_pretty(&entries).map_err(|error| {
                StorageError::Format {
                    path: path.clone(),
                    message: format!("failed to encode save bundle: {error}"),
                }
            })?;
            write_text_atomic(&path, &text).map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })
        })
        .await
    }
}

async fn run_blocking<T: Send + 'static>(
    work: impl FnOnce() -> Result<T, StorageError> + Send + 'static,
) -> Result<T, StorageError> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| StorageError::Unavailable {
            reason: format!("storage task failed: {error}"),
        })?
}

fn read_entries(path: &Path) -> Result<SaveBundle, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(SaveBundle::new()),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw).map_err(|error| StorageError::Format {
        path: path.to_path_buf(),
        message: format!("failed to decode save bundle: {error}"),
    })
}

fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, text)?;
    replace_file(&tmp_path, path)
}

fn replace_file(tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    match fs::remove_file(final_path) {
        Ok(_) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            let _ = fs::remove_file(tmp_path);
            return Err(error);
        }
    }

    if let Err(error) = fs::rename(tmp_path, final_path) {
        let _ = fs::remove_file(tmp_path);
        return Err(error);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("save.tmp");
    let tmp_name = format!("{file_name}.tmp");
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(entries: &[(&str, &str)]) -> SaveBundle {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn load_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("save.json"));
        storage.initialize().await.expect("initialize");

        let loaded = storage.load(&["settings"]).await.expect("load");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_requested_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("save.json"));
        storage.initialize().await.expect("initialize");

        storage
            .save(bundle(&[("settings", "{}"), ("resources", "[1,2]")]))
            .await
            .expect("save");
        let loaded = storage.load(&["settings"]).await.expect("load");

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("settings").map(String::as_str), Some("{}"));
    }

    #[tokio::test]
    async fn save_merges_with_existing_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("save.json"));
        storage.initialize().await.expect("initialize");

        storage
            .save(bundle(&[("settings", "old"), ("resources", "r")]))
            .await
            .expect("save");
        storage
            .save(bundle(&[("settings", "new")]))
            .await
            .expect("save");

        let loaded = storage
            .load(&["settings", "resources"])
            .await
            .expect("load");
        assert_eq!(loaded.get("settings").map(String::as_str), Some("new"));
        assert_eq!(loaded.get("resources").map(String::as_str), Some("r"));
    }

    #[tokio::test]
    async fn initialize_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("saves").join("slot_a").join("save.json");
        let storage = FileStorage::new(&nested);

        storage.initialize().await.expect("initialize");
        storage
            .save(bundle(&[("settings", "{}")]))
            .await
            .expect("save");

        assert!(nested.is_file());
    }

    #[tokio::test]
    async fn no_tmp_file_left_behind_after_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("save.json");
        let storage = FileStorage::new(&path);
        storage.initialize().await.expect("initialize");

        storage
            .save(bundle(&[("settings", "{}")]))
            .await
            .expect("save");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != path)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn save_over_a_corrupt_file_rebuilds_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("save.json");
        fs::write(&path, "not json").expect("write");
        let storage = FileStorage::new(&path);

        storage
            .save(bundle(&[("settings", "{}")]))
            .await
            .expect("save");
        let loaded = storage.load(&["settings"]).await.expect("load");

        assert_eq!(loaded.get("settings").map(String::as_str), Some("{}"));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_format_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("save.json");
        fs::write(&path, "not json").expect("write");
        let storage = FileStorage::new(&path);

        let err = storage.load(&["settings"]).await.expect_err("corrupt");
        assert!(matches!(err, StorageError::Format { .. }));
    }
}
