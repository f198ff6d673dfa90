//! JSON-file implementations of the engine's data and storage seams.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cantina_core::{CantinaState, Catalog, DataSource, PolicyConfig, SnapshotStorage};
use thiserror::Error;

/// Errors from the JSON data directory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("data directory I/O failure")]
    Io(#[from] io::Error),
    #[error("malformed JSON document")]
    Json(#[from] serde_json::Error),
}

/// Reads `catalog.json` and `policy.json` from the data directory,
/// falling back to built-in defaults when a file is absent.
pub struct FsDataSource {
    dir: PathBuf,
}

impl FsDataSource {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn read_or<T>(&self, file: &str, fallback: impl FnOnce() -> T) -> Result<T, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let path = self.dir.join(file);
        if !path.exists() {
            log::debug!("{} not found, using defaults", path.display());
            return Ok(fallback());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl DataSource for FsDataSource {
    type Error = StoreError;

    fn load_catalog(&self) -> Result<Catalog, Self::Error> {
        self.read_or("catalog.json", Catalog::empty)
    }

    fn load_policy(&self) -> Result<PolicyConfig, Self::Error> {
        self.read_or("policy.json", PolicyConfig::default)
    }
}

/// Persists state snapshots as pretty-printed JSON files.
pub struct JsonDirStorage {
    dir: PathBuf,
}

impl JsonDirStorage {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl SnapshotStorage for JsonDirStorage {
    type Error = StoreError;

    fn save_state(&self, name: &str, state: &CantinaState) -> Result<(), Self::Error> {
        fs::create_dir_all(&self.dir)?;
        let raw = serde_json::to_string_pretty(state)?;
        fs::write(self.path_for(name), raw)?;
        Ok(())
    }

    fn load_state(&self, name: &str) -> Result<Option<CantinaState>, Self::Error> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn delete_state(&self, name: &str) -> Result<(), Self::Error> {
        let path = self.path_for(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
