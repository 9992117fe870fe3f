use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::StoreError;

/// Fixed key names for the persisted cells.
pub const AUTH_KEY: &str = "auth";
pub const REGION_KEY: &str = "region";
pub const THEME_KEY: &str = "theme";
pub const ENROLLMENTS_KEY: &str = "enrollments";
pub const LAB_RUNS_KEY: &str = "lab-runs";

/// Key-value storage for JSON documents. Each key is an independent cell.
pub trait CellStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub type Db = Arc<dyn CellStore>;

/// Opens the file-backed cell store rooted at `dir`, creating it if needed.
pub fn connect(dir: impl Into<PathBuf>) -> Result<Db, StoreError> {
    Ok(Arc::new(FileCells::open(dir)?))
}

/// One `<key>.json` file per cell.
#[derive(Debug, Clone)]
pub struct FileCells {
    dir: PathBuf,
}

impl FileCells {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl CellStore for FileCells {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // write-then-rename so a crash never leaves a half-written cell.
        // One temp file per write: concurrent savers of a key never share it.
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.{}.json.tmp", Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, value).and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!(key, bytes = value.len(), "cell saved");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory cells, used by tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryCells {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryCells {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Db {
        Arc::new(Self::new())
    }
}

impl CellStore for MemoryCells {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        guard.remove(key);
        Ok(())
    }
}
