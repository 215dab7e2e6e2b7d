//! Durable key-value slots backing the run store and the dismissal set.
//!
//! A slot holds one string value under a fixed name. Several writers may share
//! a slot (two terminals pointed at the same state directory), so callers are
//! expected to re-read before writing rather than trusting a cached copy.

use crate::error::{Result, RunwatchError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub trait Slot: Send + Sync {
    /// Current value, or `None` if nothing has been written yet.
    fn read(&self) -> Result<Option<String>>;

    fn write(&self, value: &str) -> Result<()>;

    fn remove(&self) -> Result<()>;
}

/// File-backed slot. Writes land in a sibling temp file and are renamed into
/// place so readers never see a partial value.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, err: std::io::Error) -> RunwatchError {
        RunwatchError::Storage {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

impl Slot for FileSlot {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.storage_error(err)),
        }
    }

    fn write(&self, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.storage_error(e))?;
        }
        let temp = self.temp_path();
        fs::write(&temp, value).map_err(|e| self.storage_error(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.storage_error(e))?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.storage_error(err)),
        }
    }
}

/// In-memory slot. Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot {
    value: Arc<Mutex<Option<String>>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Slot for MemorySlot {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.value.lock().map(|v| v.clone()).unwrap_or(None))
    }

    fn write(&self, value: &str) -> Result<()> {
        if let Ok(mut guard) = self.value.lock() {
            *guard = Some(value.to_string());
        }
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if let Ok(mut guard) = self.value.lock() {
            *guard = None;
        }
        Ok(())
    }
}
