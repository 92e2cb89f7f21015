//! Log manager (§4.3): a concurrent map from station name to an open
//! append-mode file.
//!
//! The log path is stable per station so external tools (status follow,
//! log tailers) can find it without talking to this process.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use dashmap::DashMap;

use crate::error::LineError;

/// Caches one open file handle per station under a fixed temp-directory
/// location (`<tmpdir>/line-<name>.log`).
#[derive(Debug, Default)]
pub struct LogManager {
    handles: DashMap<String, File>,
    dir: Option<PathBuf>,
}

impl LogManager {
    /// Logs under `std::env::temp_dir()`.
    pub fn new() -> Self {
        LogManager {
            handles: DashMap::new(),
            dir: None,
        }
    }

    /// Logs under an explicit directory (tests use this to avoid sharing
    /// the system temp directory across runs).
    pub fn with_dir(dir: PathBuf) -> Self {
        LogManager {
            handles: DashMap::new(),
            dir: Some(dir),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        dir.join(format!("line-{name}.log"))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.path_for(name)
    }

    /// Closes the cached handle (if any), reopens the path truncated, and
    /// caches the new handle.
    pub fn truncate(&self, name: &str) -> Result<(), LineError> {
        self.handles.remove(name);
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LineError::StateIo {
                path: parent.to_path_buf(),
                detail: e.to_string(),
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| LineError::StateIo {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        self.handles.insert(name.to_string(), file);
        Ok(())
    }

    /// Appends `text` to the station's log, opening (append, create) on
    /// first use.
    pub fn append(&self, name: &str, text: &str) -> Result<(), LineError> {
        if !self.handles.contains_key(name) {
            let path = self.path_for(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LineError::StateIo {
                    path: parent.to_path_buf(),
                    detail: e.to_string(),
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| LineError::StateIo {
                    path: path.clone(),
                    detail: e.to_string(),
                })?;
            self.handles.insert(name.to_string(), file);
        }
        let mut entry = self.handles.get_mut(name).expect("just inserted above");
        entry.write_all(text.as_bytes()).map_err(|e| LineError::StateIo {
            path: self.path_for(name),
            detail: e.to_string(),
        })
    }

    pub fn close_all(&self) {
        self.handles.clear();
    }
}
