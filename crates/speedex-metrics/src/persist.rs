//! State file: the most recent result as JSON on disk.
//!
//! Lets a one-shot `speedexd once` hand its result to a running server,
//! and lets a restarted server come up with its last result.
//!
//! A sibling `.lock` file carries an advisory exclusive lock for the
//! duration of a measurement, so processes sharing a state file never run
//! the tool at the same time.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use thiserror::Error;

use speedex_core::SpeedtestResult;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state file i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not a valid result: {0}")]
    Format(#[from] serde_json::Error),

    #[error("state file lock task failed: {0}")]
    LockTask(#[from] tokio::task::JoinError),
}

/// Held while this process measures for the state file. Dropping it
/// closes the file and releases the lock.
#[derive(Debug)]
pub struct FlightLock {
    _file: File,
}

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Take the exclusive measurement lock, waiting for another holder.
    pub async fn lock(&self) -> Result<FlightLock, PersistError> {
        let path = self.lock_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await??;
        Ok(FlightLock { _file: file })
    }

    /// Write `result`, replacing the previous file in one rename.
    pub async fn save(&self, result: &SpeedtestResult) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(result)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read the stored result. A missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<SpeedtestResult>, PersistError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
