//! Rescan checkpoint sidecar file.
//!
//! After a successful scan the chain height and wall-clock time are written
//! to `satbridge_rescan.json`, next to the main configuration file, so a
//! restart can resume instead of rescanning from the wallet birthday.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use crate::error::CoreError;

pub const CHECKPOINT_FILE_NAME: &str = "satbridge_rescan.json";

/// Directories searched for configuration and checkpoint files, in order:
/// current directory, the platform config directory, the home directory.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Some(config) = dirs::config_dir() {
        dirs.push(config.join("satbridge"));
    }
    if let Some(home) = dirs::home_dir() {
        dirs.push(home);
    }
    dirs
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescanCheckpoint {
    pub last_block_height: u64,
    /// RFC 3339 rendering of `timestamp`.
    pub last_sync_time: String,
    /// UNIX seconds.
    pub timestamp: u64,
    /// Version of the bridge that wrote the record.
    pub version: String,
}

impl RescanCheckpoint {
    pub fn new(last_block_height: u64, at: OffsetDateTime) -> Result<Self, CoreError> {
        let last_sync_time = at
            .format(&Rfc3339)
            .map_err(|e| CoreError::Config(format!("cannot format checkpoint time: {e}")))?;
        Ok(Self {
            last_block_height,
            last_sync_time,
            timestamp: u64::try_from(at.unix_timestamp()).unwrap_or(0),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    /// `timestamp` as a descriptor age.
    pub fn age(&self) -> u32 {
        u32::try_from(self.timestamp).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Existing checkpoint from the search directories, or a fresh one next
    /// to `config_path`.
    pub fn locate(config_path: &Path) -> Self {
        Self::locate_in(&search_dirs(), config_path)
    }

    fn locate_in(dirs: &[PathBuf], config_path: &Path) -> Self {
        dirs.iter()
            .map(|dir| dir.join(CHECKPOINT_FILE_NAME))
            .find(|candidate| candidate.is_file())
            .map(Self::new)
            .unwrap_or_else(|| {
                let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
                Self::new(dir.join(CHECKPOINT_FILE_NAME))
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no checkpoint has been written yet.
    pub fn load(&self) -> Result<Option<RescanCheckpoint>, CoreError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Overwrite the checkpoint. Written to a temporary file first and
    /// renamed so a crash never leaves a truncated record.
    pub fn save(&self, checkpoint: &RescanCheckpoint) -> Result<(), CoreError> {
        let body = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        info!(
            path = %self.path.display(),
            height = checkpoint.last_block_height,
            "rescan checkpoint saved"
        );
        Ok(())
    }
}
