//! On-disk layout for uploaded and generated audio.
//!
//! A file `name` in workspace `place` lives at `<root>/<place>/<name>/<name>`.
//! Both components are reduced to their final path segment before they touch
//! the filesystem, so a client-supplied path can never escape its workspace.

use std::path::{Path, PathBuf};

/// Directory under the storage root holding archives built for download.
const ARCHIVE_DIR: &str = ".archives";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

/// Reduce a client-supplied name to its final path segment.
///
/// Both `/` and `\` count as separators. Returns an error when nothing usable
/// remains (empty, `.` or `..`).
pub fn base_name(raw: &str) -> Result<String, StorageError> {
    let base = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    match base {
        "" | "." | ".." => Err(StorageError::InvalidName(raw.to_string())),
        name => Ok(name.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every asset of one workspace.
    pub fn workspace_dir(&self, place: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(base_name(place)?))
    }

    /// Directory holding one asset (and whatever the media store derives from it).
    pub fn asset_dir(&self, place: &str, filename: &str) -> Result<PathBuf, StorageError> {
        Ok(self.workspace_dir(place)?.join(base_name(filename)?))
    }

    /// Full path of the stored asset itself.
    pub fn asset_path(&self, place: &str, filename: &str) -> Result<PathBuf, StorageError> {
        let name = base_name(filename)?;
        Ok(self.workspace_dir(place)?.join(&name).join(&name))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    /// Path of the SQLite database backing the state store.
    pub fn state_db_path(&self) -> PathBuf {
        self.root.join("states.db")
    }
}
