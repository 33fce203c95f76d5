//! Interfaces to the audio collaborators: descriptor storage, onset
//! analysis, merging and archive packaging.
//!
//! The orchestration layer only talks to these traits. Working adapters live
//! in [`sidecar`] and [`tools`]; tests substitute in-process fakes.

pub mod sidecar;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("no such file: {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("could not encode descriptor {}: {reason}", .path.display())]
    Encode { path: PathBuf, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("onset detection failed: {0}")]
    Analysis(String),
    #[error("merge failed: {0}")]
    Merge(String),
    #[error("packaging failed: {0}")]
    Pack(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A resolved audio asset. The descriptor is opaque to the orchestration
/// layer and is forwarded to clients verbatim.
pub trait MediaHandle: Send {
    fn descriptor(&self) -> Result<serde_json::Value, MediaError>;

    /// Path of the decoded audio that analysis should read.
    fn decoded_path(&self) -> PathBuf;

    /// Apply slice boundaries, returning one type code per slice.
    fn set_slices(&mut self, starts: &[f64], stops: &[f64]) -> Result<Vec<i64>, MediaError>;

    fn set_oneshot(&mut self, enabled: bool) -> Result<(), MediaError>;

    fn set_tempo_match(&mut self, enabled: bool) -> Result<(), MediaError>;

    fn set_splice_playback(&mut self, mode: i64) -> Result<(), MediaError>;
}

pub trait MediaStore: Send + Sync {
    fn get(&self, path: &Path) -> Result<Box<dyn MediaHandle>, MediaError>;
}

pub trait OnsetDetector: Send + Sync {
    /// Onset timestamps (seconds) found in `path`.
    fn detect(&self, path: &Path, sensitivity: i64) -> Result<Vec<f64>, MediaError>;
}

pub trait Merger: Send + Sync {
    /// Concatenate `inputs` into `output`.
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError>;
}

pub trait Packer: Send + Sync {
    /// Archive the entries of `dir` chosen by `selection`, writing the archive
    /// into `out_dir` and returning its path.
    fn pack(&self, dir: &Path, selection: &[u8], out_dir: &Path) -> Result<PathBuf, MediaError>;
}

/// The set of collaborators a server instance works with.
#[derive(Clone)]
pub struct Toolkit {
    pub media: Arc<dyn MediaStore>,
    pub onsets: Arc<dyn OnsetDetector>,
    pub merger: Arc<dyn Merger>,
    pub packer: Arc<dyn Packer>,
}

impl Toolkit {
    /// Sidecar descriptors plus the external command-line tools named in
    /// `tools`.
    pub fn from_config(tools: &crate::config::ToolsConfig) -> Self {
        Self {
            media: Arc::new(sidecar::SidecarMediaStore),
            onsets: Arc::new(tools::CommandOnsetDetector::new(&tools.onset_detector)),
            merger: Arc::new(tools::CommandMerger::new(&tools.merger)),
            packer: Arc::new(tools::CommandPacker::new(&tools.archiver)),
        }
    }
}

/// Run a blocking collaborator call off the async reactor.
pub async fn blocking<T, F>(f: F) -> Result<T, MediaError>
where
    F: FnOnce() -> Result<T, MediaError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
