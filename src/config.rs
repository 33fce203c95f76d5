use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default aggregate size ceiling for one upload request.
pub const DEFAULT_UPLOAD_LIMIT: usize = 10 << 20;

/// Server configuration, loaded from TOML and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address for the HTTP/WebSocket listener.
    pub bind: SocketAddr,
    /// Root of workspace storage; also holds `states.db`.
    pub storage_dir: PathBuf,
    /// Directory static assets are served from.
    pub asset_root: PathBuf,
    /// Aggregate body ceiling for one upload request, in bytes.
    pub upload_limit_bytes: usize,
    /// Fixed version string for the index page. When unset the version is
    /// resolved from `git describe` on each request.
    pub version: Option<String>,
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8101)),
            storage_dir: PathBuf::from("storage"),
            asset_root: PathBuf::from("."),
            upload_limit_bytes: DEFAULT_UPLOAD_LIMIT,
            version: None,
            tools: ToolsConfig::default(),
        }
    }
}

/// External executables backing the default collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub onset_detector: String,
    pub merger: String,
    pub archiver: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            onset_detector: "aubioonset".into(),
            merger: "sox".into(),
            archiver: "zip".into(),
        }
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(std::path::PathBuf, std::io::Error),
    ParseFailed(std::path::PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
