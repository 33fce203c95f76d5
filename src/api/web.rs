use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::path::{Component, Path, PathBuf};

use super::error::ApiError;
use super::AppState;

const INDEX: &str = "static/index.html";
const FAVICON: &str = "static/favicon.ico";
const VERSION_PLACEHOLDER: &str = "VERSION_CURRENT";

/// Static files served from a directory on disk.
pub struct Assets {
    root: PathBuf,
    version: Option<String>,
}

impl Assets {
    /// `version` pins the string substituted into the index page; without it
    /// the version is resolved from `git describe` on each request.
    pub fn new(root: impl Into<PathBuf>, version: Option<String>) -> Self {
        Self {
            root: root.into(),
            version,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Best effort: `None` when the version cannot be determined.
    pub async fn version(&self) -> Option<String> {
        if let Some(version) = &self.version {
            return Some(version.clone());
        }
        let output = tokio::process::Command::new("git")
            .args(["describe", "--tags", "--abbrev=0", "--always"])
            .current_dir(&self.root)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!version.is_empty()).then_some(version)
            }
            Ok(out) => {
                tracing::warn!(status = %out.status, "git describe failed, serving index without version");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not run git, serving index without version");
                None
            }
        }
    }
}

/// Map a request path to an asset path relative to the asset root.
///
/// Anything without an extension is a client-side route and gets the index
/// page. Only plain path segments are accepted.
fn resolve(uri_path: &str) -> Option<&str> {
    let path = uri_path.trim_start_matches('/');
    if path.is_empty() || !path.contains('.') {
        return Some(INDEX);
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(path)
}

pub async fn web_asset(State(state): State<AppState>, uri: Uri) -> Result<Response, ApiError> {
    let rel = resolve(uri.path()).ok_or(ApiError::NotFound)?;
    let full = state.assets.root().join(rel);
    let mut content = match tokio::fs::read(&full).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %full.display(), "no such asset");
            return Err(ApiError::NotFound);
        }
        Err(e) => {
            return Err(ApiError::InternalError(format!(
                "could not read {}: {e}",
                full.display()
            )))
        }
    };

    if rel == INDEX {
        if let Some(version) = state.assets.version().await {
            content = String::from_utf8_lossy(&content)
                .replacen(VERSION_PLACEHOLDER, &version, 2)
                .into_bytes();
        }
    }

    let mime = mime_guess::from_path(rel).first_or_octet_stream().to_string();
    tracing::trace!(path = rel, %mime, "serving asset");
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, mime)], content).into_response())
}

pub async fn favicon(State(state): State<AppState>) -> Result<Response, ApiError> {
    let path = state.assets.root().join(FAVICON);
    let content = tokio::fs::read(&path).await.map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "favicon unavailable");
        ApiError::NotFound
    })?;
    Ok(([(header::CONTENT_TYPE, "image/x-icon")], content).into_response())
}
