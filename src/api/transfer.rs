//! Bulk upload and download.
//!
//! Neither endpoint holds protocol state. Both report to the caller's duplex
//! channel through the registry, addressed by the `id` query parameter.

use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::error::ApiError;
use super::{AppState, ClientParams};
use crate::connections::ConnectionRegistry;
use crate::media;
use crate::protocol::WireMessage;
use crate::storage::base_name;

/// Multipart field carrying files.
const FILES_FIELD: &str = "files";

fn form_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::InvalidForm(err.body_text())
    }
}

/// Store every `files` part under the caller's workspace, reporting cumulative
/// progress per chunk, then hand each stored file to the job runner.
///
/// Responds once all parts are on disk; processing outcomes arrive later as
/// `processed` or `error` on the duplex channel.
pub(super) async fn upload(
    State(state): State<AppState>,
    Query(params): Query<ClientParams>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (client_id, place) = params.require()?;
    let mut multipart = multipart.map_err(|e| ApiError::InvalidForm(e.body_text()))?;

    let mut stored = 0usize;
    while let Some(mut field) = multipart.next_field().await.map_err(form_error)? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let raw_name = field.file_name().unwrap_or_default().to_string();
        let filename = base_name(&raw_name)?;

        let dir = state.storage.asset_dir(&place, &filename)?;
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ApiError::StorageFailed(format!("could not create {}: {e}", dir.display()))
        })?;
        let path = dir.join(&filename);
        tracing::info!(%client_id, %place, path = %path.display(), "receiving upload");

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            ApiError::StorageFailed(format!("could not create {}: {e}", path.display()))
        })?;
        let mut written: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(form_error)? {
            file.write_all(&chunk).await.map_err(|e| {
                ApiError::StorageFailed(format!("could not write {}: {e}", path.display()))
            })?;
            written += chunk.len() as u64;
            state.connections.send(&client_id, WireMessage::progress(written));
        }
        file.flush().await.map_err(|e| {
            ApiError::StorageFailed(format!("could not write {}: {e}", path.display()))
        })?;
        drop(file);

        tracing::debug!(%client_id, path = %path.display(), bytes = written, "upload stored");
        state.jobs.process(&client_id, &filename, path);
        stored += 1;
    }

    tracing::info!(%client_id, %place, files = stored, "upload complete");
    Ok(Json(json!({ "success": true })))
}

/// Sends `processingstop` when dropped, so every exit path of a download
/// (success, packaging failure, or a dropped request) closes the bracket.
struct ProcessingGuard {
    connections: ConnectionRegistry,
    client_id: String,
}

impl ProcessingGuard {
    fn start(connections: ConnectionRegistry, client_id: String) -> Self {
        connections.send(&client_id, WireMessage::new("processingstart"));
        Self {
            connections,
            client_id,
        }
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.connections
            .send(&self.client_id, WireMessage::new("processingstop"));
    }
}

/// Removes a packed archive once the response body that streams it is gone.
struct ArchiveFile {
    path: PathBuf,
}

impl Drop for ArchiveFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(archive = %self.path.display(), error = %e, "could not remove archive");
        }
    }
}

/// Package the caller's workspace (filtered by the body's selection) and
/// stream the archive back as an attachment.
pub(super) async fn download(
    State(state): State<AppState>,
    Query(params): Query<ClientParams>,
    selection: Bytes,
) -> Result<Response, ApiError> {
    let (client_id, place) = params.require()?;
    let workspace = state.storage.workspace_dir(&place)?;
    let out_dir = state.storage.archive_dir();

    let archive = {
        let _processing = ProcessingGuard::start(state.connections.clone(), client_id.clone());
        let packer = state.toolkit.packer.clone();
        media::blocking(move || packer.pack(&workspace, &selection, &out_dir))
            .await
            .map_err(|e| {
                tracing::error!(%client_id, %place, error = %e, "packaging failed");
                ApiError::PackFailed(e.to_string())
            })?
    };

    let archive = ArchiveFile { path: archive };
    let file = tokio::fs::File::open(&archive.path).await.map_err(|e| {
        ApiError::InternalError(format!("could not open {}: {e}", archive.path.display()))
    })?;
    tracing::info!(%client_id, %place, archive = %archive.path.display(), "sending archive");

    // The body owns the guard, so the file outlives every chunk it serves.
    let body = Body::from_stream(ReaderStream::new(file).map(move |chunk| {
        let _keep = &archive;
        chunk
    }));
    let archive_name = format!("{place}.zip");
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{archive_name}\""),
            ),
        ],
        body,
    )
        .into_response())
}
