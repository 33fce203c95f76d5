//! Action routing for one duplex channel.
//!
//! [`Dispatcher::handle`] takes one decoded record and returns at most one
//! reply for the same channel. Work that outlives the request (processing a
//! merge result) is handed to the job runner and reports back on its own.

use std::path::PathBuf;

use crate::codename;
use crate::media::{self, MediaError, MediaHandle};
use crate::protocol::{Action, ProtocolError, WireMessage};
use crate::state_store::StoreError;
use crate::storage::StorageError;

use super::AppState;

/// How many fresh codenames a merge tries before giving up on finding an
/// unused output name.
const MERGE_NAME_ATTEMPTS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no state for {0}")]
    StateNotFound(String),
    #[error("could not create {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no unused name available for merged file")]
    MergeNameExhausted,
}

pub struct Dispatcher {
    state: AppState,
    client_id: String,
    place: String,
}

impl Dispatcher {
    pub fn new(state: AppState, client_id: String, place: String) -> Self {
        Self {
            state,
            client_id,
            place,
        }
    }

    /// Route one inbound record. Every failure becomes an `error` reply.
    pub async fn handle(&self, mut msg: WireMessage) -> Option<WireMessage> {
        msg.normalize_filename();
        tracing::debug!(client_id = %self.client_id, action = %msg.action, filename = %msg.filename, "message");

        let filename = msg.filename.clone();
        let result = match Action::try_from(&msg) {
            Ok(action) => self.run(action, msg).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    client_id = %self.client_id,
                    place = %self.place,
                    filename = %filename,
                    error = %e,
                    "action failed"
                );
                Some(WireMessage::error(&filename, e.to_string()))
            }
        }
    }

    async fn run(&self, action: Action, msg: WireMessage) -> Result<Option<WireMessage>, DispatchError> {
        match action {
            Action::Connected => Ok(Some(WireMessage::connected(&self.state.server_id))),

            Action::GetInfo { filename } => {
                let descriptor = self.with_media(&filename, |h| h.descriptor()).await?;
                Ok(Some(WireMessage {
                    filename,
                    file: descriptor,
                    success: true,
                    ..WireMessage::new("setinfo")
                }))
            }

            Action::OnsetDetect {
                filename,
                sensitivity,
            } => {
                let detector = self.state.toolkit.onsets.clone();
                let onsets = self
                    .with_media(&filename, move |h| detector.detect(&h.decoded_path(), sensitivity))
                    .await?;
                tracing::trace!(client_id = %self.client_id, count = onsets.len(), "onsets");
                Ok(Some(WireMessage {
                    filename,
                    slice_start: onsets,
                    ..WireMessage::new("onsetdetect")
                }))
            }

            Action::SetSlices {
                filename,
                starts,
                stops,
            } => {
                let types = self
                    .with_media(&filename, move |h| h.set_slices(&starts, &stops))
                    .await?;
                Ok(Some(WireMessage {
                    action: "slicetype".into(),
                    slice_type: types,
                    ..msg
                }))
            }

            Action::SetSplicePlayback { filename, mode } => {
                self.with_media(&filename, move |h| h.set_splice_playback(mode)).await?;
                Ok(None)
            }

            Action::SetOneshot { filename, enabled } => {
                self.with_media(&filename, move |h| h.set_oneshot(enabled)).await?;
                Ok(None)
            }

            Action::SetTempoMatch { filename, enabled } => {
                self.with_media(&filename, move |h| h.set_tempo_match(enabled)).await?;
                Ok(None)
            }

            Action::MergeFiles { filenames } => {
                self.merge(&filenames).await?;
                Ok(None)
            }

            Action::UpdateState { place, state } => {
                let place = place.unwrap_or_else(|| self.place.clone());
                self.state.states.put(&place, &state).await?;
                tracing::debug!(client_id = %self.client_id, %place, bytes = state.len(), "state updated");
                Ok(None)
            }

            Action::GetState { place } => {
                let place = place.unwrap_or_else(|| self.place.clone());
                match self.state.states.get(&place).await? {
                    Some(state) => Ok(Some(WireMessage { state, ..msg })),
                    None => Err(DispatchError::StateNotFound(place)),
                }
            }
        }
    }

    /// Resolve `filename` in this channel's workspace and run `f` against its
    /// handle on the blocking pool.
    async fn with_media<T, F>(&self, filename: &str, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&mut dyn MediaHandle) -> Result<T, MediaError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.state.storage.asset_path(&self.place, filename)?;
        let store = self.state.toolkit.media.clone();
        let value = media::blocking(move || {
            let mut handle = store.get(&path)?;
            f(handle.as_mut())
        })
        .await?;
        Ok(value)
    }

    /// Merge `filenames` into a freshly named asset, then process it in the
    /// background. The merge itself completes before the next message is read.
    async fn merge(&self, filenames: &[String]) -> Result<(), DispatchError> {
        let inputs = filenames
            .iter()
            .map(|name| self.state.storage.asset_path(&self.place, name))
            .collect::<Result<Vec<_>, _>>()?;

        let (merged_name, merged_dir) = self.unused_merge_name()?;
        tokio::fs::create_dir_all(&merged_dir)
            .await
            .map_err(|source| DispatchError::CreateDir {
                path: merged_dir.clone(),
                source,
            })?;
        let output = merged_dir.join(&merged_name);

        tracing::info!(client_id = %self.client_id, place = %self.place, inputs = ?filenames, output = %merged_name, "merging");
        let merger = self.state.toolkit.merger.clone();
        let merge_output = output.clone();
        let merged = media::blocking(move || merger.merge(&inputs, &merge_output)).await;
        if let Err(e) = merged {
            // Leave no empty asset directory behind for a merge that never produced output.
            let _ = tokio::fs::remove_dir_all(&merged_dir).await;
            return Err(e.into());
        }

        self.state.jobs.process(&self.client_id, &merged_name, output);
        Ok(())
    }

    fn unused_merge_name(&self) -> Result<(String, PathBuf), DispatchError> {
        for _ in 0..MERGE_NAME_ATTEMPTS {
            let name = format!("{}.aif", codename::generate());
            let dir = self.state.storage.asset_dir(&self.place, &name)?;
            if !dir.exists() {
                return Ok((name, dir));
            }
        }
        Err(DispatchError::MergeNameExhausted)
    }
}
