//! Detached post-upload / post-merge processing.
//!
//! Jobs are fire-and-forget: nothing tracks them after spawn and nothing can
//! cancel them. Their only output is a notification addressed to a client id,
//! queued to a forwarder task that hands it to [`ConnectionRegistry::send`].
//! A client that disconnected in the meantime simply never sees it.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connections::ConnectionRegistry;
use crate::media::{self, MediaStore};
use crate::protocol::WireMessage;

/// A message for a client, produced outside that client's dispatcher.
#[derive(Debug, Clone)]
pub struct Notification {
    pub client_id: String,
    pub message: WireMessage,
}

#[derive(Clone)]
pub struct JobRunner {
    media: Arc<dyn MediaStore>,
    events: mpsc::UnboundedSender<Notification>,
}

impl JobRunner {
    /// Create a runner and spawn the task forwarding its notifications into
    /// `connections`. The forwarder exits once every runner clone is dropped.
    pub fn spawn(connections: ConnectionRegistry, media: Arc<dyn MediaStore>) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_notifications(rx, connections));
        Self { media, events }
    }

    /// Queue `message` for `client_id`.
    pub fn notify(&self, client_id: &str, message: WireMessage) {
        let notification = Notification {
            client_id: client_id.to_string(),
            message,
        };
        if self.events.send(notification).is_err() {
            tracing::warn!(client_id, "notification forwarder stopped, dropping message");
        }
    }

    /// Resolve the stored file at `path` in the background and report the
    /// outcome to `client_id` as `processed` or `error`, once.
    pub fn process(&self, client_id: &str, display_name: &str, path: PathBuf) -> JoinHandle<()> {
        let runner = self.clone();
        let client_id = client_id.to_string();
        let display_name = display_name.to_string();
        tokio::spawn(async move {
            tracing::debug!(%client_id, path = %path.display(), "processing file from {display_name}");
            let store = runner.media.clone();
            let lookup_path = path.clone();
            let result = media::blocking(move || {
                store.get(&lookup_path).and_then(|handle| handle.descriptor())
            })
            .await;

            let message = match result {
                Ok(descriptor) => {
                    tracing::info!(%client_id, path = %path.display(), "processed");
                    WireMessage::processed(&display_name, descriptor)
                }
                Err(e) => {
                    tracing::error!(%client_id, path = %path.display(), error = %e, "processing failed");
                    WireMessage::error(
                        &display_name,
                        format!("could not process '{display_name}': {e}"),
                    )
                }
            };
            runner.notify(&client_id, message);
        })
    }
}

async fn forward_notifications(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    connections: ConnectionRegistry,
) {
    while let Some(Notification { client_id, message }) = rx.recv().await {
        connections.send(&client_id, message);
    }
    tracing::debug!("notification forwarder exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{outbound_channel, OutboundReceiver, PROGRESS_BACKLOG_LIMIT};
    use crate::media::{MediaError, MediaHandle};
    use std::path::Path;
    use std::time::Duration;

    struct StaticHandle {
        encodable: bool,
    }

    impl MediaHandle for StaticHandle {
        fn descriptor(&self) -> Result<serde_json::Value, MediaError> {
            if !self.encodable {
                return Err(MediaError::Encode {
                    path: PathBuf::from("kick.wav.json"),
                    reason: "non-finite tempo".into(),
                });
            }
            Ok(serde_json::json!({"duration": 1.5}))
        }
        fn decoded_path(&self) -> PathBuf {
            PathBuf::new()
        }
        fn set_slices(&mut self, starts: &[f64], _: &[f64]) -> Result<Vec<i64>, MediaError> {
            Ok(vec![0; starts.len()])
        }
        fn set_oneshot(&mut self, _: bool) -> Result<(), MediaError> {
            Ok(())
        }
        fn set_tempo_match(&mut self, _: bool) -> Result<(), MediaError> {
            Ok(())
        }
        fn set_splice_playback(&mut self, _: i64) -> Result<(), MediaError> {
            Ok(())
        }
    }

    /// Resolves any path ending in `.wav`.
    struct WavOnly;

    impl MediaStore for WavOnly {
        fn get(&self, path: &Path) -> Result<Box<dyn MediaHandle>, MediaError> {
            if path.extension().is_some_and(|e| e == "wav") {
                Ok(Box::new(StaticHandle { encodable: true }))
            } else {
                Err(MediaError::NotFound(path.to_path_buf()))
            }
        }
    }

    /// Resolves everything to a handle whose descriptor cannot be encoded.
    struct Unencodable;

    impl MediaStore for Unencodable {
        fn get(&self, _: &Path) -> Result<Box<dyn MediaHandle>, MediaError> {
            Ok(Box::new(StaticHandle { encodable: false }))
        }
    }

    async fn recv(rx: &mut OutboundReceiver) -> WireMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn success_sends_processed_with_descriptor() {
        let connections = ConnectionRegistry::new();
        let (tx, mut rx) = outbound_channel();
        let _conn = connections.register("c1", tx);
        let runner = JobRunner::spawn(connections, Arc::new(WavOnly));

        runner
            .process("c1", "kick.wav", PathBuf::from("s/p/kick.wav/kick.wav"))
            .await
            .unwrap();

        let msg = recv(&mut rx).await;
        assert_eq!(msg.action, "processed");
        assert_eq!(msg.filename, "kick.wav");
        assert_eq!(msg.file["duration"], 1.5);
    }

    #[tokio::test]
    async fn failure_sends_error_once() {
        let connections = ConnectionRegistry::new();
        let (tx, mut rx) = outbound_channel();
        let _conn = connections.register("c1", tx);
        let runner = JobRunner::spawn(connections, Arc::new(WavOnly));

        runner
            .process("c1", "notes.txt", PathBuf::from("s/p/notes.txt/notes.txt"))
            .await
            .unwrap();

        let msg = recv(&mut rx).await;
        assert_eq!(msg.action, "error");
        assert_eq!(msg.filename, "notes.txt");
        assert!(msg.error.starts_with("could not process 'notes.txt'"));
        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn unencodable_descriptor_is_an_error_not_null() {
        let connections = ConnectionRegistry::new();
        let (tx, mut rx) = outbound_channel();
        let _conn = connections.register("c1", tx);
        let runner = JobRunner::spawn(connections, Arc::new(Unencodable));

        runner
            .process("c1", "kick.wav", PathBuf::from("s/p/kick.wav/kick.wav"))
            .await
            .unwrap();

        let msg = recv(&mut rx).await;
        assert_eq!(msg.action, "error");
        assert!(msg.error.contains("non-finite tempo"), "{}", msg.error);
        assert!(msg.file.is_null());
    }

    #[tokio::test]
    async fn disconnected_client_is_tolerated() {
        let connections = ConnectionRegistry::new();
        let runner = JobRunner::spawn(connections.clone(), Arc::new(WavOnly));

        runner
            .process("gone", "kick.wav", PathBuf::from("kick.wav"))
            .await
            .expect("job must not panic without a connection");
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn notification_follows_reconnect() {
        let connections = ConnectionRegistry::new();
        let (old_tx, _old_rx) = outbound_channel();
        let old = connections.register("c1", old_tx);
        connections.unregister(&old);

        let (tx, mut rx) = outbound_channel();
        let _conn = connections.register("c1", tx);

        let runner = JobRunner::spawn(connections, Arc::new(WavOnly));
        runner.notify("c1", WireMessage::new("processingstart"));
        assert_eq!(recv(&mut rx).await.action, "processingstart");
    }

    #[tokio::test]
    async fn outcome_reaches_reader_that_fell_behind() {
        let connections = ConnectionRegistry::new();
        let (tx, mut rx) = outbound_channel();
        let _conn = connections.register("c1", tx);
        for n in 0..3000u64 {
            connections.send("c1", WireMessage::progress(n));
        }
        let runner = JobRunner::spawn(connections, Arc::new(WavOnly));

        runner
            .process("c1", "kick.wav", PathBuf::from("s/p/kick.wav/kick.wav"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut actions = Vec::new();
        while let Some(msg) = rx.try_recv() {
            actions.push(msg.action);
        }
        assert_eq!(actions.len(), PROGRESS_BACKLOG_LIMIT + 1);
        assert_eq!(actions.last().map(String::as_str), Some("processed"));
    }
}
