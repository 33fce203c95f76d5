use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::WireMessage;

/// Backlog above which `progress` messages are shed.
///
/// Upload progress is the chattiest producer (one message per body chunk).
/// Every other message is always queued, so a slow reader still learns how
/// its upload or download ended.
pub const PROGRESS_BACKLOG_LIMIT: usize = 2048;

const PROGRESS: &str = "progress";

/// Sending half of one channel's outbound queue.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<WireMessage>,
    backlog: Arc<AtomicUsize>,
}

/// Receiving half, owned by the channel's writer task.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<WireMessage>,
    backlog: Arc<AtomicUsize>,
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<WireMessage> {
        let msg = self.rx.recv().await?;
        self.backlog.fetch_sub(1, Ordering::AcqRel);
        Some(msg)
    }

    pub fn try_recv(&mut self) -> Option<WireMessage> {
        let msg = self.rx.try_recv().ok()?;
        self.backlog.fetch_sub(1, Ordering::AcqRel);
        Some(msg)
    }

    /// Messages queued and not yet taken by the writer.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }
}

/// Create the outbound queue for one duplex channel. The receiver belongs to
/// the channel's writer task, which is the channel's only writer.
pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    (
        OutboundSender {
            tx,
            backlog: backlog.clone(),
        },
        OutboundReceiver { rx, backlog },
    )
}

struct Entry {
    conn_id: u64,
    tx: OutboundSender,
    evicted: CancellationToken,
}

struct RegistryInner {
    entries: HashMap<String, Entry>,
    next_id: u64,
}

/// Maps client ids to their live duplex channel.
///
/// At most one channel is registered per client id. Registration, removal and
/// message delivery all happen under one lock; delivery only enqueues onto the
/// channel's outbound queue, so holding the lock never waits on the network.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The dispatcher's handle on its own registration.
pub struct Connection {
    client_id: String,
    conn_id: u64,
    tx: OutboundSender,
    evicted: CancellationToken,
}

impl Connection {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn id(&self) -> u64 {
        self.conn_id
    }

    /// Queue a reply on this channel. Returns false if the writer is gone or
    /// a `progress` message was shed.
    pub fn send(&self, msg: WireMessage) -> bool {
        enqueue(&self.tx, &self.client_id, msg)
    }

    /// Resolves once a newer registration has replaced this one.
    pub async fn evicted(&self) {
        self.evicted.cancelled().await
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }
}

fn enqueue(out: &OutboundSender, client_id: &str, msg: WireMessage) -> bool {
    if msg.action == PROGRESS && out.backlog.load(Ordering::Acquire) >= PROGRESS_BACKLOG_LIMIT {
        tracing::debug!(client_id, "reader is behind, shedding progress message");
        return false;
    }
    out.backlog.fetch_add(1, Ordering::AcqRel);
    match out.tx.send(msg) {
        Ok(()) => true,
        Err(mpsc::error::SendError(msg)) => {
            out.backlog.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(client_id, action = %msg.action, "channel writer gone, dropping message");
            false
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                entries: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Install `tx` as the channel for `client_id`.
    ///
    /// Any previous registration under the same id is evicted: its token is
    /// cancelled so its dispatcher tears down, and the registry's copy of its
    /// sender is dropped.
    pub fn register(&self, client_id: &str, tx: OutboundSender) -> Connection {
        let evicted = CancellationToken::new();
        let mut inner = self.inner.lock();
        let conn_id = inner.next_id;
        inner.next_id += 1;

        let previous = inner.entries.insert(
            client_id.to_string(),
            Entry {
                conn_id,
                tx: tx.clone(),
                evicted: evicted.clone(),
            },
        );
        if let Some(old) = previous {
            tracing::info!(client_id, old = old.conn_id, new = conn_id, "replacing existing connection");
            old.evicted.cancel();
        }
        drop(inner);

        tracing::debug!(client_id, conn_id, "connection registered");
        Connection {
            client_id: client_id.to_string(),
            conn_id,
            tx,
            evicted,
        }
    }

    /// Remove `conn`'s registration if it is still the current one.
    ///
    /// Returns false when a newer registration owns the id; that entry is left
    /// untouched.
    pub fn unregister(&self, conn: &Connection) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(&conn.client_id) {
            Some(entry) if entry.conn_id == conn.conn_id => {
                inner.entries.remove(&conn.client_id);
                tracing::debug!(client_id = %conn.client_id, conn_id = conn.conn_id, "connection unregistered");
                true
            }
            _ => false,
        }
    }

    /// Deliver `msg` to the channel registered for `client_id`.
    ///
    /// A missing registration is a silent no-op. Delivery failures are logged
    /// and never reach the caller.
    pub fn send(&self, client_id: &str, msg: WireMessage) {
        let inner = self.inner.lock();
        match inner.entries.get(client_id) {
            Some(entry) => {
                enqueue(&entry.tx, client_id, msg);
            }
            None => {
                tracing::trace!(client_id, action = %msg.action, "no connection for client, dropping message");
            }
        }
    }

    pub fn is_registered(&self, client_id: &str) -> bool {
        self.inner.lock().entries.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
