//! # Peer Registry
//!
//! The set of live peer connections a node fans its ledger out to. Each
//! entry is the write half of a duplex stream, keyed by a [`PeerId`]
//! assigned when the connection is attached.
//!
//! ## Broadcast
//!
//! The registry lock is held only long enough to clone the writer handles.
//! Every peer then gets its own task and its own timeout, so one slow or
//! dead connection cannot hold up delivery to the rest. A peer whose write
//! fails or times out is closed: its receive loop is aborted, its write half
//! shut down, and its entry removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of one attached connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// A fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

struct Connection {
    writer: SharedWriter,
    receiver: Option<AbortHandle>,
}

/// Why a single peer did not receive a broadcast line.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers that accepted and flushed the line.
    pub delivered: Vec<PeerId>,
    /// Peers that failed or timed out. Their connections have been closed.
    pub failed: Vec<PeerId>,
}

impl BroadcastReport {
    /// Number of peers the broadcast was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Live peer connections, guarded independently of the ledger.
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Connection>>,
    send_timeout: Duration,
}

impl PeerRegistry {
    /// Creates an empty registry whose per-peer writes give up after
    /// `send_timeout`.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Adds a connection's write half and returns its new id.
    pub fn register<W>(&self, writer: W) -> PeerId
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = PeerId::random();
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let connection = Connection {
            writer: Arc::new(Mutex::new(writer)),
            receiver: None,
        };
        self.peers.write().insert(id, connection);
        debug!(peer = %id, "peer registered");
        id
    }

    /// Ties the task reading from `id` to its entry, so that closing the
    /// peer also stops it. Returns `false` if the peer is already gone.
    pub fn attach_receiver(&self, id: &PeerId, receiver: AbortHandle) -> bool {
        match self.peers.write().get_mut(id) {
            Some(connection) => {
                connection.receiver = Some(receiver);
                true
            }
            None => false,
        }
    }

    /// Forgets a connection without touching it. Used once its receive loop
    /// has ended on its own. Returns `false` if it was already gone.
    pub fn unregister(&self, id: &PeerId) -> bool {
        let removed = self.peers.write().remove(id).is_some();
        if removed {
            debug!(peer = %id, "peer unregistered");
        }
        removed
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Removes a peer and tears its connection down: the receive task is
    /// aborted and the write half shut down. Returns `false` if it was
    /// already gone.
    pub async fn close(&self, id: &PeerId) -> bool {
        let removed = { self.peers.write().remove(id) };
        let Some(connection) = removed else {
            return false;
        };

        if let Some(receiver) = &connection.receiver {
            receiver.abort();
        }
        let shutdown = async { connection.writer.lock().await.shutdown().await };
        match tokio::time::timeout(self.send_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %id, error = %e, "write half shutdown failed"),
            Err(_) => debug!(peer = %id, "write half shutdown timed out"),
        }
        debug!(peer = %id, "peer connection closed");
        true
    }

    /// Ids of every registered peer, sorted.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Writes `line` plus a newline to every registered peer and flushes.
    ///
    /// Sends run concurrently, each under the registry's send timeout.
    /// Peers that fail are closed before this returns.
    pub async fn broadcast(&self, line: &str) -> BroadcastReport {
        let targets: Vec<(PeerId, SharedWriter)> = self
            .peers
            .read()
            .iter()
            .map(|(id, connection)| (*id, Arc::clone(&connection.writer)))
            .collect();

        let mut report = BroadcastReport::default();
        if targets.is_empty() {
            debug!("no peers registered, nothing to broadcast");
            return report;
        }

        let line: Arc<str> = Arc::from(line);
        let limit = self.send_timeout;
        let mut sends = JoinSet::new();
        for (id, writer) in targets {
            let line = Arc::clone(&line);
            sends.spawn(async move { (id, send_line(writer, &line, limit).await) });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.delivered.push(id),
                Ok((id, Err(e))) => {
                    warn!(peer = %id, error = %e, "broadcast to peer failed, closing it");
                    self.close(&id).await;
                    report.failed.push(id);
                }
                Err(e) => warn!(error = %e, "broadcast task panicked"),
            }
        }

        report.delivered.sort();
        report.failed.sort();
        report
    }
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.peer_ids())
            .field("send_timeout", &self.send_timeout)
            .finish()
    }
}

async fn send_line(writer: SharedWriter, line: &str, limit: Duration) -> Result<(), SendError> {
    let write = async {
        let mut writer = writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    };
    tokio::time::timeout(limit, write)
        .await
        .map_err(|_| SendError::TimedOut(limit))??;
    Ok(())
}
