//! # Node
//!
//! A `Node` is one replica: it owns exactly one [`Ledger`] and one
//! [`PeerRegistry`] and is passed explicitly to every handler. Cloning a
//! `Node` clones a handle, not the state, so the transport layer, the
//! receive loops, and the console can all share it.
//!
//! ## Local write path
//!
//! ```text
//! Ready ── submit ──> mine (blocking pool) ──> commit ──> validate ──> broadcast ──> Ready
//!                                                             │
//!                                                             └── invalid ──> Halted
//! ```
//!
//! A validation failure right after a local commit means the ledger is
//! corrupt. The write path then halts for good: every later submission is
//! refused, while the receive side keeps running.
//!
//! ## Connection lifecycle
//!
//! ```text
//! attach ──> Connected ──> Receiving (loop) ──> Closed (unregistered)
//!                                  │
//!                                  └── broadcast fails ──> Closed (loop aborted, writer shut down)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::gossip::{encode_ledger, run_receive_loop, GossipError};
use super::registry::{BroadcastReport, PeerId, PeerRegistry};
use crate::config::NodeConfig;
use crate::storage::{Block, Ledger, LedgerError, Payload};

/// Capacity of the node event channel. Slow subscribers lose the oldest
/// events rather than stalling the node.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the local write path.
#[derive(Debug, Error)]
pub enum NodeError {
    /// An earlier validation failure halted local writes permanently.
    #[error("local write path is halted")]
    WritePathHalted,

    /// The ledger failed validation right after a local append.
    #[error("local ledger failed validation after appending block {height}")]
    LocalLedgerCorrupted { height: u64 },

    /// Mining exceeded the configured timeout and was cancelled.
    #[error("mining timed out after {0:?}")]
    MiningTimedOut(Duration),

    /// The blocking mining task died.
    #[error("mining task failed: {0}")]
    MiningTask(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Gossip(#[from] GossipError),
}

// ---------------------------------------------------------------------------
// Events & state
// ---------------------------------------------------------------------------

/// Something observable happened on the node. Delivered to every
/// [`Node::subscribe`] receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    PeerConnected { peer: PeerId },
    PeerDisconnected { peer: PeerId },
    BlockMined { height: u64, hash: String },
    ChainAdopted { length: usize, from: Option<PeerId> },
    Broadcast { delivered: usize, failed: usize },
    WritePathHalted,
}

/// Whether this node can still originate blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePathState {
    Ready,
    Halted,
}

/// Result of a successful [`Node::submit`].
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub block: Block,
    pub broadcast: BroadcastReport,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

struct NodeInner {
    ledger: Ledger,
    registry: PeerRegistry,
    config: NodeConfig,
    halted: AtomicBool,
    events: broadcast::Sender<NodeEvent>,
}

/// Shared handle to one replica.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Creates a node with a fresh genesis ledger at `config.difficulty`.
    pub fn new(config: NodeConfig) -> Self {
        let ledger = Ledger::new(config.difficulty);
        Self::with_ledger(ledger, config)
    }

    /// Creates a node around an existing ledger. The ledger's own
    /// difficulty is used for mining and overrides `config.difficulty`.
    pub fn with_ledger(ledger: Ledger, mut config: NodeConfig) -> Self {
        if config.difficulty != ledger.difficulty() {
            warn!(
                configured = config.difficulty,
                ledger = ledger.difficulty(),
                "configured difficulty differs from the ledger's, using the ledger's"
            );
            config.difficulty = ledger.difficulty();
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!(
            difficulty = ledger.difficulty(),
            length = ledger.len(),
            "creating node"
        );
        Self {
            inner: Arc::new(NodeInner {
                registry: PeerRegistry::new(config.broadcast_timeout),
                ledger,
                config,
                halted: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.inner.ledger
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// A receiver for node events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    pub fn write_path_state(&self) -> WritePathState {
        if self.inner.halted.load(Ordering::Acquire) {
            WritePathState::Halted
        } else {
            WritePathState::Ready
        }
    }

    fn emit(&self, event: NodeEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    // -- Connections --------------------------------------------------------

    /// Takes over an open duplex stream: registers its write half and
    /// spawns a receive loop on its read half.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn attach<S>(&self, stream: S) -> PeerId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let peer = self.inner.registry.register(writer);
        info!(peer = %peer, peers = self.inner.registry.len(), "peer attached");
        self.emit(NodeEvent::PeerConnected { peer });
        let receiver = tokio::spawn(run_receive_loop(self.clone(), peer, reader));
        self.inner
            .registry
            .attach_receiver(&peer, receiver.abort_handle());
        peer
    }

    /// Forgets a peer. Called when its receive loop ends.
    pub fn disconnect(&self, peer: PeerId) {
        if self.inner.registry.unregister(&peer) {
            self.emit(NodeEvent::PeerDisconnected { peer });
        }
    }

    // -- Replication --------------------------------------------------------

    /// Serializes the current ledger and sends it to every peer.
    pub async fn broadcast_ledger(&self) -> Result<BroadcastReport, GossipError> {
        let line = self.inner.ledger.read_with(encode_ledger)?;
        let report = self.inner.registry.broadcast(&line).await;
        for peer in &report.failed {
            self.emit(NodeEvent::PeerDisconnected { peer: *peer });
        }
        self.emit(NodeEvent::Broadcast {
            delivered: report.delivered.len(),
            failed: report.failed.len(),
        });
        Ok(report)
    }

    /// Tries to replace the local ledger with `candidate`. On success the
    /// new ledger is re-broadcast on a spawned task.
    pub fn adopt(&self, candidate: Vec<Block>, from: Option<PeerId>) -> Result<usize, LedgerError> {
        let length = self.inner.ledger.replace(candidate)?;
        info!(length, from = ?from.map(|p| p.to_string()), "adopted longer chain");
        self.emit(NodeEvent::ChainAdopted { length, from });

        let node = self.clone();
        tokio::spawn(async move {
            if let Err(e) = node.broadcast_ledger().await {
                warn!(error = %e, "re-broadcast after adoption failed");
            }
        });
        Ok(length)
    }

    // -- Local writes -------------------------------------------------------

    /// Mines `data` into a new block, validates the ledger, and broadcasts it.
    ///
    /// # Errors
    ///
    /// - [`NodeError::WritePathHalted`] if an earlier submission corrupted
    ///   the ledger.
    /// - [`NodeError::LocalLedgerCorrupted`] if this submission did; the
    ///   write path is halted from then on.
    /// - [`NodeError::MiningTimedOut`] if `mining_timeout` elapsed.
    pub async fn submit(&self, data: Payload) -> Result<SubmitReceipt, NodeError> {
        if self.write_path_state() == WritePathState::Halted {
            return Err(NodeError::WritePathHalted);
        }

        let block = loop {
            let mined = self.mine(data.clone()).await?;
            match self.inner.ledger.commit(mined.clone()) {
                Ok(()) => break mined,
                Err(LedgerError::StaleTip { height, tip_height }) => {
                    debug!(height, tip_height, "chain moved while mining, mining again");
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.emit(NodeEvent::BlockMined {
            height: block.height,
            hash: block.hash.clone(),
        });

        if !self.inner.ledger.validate() {
            self.inner.halted.store(true, Ordering::Release);
            error!(height = block.height, "chain is not valid anymore, halting local writes");
            self.emit(NodeEvent::WritePathHalted);
            return Err(NodeError::LocalLedgerCorrupted {
                height: block.height,
            });
        }

        let broadcast = self.broadcast_ledger().await?;
        info!(
            height = block.height,
            hash = %block.hash,
            delivered = broadcast.delivered.len(),
            "block appended and broadcast"
        );
        Ok(SubmitReceipt { block, broadcast })
    }

    /// Mines on the blocking pool, cancelling the work if the configured
    /// timeout elapses first.
    async fn mine(&self, data: Payload) -> Result<Block, NodeError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let node = self.clone();
        let flag = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || node.inner.ledger.mine_next(data, &flag));

        let joined = match self.inner.config.mining_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    warn!(?limit, "mining timed out, cancelling");
                    return Err(NodeError::MiningTimedOut(limit));
                }
            },
            None => task.await,
        };

        let block = joined.map_err(|e| NodeError::MiningTask(e.to_string()))??;
        Ok(block)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("length", &self.inner.ledger.len())
            .field("peers", &self.inner.registry.len())
            .field("write_path", &self.write_path_state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
