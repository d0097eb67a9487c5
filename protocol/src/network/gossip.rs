//! # Gossip / Replica Sync
//!
//! Peers exchange whole ledgers, one JSON document per line. There is no
//! message envelope: anything arriving on a peer stream is a ledger
//! snapshot, and anything typed at the console is a payload.
//!
//! ## Convergence
//!
//! ```text
//!  peer A                     peer B
//!  ──────                     ──────
//!  submit → mine → validate
//!  broadcast(ledger) ───────> receive loop
//!                              len(candidate) > len(local)?
//!                              replace (if valid)
//!                   <───────  broadcast(ledger)
//!  receive loop: not longer, ignored
//! ```
//!
//! Every adoption is re-broadcast, so an improvement propagates across the
//! whole connected graph. Rejected candidates are dropped silently; the
//! sender is never told.
//!
//! ## Wire compatibility
//!
//! Snapshots are written as a bare JSON array of blocks. On read, the
//! wrapped form `{"chain": [...], "difficulty": n}` is accepted as well,
//! since older nodes serialize their whole chain object.

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use super::node::Node;
use super::registry::PeerId;
use crate::storage::{Block, LedgerError, Payload};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Encoding failures on the gossip channel.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("malformed ledger snapshot: {0}")]
    MalformedSnapshot(#[source] serde_json::Error),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("failed to encode ledger: {0}")]
    Encode(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum WireSnapshot {
    Bare(Vec<Block>),
    Wrapped { chain: Vec<Block> },
}

/// Serialize a block sequence as one line of JSON (no trailing newline).
pub fn encode_ledger(blocks: &[Block]) -> Result<String, GossipError> {
    serde_json::to_string(blocks).map_err(GossipError::Encode)
}

/// Parse one inbound line into a candidate chain.
pub fn decode_snapshot(line: &str) -> Result<Vec<Block>, GossipError> {
    match serde_json::from_str::<WireSnapshot>(line) {
        Ok(WireSnapshot::Bare(chain)) | Ok(WireSnapshot::Wrapped { chain }) => Ok(chain),
        // Re-parse as the canonical shape so the error names a real problem
        // instead of serde's generic "did not match any variant".
        Err(_) => serde_json::from_str::<Vec<Block>>(line).map_err(GossipError::MalformedSnapshot),
    }
}

/// Parse one console line into a payload.
pub fn decode_payload(line: &str) -> Result<Payload, GossipError> {
    serde_json::from_str(line).map_err(GossipError::MalformedPayload)
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

/// What the receive loop did with one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The candidate replaced the local ledger, which now has `length` blocks.
    Adopted { length: usize },
    /// The candidate was not longer than the local ledger.
    NotLonger,
    /// The candidate was longer but failed validation.
    Rejected(LedgerError),
    /// The line was not a ledger snapshot.
    Malformed,
    /// Blank line.
    Empty,
}

/// Handle one inbound line from `peer`.
///
/// On adoption the updated ledger is re-broadcast on a spawned task, so
/// this must run inside a Tokio runtime.
pub fn process_line(node: &Node, peer: PeerId, line: &str) -> InboundOutcome {
    let line = line.trim();
    if line.is_empty() {
        return InboundOutcome::Empty;
    }

    let candidate = match decode_snapshot(line) {
        Ok(candidate) => candidate,
        Err(e) => {
            warn!(peer = %peer, error = %e, "dropping undecodable line");
            return InboundOutcome::Malformed;
        }
    };

    let local = node.ledger().len();
    if candidate.len() <= local {
        debug!(peer = %peer, candidate = candidate.len(), local, "candidate not longer, ignored");
        return InboundOutcome::NotLonger;
    }

    match node.adopt(candidate, Some(peer)) {
        Ok(length) => InboundOutcome::Adopted { length },
        Err(LedgerError::NotLonger { .. }) => InboundOutcome::NotLonger,
        Err(e) => {
            debug!(peer = %peer, error = %e, "candidate chain rejected");
            InboundOutcome::Rejected(e)
        }
    }
}

/// Handle one raw inbound line. Bytes that are not UTF-8 count as a
/// malformed line.
pub fn process_bytes(node: &Node, peer: PeerId, line: &[u8]) -> InboundOutcome {
    match std::str::from_utf8(line) {
        Ok(line) => process_line(node, peer, line),
        Err(e) => {
            warn!(peer = %peer, error = %e, "dropping non-UTF-8 line");
            InboundOutcome::Malformed
        }
    }
}

/// Read newline-delimited snapshots from `reader` until EOF or a read error.
///
/// Undecodable lines are skipped. The peer is removed from the node's
/// registry when the loop ends.
pub async fn run_receive_loop<R>(node: Node, peer: PeerId, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                info!(peer = %peer, "peer closed the stream");
                break;
            }
            Ok(_) => {
                process_bytes(&node, peer, &line);
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "error reading from peer");
                break;
            }
        }
    }

    node.disconnect(peer);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
