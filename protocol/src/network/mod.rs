//! # Network Module
//!
//! Replication between swell nodes. The layer is transport-agnostic: it
//! works on any Tokio duplex stream, and the node binary decides where those
//! streams come from (TCP today, `tokio::io::duplex` in tests).
//!
//! ## Architecture
//!
//! ```text
//! registry.rs — live peer connections and concurrent, timeout-bounded broadcast
//! gossip.rs   — snapshot wire codec and the per-connection receive loop
//! node.rs     — the Node context: ledger + registry, attach, submit, adopt
//! ```
//!
//! ## Design Decisions
//!
//! - The ledger and the registry have separate `parking_lot::RwLock`s, and
//!   neither is held across an `.await`.
//! - Each broadcast write runs on its own task with its own timeout. Peers
//!   that fail are dropped from the registry on the spot.
//! - Mining runs on Tokio's blocking pool so receive loops stay responsive
//!   while a local block is being sealed.

pub mod gossip;
pub mod node;
pub mod registry;

pub use gossip::{
    decode_payload, decode_snapshot, encode_ledger, process_bytes, process_line, run_receive_loop,
    GossipError, InboundOutcome,
};
pub use node::{Node, NodeError, NodeEvent, SubmitReceipt, WritePathState};
pub use registry::{BroadcastReport, PeerId, PeerRegistry, SendError};
