//! # Storage Module
//!
//! In-memory chain data for a swell node. Nothing here touches disk: a node
//! that restarts comes back with a fresh genesis block and catches up from
//! its peers.
//!
//! ## Architecture
//!
//! ```text
//! block.rs  — Payload, Block, hash computation, proof-of-work mining
//! chain.rs  — Ledger: append, validate, whole-chain replace
//! ```

pub mod block;
pub mod chain;

pub use block::{compute_hash, meets_difficulty, Block, BlockError, Payload};
pub use chain::{verify_chain, Ledger, LedgerError};
