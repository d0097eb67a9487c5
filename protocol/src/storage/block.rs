//! # Block Structure & Proof-of-Work
//!
//! A block carries exactly one [`Payload`] and links to its predecessor by
//! hash. Blocks are sealed by proof-of-work: the `pow` counter is bumped
//! until the block hash starts with `difficulty` hex zeros.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  data: Payload     { location, wave_height }│
//! │  hash: String      (hex SHA-256, see below) │
//! │  previous_hash: String                      │
//! │  timestamp: i64    (Unix seconds)           │
//! │  height: u64       (genesis = 0)            │
//! │  pow: u64          (proof-of-work counter)  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! ```text
//! hash = hex(SHA-256(previous_hash || json(data) || timestamp || height || pow))
//! ```
//!
//! Integers are rendered as decimal text and `json(data)` is the compact
//! serialization with fields in declaration order. Every node on the network
//! must produce the same bytes here, so the field order of [`Payload`] is part
//! of the wire contract.
//!
//! ## Mining
//!
//! [`Block::mine`] has no iteration cap: expected work grows as
//! 16^difficulty and a caller asking for a large difficulty simply waits.
//! [`Block::mine_until`] is the same loop with a cancellation flag, which
//! is what the node runtime uses.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GENESIS_PREVIOUS_HASH, MINING_CANCEL_CHECK_INTERVAL};
use crate::crypto::{leading_hex_zeros, sha256_hex_multi};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The application record embedded in a block: a surf-spot reading.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    /// Free-form location label, e.g. `"Pier7"`.
    pub location: String,
    /// Measured wave height.
    pub wave_height: i64,
}

impl Payload {
    pub fn new(location: impl Into<String>, wave_height: i64) -> Self {
        Self {
            location: location.into(),
            wave_height,
        }
    }

    /// Canonical byte encoding used inside the block hash preimage.
    pub fn canonical_encoding(&self) -> Vec<u8> {
        // A struct of a string and an integer always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures raised by a single block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    /// The stored hash does not match the hash recomputed from the fields.
    #[error("block {height} hash mismatch: stored={stored}, computed={computed}")]
    HashMismatch {
        height: u64,
        stored: String,
        computed: String,
    },

    /// Mining was abandoned because the cancellation flag was raised.
    #[error("mining block {height} cancelled after {attempts} attempts")]
    MiningCancelled { height: u64, attempts: u64 },
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// One entry of the ledger.
///
/// Field names are fixed by the wire format and must not be renamed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub data: Payload,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: i64,
    pub height: u64,
    pub pow: u64,
}

impl Block {
    /// Construct a genesis block stamped with `timestamp`.
    ///
    /// Genesis carries the default payload, links to
    /// [`GENESIS_PREVIOUS_HASH`], and is never mined.
    pub fn genesis(timestamp: i64) -> Self {
        let mut block = Block {
            data: Payload::default(),
            hash: String::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            timestamp,
            height: 0,
            pow: 0,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Construct an unmined block extending `parent`.
    ///
    /// The hash is filled in for `pow = 0`, so the block is internally
    /// consistent before mining starts.
    pub fn next(parent: &Block, data: Payload, timestamp: i64) -> Self {
        let mut block = Block {
            data,
            hash: String::new(),
            previous_hash: parent.hash.clone(),
            timestamp,
            height: parent.height + 1,
            pow: 0,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Recompute the block hash from its fields.
    pub fn compute_hash(&self) -> String {
        compute_hash(self)
    }

    /// Returns `true` if the stored hash meets `difficulty`.
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    /// Bump `pow` until the hash has at least `difficulty` leading hex zeros.
    ///
    /// Starts from the current `pow` and never gives up.
    pub fn mine(&mut self, difficulty: usize) {
        while !self.meets_difficulty(difficulty) {
            self.pow += 1;
            self.hash = self.compute_hash();
        }
    }

    /// Like [`Block::mine`], but polls `cancel` every
    /// [`MINING_CANCEL_CHECK_INTERVAL`] attempts.
    ///
    /// # Errors
    ///
    /// [`BlockError::MiningCancelled`] once `cancel` is observed set. The
    /// block is left at whatever `pow` it reached.
    pub fn mine_until(&mut self, difficulty: usize, cancel: &AtomicBool) -> Result<(), BlockError> {
        let mut attempts = 0u64;
        while !self.meets_difficulty(difficulty) {
            if attempts % MINING_CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Err(BlockError::MiningCancelled {
                    height: self.height,
                    attempts,
                });
            }
            self.pow += 1;
            self.hash = self.compute_hash();
            attempts += 1;
        }
        Ok(())
    }

    /// Check that the stored hash matches the block contents.
    pub fn verify(&self) -> Result<(), BlockError> {
        let computed = self.compute_hash();
        if self.hash != computed {
            return Err(BlockError::HashMismatch {
                height: self.height,
                stored: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Returns `true` for a block at height zero.
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}

// ---------------------------------------------------------------------------
// Hash Computation
// ---------------------------------------------------------------------------

/// Compute the hex SHA-256 block hash from its constituent fields.
///
/// The stored `hash` field is not part of the preimage.
pub fn compute_hash(block: &Block) -> String {
    let data = block.data.canonical_encoding();
    let timestamp = block.timestamp.to_string();
    let height = block.height.to_string();
    let pow = block.pow.to_string();
    sha256_hex_multi(&[
        block.previous_hash.as_bytes(),
        &data,
        timestamp.as_bytes(),
        height.as_bytes(),
        pow.as_bytes(),
    ])
}

/// Returns `true` if `hash` starts with at least `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    leading_hex_zeros(hash) >= difficulty
}

/// Current wall-clock time as Unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
