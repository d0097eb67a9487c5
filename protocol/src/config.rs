//! # Protocol Configuration & Constants
//!
//! Every magic number in swell lives here. The wire-visible ones (the
//! genesis sentinel, the default difficulty) are part of the network's
//! identity: two nodes that disagree on them will never converge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string of the wire protocol.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Chain Parameters
// ---------------------------------------------------------------------------

/// Default proof-of-work difficulty: the number of leading `'0'` hex
/// characters a mined block hash must carry. Two zeros is ~256 hash
/// attempts on average, which keeps interactive submissions snappy.
pub const DEFAULT_DIFFICULTY: usize = 2;

/// `previous_hash` of every genesis block. Genesis has no predecessor, so
/// it links to the empty string.
pub const GENESIS_PREVIOUS_HASH: &str = "";

/// How many hash attempts the miner makes between polls of its
/// cancellation flag. Polling an atomic is cheap, but not free.
pub const MINING_CANCEL_CHECK_INTERVAL: u64 = 1_024;

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// Default listen address for the node's peer transport.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9750";

/// Default per-peer write timeout for a single broadcast line.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Tunables for a single [`Node`](crate::network::Node).
///
/// Defaults match the reference network. Tests shrink the timeouts; the
/// binary fills these from CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Proof-of-work difficulty for locally mined blocks.
    pub difficulty: usize,
    /// Per-peer timeout for writing one serialized ledger.
    pub broadcast_timeout: Duration,
    /// Upper bound on mining one block. `None` mines until done, however
    /// long that takes.
    pub mining_timeout: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
            mining_timeout: None,
        }
    }
}
