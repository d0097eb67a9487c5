//! # CLI Interface
//!
//! Command-line arguments for `swell-node`, via `clap` derive. Every `run`
//! flag can also be set through a `SWELL_*` environment variable.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use swell_protocol::config::{NodeConfig, DEFAULT_DIFFICULTY, DEFAULT_LISTEN_ADDR};

use crate::logging::LogFormat;

/// swell replica node.
///
/// Keeps a proof-of-work ledger of surf readings, accepts new readings on
/// stdin, and gossips the whole ledger to every connected peer.
#[derive(Parser, Debug)]
#[command(
    name = "swell-node",
    about = "swell replica node",
    version,
    propagate_version = true
)]
pub struct SwellNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a replica: listen for peers, dial the given ones, read the console.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address to accept peer connections on.
    #[arg(long, short = 'l', env = "SWELL_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Peer to dial at startup. Repeat for several peers.
    #[arg(long = "peer", short = 'p', env = "SWELL_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Leading hex zeros required of locally mined block hashes.
    #[arg(long, short = 'd', env = "SWELL_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: usize,

    /// Per-peer timeout for sending one ledger snapshot, in milliseconds.
    #[arg(long, env = "SWELL_BROADCAST_TIMEOUT_MS", default_value_t = 5_000)]
    pub broadcast_timeout_ms: u64,

    /// Give up mining a block after this many milliseconds. Unbounded if unset.
    #[arg(long, env = "SWELL_MINING_TIMEOUT_MS")]
    pub mining_timeout_ms: Option<u64>,

    /// Serve Prometheus metrics on this port. Disabled if unset.
    #[arg(long, env = "SWELL_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log output format.
    #[arg(long, env = "SWELL_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl RunArgs {
    /// Node tunables derived from the flags.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            difficulty: self.difficulty,
            broadcast_timeout: Duration::from_millis(self.broadcast_timeout_ms),
            mining_timeout: self.mining_timeout_ms.map(Duration::from_millis),
        }
    }
}
