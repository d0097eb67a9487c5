//! # Operator Console
//!
//! Line-oriented control on stdin:
//!
//! ```text
//! print                                   pretty-print the ledger to stdout
//! exit                                    stop the node
//! {"location":"Pier7","wave_height":3}    mine a block with this reading
//! ```
//!
//! Anything else is reported and skipped.

use anyhow::Result;
use swell_protocol::network::{decode_payload, Node, NodeError};
use swell_protocol::storage::Payload;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Print,
    Exit,
    Submit(Payload),
    Empty,
    /// Not a command and not a payload; carries the decode error.
    Invalid(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "print" => Self::Print,
            "exit" => Self::Exit,
            other => match decode_payload(other) {
                Ok(payload) => Self::Submit(payload),
                Err(e) => Self::Invalid(e.to_string()),
            },
        }
    }
}

/// Read commands from `input` until `exit` or EOF. Ledger dumps go to `output`.
pub async fn run<R, W>(node: Node, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Exit => {
                info!("exit requested from console");
                return Ok(());
            }
            ConsoleCommand::Print => {
                let dump = node.ledger().read_with(serde_json::to_string_pretty)?;
                output.write_all(dump.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            ConsoleCommand::Submit(payload) => match node.submit(payload).await {
                Ok(receipt) => info!(
                    height = receipt.block.height,
                    hash = %receipt.block.hash,
                    peers = receipt.broadcast.attempted(),
                    "reading recorded"
                ),
                Err(e @ (NodeError::WritePathHalted | NodeError::LocalLedgerCorrupted { .. })) => {
                    error!(error = %e, "reading refused");
                }
                Err(e) => warn!(error = %e, "reading not recorded"),
            },
            ConsoleCommand::Invalid(reason) => {
                warn!(line = %line.trim(), %reason, "unrecognized console input");
            }
        }
    }

    info!("console input closed");
    Ok(())
}
