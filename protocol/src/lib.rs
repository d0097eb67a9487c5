// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # swell — Core Library
//!
//! A small append-only ledger of surf readings, replicated between peers
//! that gossip whole chains at each other until they agree.
//!
//! Each block carries one payload and is sealed by proof-of-work. When two
//! replicas disagree, the longer valid chain wins and replaces the shorter
//! one wholesale. There is no merge, no persistence, and no fork weighting
//! beyond length.
//!
//! ## Architecture
//!
//! - **config** — Protocol constants and node tunables.
//! - **crypto** — SHA-256 helpers. One hash, hex-encoded.
//! - **storage** — Blocks, proof-of-work, and the lock-guarded ledger.
//! - **network** — Peer registry, gossip receive loop, and the `Node`
//!   context that ties a ledger to its peers.
//!
//! ## Quick start
//!
//! ```no_run
//! use swell_protocol::config::NodeConfig;
//! use swell_protocol::network::Node;
//! use swell_protocol::storage::Payload;
//!
//! # async fn demo(stream: tokio::net::TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let node = Node::new(NodeConfig::default());
//! node.attach(stream);
//! node.submit(Payload::new("Pier7", 3)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod network;
pub mod storage;
