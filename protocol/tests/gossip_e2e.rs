//! End-to-end replication tests for swell.
//!
//! Nodes are wired together with `tokio::io::duplex` pipes, so the full
//! path runs: attach, receive loop, snapshot decode, longest-chain replace,
//! re-broadcast. Each test builds its own nodes; nothing is shared.

use std::time::Duration;

use swell_protocol::config::NodeConfig;
use swell_protocol::network::{encode_ledger, Node, NodeEvent};
use swell_protocol::storage::{verify_chain, Block, Ledger, Payload};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const DIFFICULTY: usize = 1;

fn config() -> NodeConfig {
    NodeConfig {
        difficulty: DIFFICULTY,
        broadcast_timeout: Duration::from_secs(1),
        mining_timeout: None,
    }
}

/// A node whose ledger holds `length` blocks, genesis included.
fn node_with_length(length: usize, genesis_ts: i64) -> Node {
    let ledger = Ledger::with_genesis(Block::genesis(genesis_ts), DIFFICULTY);
    for i in 1..length {
        ledger.append(Payload::new(format!("spot-{i}"), i as i64)).unwrap();
    }
    Node::with_ledger(ledger, config())
}

/// Connects two nodes with an in-memory duplex pipe.
fn connect(a: &Node, b: &Node) {
    let (a_end, b_end) = tokio::io::duplex(1 << 20);
    a.attach(a_end);
    b.attach(b_end);
}

/// Polls until `node` holds `length` blocks or the deadline passes.
async fn wait_for_length(node: &Node, length: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while node.ledger().len() != length {
        assert!(
            tokio::time::Instant::now() < deadline,
            "node stuck at length {} (wanted {length})",
            node.ledger().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// 1. Two replicas converge on the longer chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cross_connected_nodes_converge() {
    let a = node_with_length(4, 1_700_000_000);
    let b = node_with_length(2, 1_700_000_500);
    connect(&a, &b);

    a.broadcast_ledger().await.unwrap();
    wait_for_length(&b, 4).await;

    assert_eq!(a.ledger().snapshot(), b.ledger().snapshot());
    assert!(b.ledger().validate());
    assert_eq!(a.ledger().len(), 4);
}

// ---------------------------------------------------------------------------
// 2. The shorter side's broadcast does not roll back the longer side
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shorter_broadcast_is_ignored() {
    let a = node_with_length(4, 1_700_000_000);
    let b = node_with_length(2, 1_700_000_500);
    let before = a.ledger().snapshot();
    connect(&a, &b);

    b.broadcast_ledger().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(a.ledger().snapshot(), before);
    assert_eq!(b.ledger().len(), 2);
}

// ---------------------------------------------------------------------------
// 3. Local submission propagates transitively across a line of peers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_propagates_through_intermediate_peer() {
    let a = node_with_length(1, 1_700_000_000);
    let b = node_with_length(1, 1_700_000_100);
    let c = node_with_length(1, 1_700_000_200);
    connect(&a, &b);
    connect(&b, &c);

    let receipt = a.submit(Payload::new("Pier7", 3)).await.unwrap();
    assert_eq!(receipt.block.height, 1);

    wait_for_length(&b, 2).await;
    wait_for_length(&c, 2).await;
    assert_eq!(c.ledger().snapshot(), a.ledger().snapshot());
}

// ---------------------------------------------------------------------------
// 4. Genesis-only node adopts a raw length-3 snapshot from the wire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn genesis_only_node_adopts_wire_snapshot() {
    use tokio::io::AsyncWriteExt;

    let node = node_with_length(1, 1_700_000_000);
    let mut events = node.subscribe();
    let source = node_with_length(3, 1_600_000_000);
    let candidate = source.ledger().snapshot();

    let (local, mut remote) = tokio::io::duplex(1 << 20);
    let peer = node.attach(local);

    // Noise first: the loop must survive it.
    remote.write_all(b"{broken json\n\n").await.unwrap();
    let line = encode_ledger(&candidate).unwrap();
    remote.write_all(line.as_bytes()).await.unwrap();
    remote.write_all(b"\n").await.unwrap();

    wait_for_length(&node, 3).await;
    assert_eq!(node.ledger().snapshot(), candidate);
    assert!(verify_chain(&node.ledger().snapshot()).is_ok());

    let mut adopted_from = None;
    while let Ok(event) = events.try_recv() {
        if let NodeEvent::ChainAdopted { from, .. } = event {
            adopted_from = from;
        }
    }
    assert_eq!(adopted_from, Some(peer));
}

#[tokio::test]
async fn non_utf8_line_does_not_drop_peer() {
    use tokio::io::AsyncWriteExt;

    let node = node_with_length(1, 1_700_000_000);
    let candidate = node_with_length(3, 1_600_000_000).ledger().snapshot();

    let (local, mut remote) = tokio::io::duplex(1 << 20);
    let peer = node.attach(local);

    remote.write_all(b"\xff\xfe garbage\n").await.unwrap();
    let line = encode_ledger(&candidate).unwrap();
    remote.write_all(line.as_bytes()).await.unwrap();
    remote.write_all(b"\n").await.unwrap();

    wait_for_length(&node, 3).await;
    assert_eq!(node.ledger().snapshot(), candidate);
    assert!(node.registry().contains(&peer));
}

// ---------------------------------------------------------------------------
// 5. Both sides keep writing after convergence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nodes_keep_extending_a_shared_chain() {
    let a = node_with_length(1, 1_700_000_000);
    let b = node_with_length(1, 1_700_000_900);
    connect(&a, &b);

    a.submit(Payload::new("Pier7", 3)).await.unwrap();
    wait_for_length(&b, 2).await;

    b.submit(Payload::new("Pier8", 5)).await.unwrap();
    wait_for_length(&a, 3).await;

    let chain = a.ledger().snapshot();
    assert_eq!(chain, b.ledger().snapshot());
    assert_eq!(chain[2].data, Payload::new("Pier8", 5));
    assert_eq!(chain[2].previous_hash, chain[1].hash);
}
