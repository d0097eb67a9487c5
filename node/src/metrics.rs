//! # Prometheus Metrics
//!
//! Replica counters, fed from the node's event stream and scraped at
//! `/metrics` when a metrics port is configured. Everything lives in a
//! dedicated [`prometheus::Registry`] under the `swell` prefix.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use swell_protocol::network::{Node, NodeEvent};
use tokio::sync::broadcast::error::RecvError;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Blocks mined and committed locally.
    pub blocks_mined_total: IntCounter,
    /// Longer chains received from peers and adopted.
    pub chains_adopted_total: IntCounter,
    /// Peers dropped because a broadcast write failed or timed out.
    pub broadcast_failures_total: IntCounter,
    pub connected_peers: IntGauge,
    pub ledger_length: IntGauge,
    /// 1 once the local write path has halted.
    pub write_path_halted: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("swell".into()), None)?;

        let blocks_mined_total =
            IntCounter::new("blocks_mined_total", "Blocks mined and committed locally")?;
        registry.register(Box::new(blocks_mined_total.clone()))?;

        let chains_adopted_total = IntCounter::new(
            "chains_adopted_total",
            "Longer valid chains received from peers and adopted",
        )?;
        registry.register(Box::new(chains_adopted_total.clone()))?;

        let broadcast_failures_total = IntCounter::new(
            "broadcast_failures_total",
            "Peers dropped after a failed or timed-out broadcast write",
        )?;
        registry.register(Box::new(broadcast_failures_total.clone()))?;

        let connected_peers = IntGauge::new("connected_peers", "Currently connected peers")?;
        registry.register(Box::new(connected_peers.clone()))?;

        let ledger_length = IntGauge::new("ledger_length", "Blocks in the local ledger")?;
        registry.register(Box::new(ledger_length.clone()))?;

        let write_path_halted =
            IntGauge::new("write_path_halted", "1 if local block production has halted")?;
        registry.register(Box::new(write_path_halted.clone()))?;

        Ok(Self {
            registry,
            blocks_mined_total,
            chains_adopted_total,
            broadcast_failures_total,
            connected_peers,
            ledger_length,
            write_path_halted,
        })
    }

    /// Apply one node event. Gauges are re-read from `node` so they never
    /// drift when events are lagged.
    pub fn record(&self, node: &Node, event: &NodeEvent) {
        match event {
            NodeEvent::BlockMined { .. } => self.blocks_mined_total.inc(),
            NodeEvent::ChainAdopted { .. } => self.chains_adopted_total.inc(),
            NodeEvent::Broadcast { failed, .. } => {
                self.broadcast_failures_total.inc_by(*failed as u64)
            }
            NodeEvent::WritePathHalted => self.write_path_halted.set(1),
            NodeEvent::PeerConnected { .. } | NodeEvent::PeerDisconnected { .. } => {}
        }
        self.sync_gauges(node);
    }

    fn sync_gauges(&self, node: &Node) {
        self.connected_peers.set(node.registry().len() as i64);
        self.ledger_length.set(node.ledger().len() as i64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Follow the node's events until its channel closes.
pub async fn track(metrics: SharedMetrics, node: Node) {
    let mut events = node.subscribe();
    metrics.sync_gauges(&node);
    loop {
        match events.recv().await {
            Ok(event) => metrics.record(&node, &event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "metrics fell behind node events");
                metrics.sync_gauges(&node);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swell_protocol::config::NodeConfig;
    use swell_protocol::storage::Payload;

    fn node() -> Node {
        Node::new(NodeConfig {
            difficulty: 1,
            ..NodeConfig::default()
        })
    }

    #[test]
    fn encodes_with_prefix() {
        let metrics = NodeMetrics::new().unwrap();
        let text = metrics.encode().unwrap();
        assert!(text.contains("swell_blocks_mined_total 0"));
        assert!(text.contains("swell_ledger_length 0"));
    }

    #[tokio::test]
    async fn records_node_events() {
        let node = node();
        let metrics = NodeMetrics::new().unwrap();
        let mut events = node.subscribe();

        node.submit(Payload::new("Pier7", 3)).await.unwrap();
        while let Ok(event) = events.try_recv() {
            metrics.record(&node, &event);
        }

        assert_eq!(metrics.blocks_mined_total.get(), 1);
        assert_eq!(metrics.ledger_length.get(), 2);
        assert_eq!(metrics.broadcast_failures_total.get(), 0);
        assert_eq!(metrics.write_path_halted.get(), 0);
    }

    #[test]
    fn counts_failed_broadcasts() {
        let node = node();
        let metrics = NodeMetrics::new().unwrap();
        metrics.record(
            &node,
            &NodeEvent::Broadcast {
                delivered: 1,
                failed: 2,
            },
        );
        assert_eq!(metrics.broadcast_failures_total.get(), 2);
    }
}
