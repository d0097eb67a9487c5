// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # swell Replica Node
//!
//! Entry point for the `swell-node` binary. Parses CLI arguments, sets up
//! logging and metrics, then runs one replica:
//!
//! - a TCP listener whose connections become gossip peers
//! - outbound connections to every `--peer`
//! - the stdin console (`print`, `exit`, or a JSON reading)
//!
//! Subcommands:
//!
//! - `run`     — start the replica
//! - `version` — print build version information

mod cli;
mod console;
mod logging;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;

use swell_protocol::network::Node;

use cli::{Commands, SwellNodeCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SwellNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format.into());

    let config = args.node_config();
    tracing::info!(
        listen = %args.listen,
        peers = args.peers.len(),
        difficulty = config.difficulty,
        metrics_port = ?args.metrics_port,
        "starting swell-node"
    );

    let node = Node::new(config);

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    let tracker = tokio::spawn(metrics::track(Arc::clone(&node_metrics), node.clone()));

    let metrics_server = match args.metrics_port {
        Some(port) => {
            let router = axum::Router::new()
                .route("/metrics", axum::routing::get(metrics::metrics_handler))
                .with_state(Arc::clone(&node_metrics));
            let addr = format!("0.0.0.0:{port}");
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
            tracing::info!("metrics server listening on {}", addr);
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }))
        }
        None => None,
    };

    // --- Peer transport ---
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind peer listener on {}", args.listen))?;
    tracing::info!("accepting peers on {}", args.listen);

    for addr in &args.peers {
        dial(&node, addr).await;
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        res = console::run(node.clone(), stdin, stdout) => {
            res.context("console failed")?;
        }
        res = accept_loop(node.clone(), listener) => {
            res.context("peer listener failed")?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracker.abort();
    if let Some(server) = metrics_server {
        server.abort();
    }
    tracing::info!(length = node.ledger().len(), "swell-node stopped");
    Ok(())
}

/// Attach every inbound connection as a peer.
async fn accept_loop(node: Node, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%remote, error = %e, "could not set TCP_NODELAY");
        }
        let peer = node.attach(stream);
        tracing::info!(%remote, peer = %peer, "inbound peer connected");
    }
}

/// Connect to `addr` and attach it as a peer. Failures are logged, not fatal.
async fn dial(node: &Node, addr: &str) {
    match TcpStream::connect(addr).await {
        Ok(stream) => {
            let peer = node.attach(stream);
            tracing::info!(%addr, peer = %peer, "outbound peer connected");
        }
        Err(e) => tracing::warn!(%addr, error = %e, "could not reach peer"),
    }
}

fn print_version() {
    println!("swell-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", swell_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
