//! Transform coprocessor - answers SASF² requests over TCP
//!
//! Host stand-in for the serial-attached coprocessor of high-tier nodes.
//! Connections are served one at a time, like the single UART they replace.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin coprocessor -- --listen 127.0.0.1:7878 --tier high
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sif_node::config::{defaults, NodeConfig};
use sif_node::coprocessor::CoprocessorService;
use sif_node::types::HardwareTier;

#[derive(Parser, Debug)]
#[command(name = "coprocessor", about = "SASF² transform coprocessor")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = defaults::COPROCESSOR_LISTEN_ADDR)]
    listen: String,

    /// Hardware tier whose profile sets the frame size
    #[arg(long, value_enum)]
    tier: Option<HardwareTier>,

    /// node_config.toml shared with the node (profile overrides, DASF²)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => NodeConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::load(),
    };
    if let Some(tier) = args.tier {
        config.profile.tier = tier;
    }
    let profile = config.device_profile();

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(
        listen = %args.listen,
        tier = %profile.tier,
        bins = profile.bin_count(),
        frame_bytes = profile.frame_len(),
        dasf2 = profile.dasf2.enabled,
        "[Coprocessor] Listening"
    );

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down");
        shutdown_token.cancel();
    });

    let mut service = CoprocessorService::for_profile(&profile);
    loop {
        let (mut stream, peer) = tokio::select! {
            _ = cancel_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "[Coprocessor] Accept failed");
                    continue;
                }
            },
        };
        stream.set_nodelay(true).ok();
        info!(peer = %peer, "[Coprocessor] Node connected");

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            result = service.serve(&mut stream) => {
                if let Err(e) = result {
                    warn!(peer = %peer, error = %e, "[Coprocessor] Connection dropped");
                }
            }
        }
    }

    info!(served = service.served(), "[Coprocessor] Stopped");
    Ok(())
}
