//! SIF node - structural health monitoring on a duty cycle
//!
//! # Usage
//!
//! ```bash
//! # Low-tier node on the synthetic transducer, 5-minute cycles
//! cargo run --release
//!
//! # Medium tier, fast cycles, damage injected after 10 reads, warm probe
//! cargo run --release -- --tier medium --interval-secs 2 --damage-after 10 --temperature-c 40
//!
//! # High tier with the transform on a coprocessor
//! cargo run --release --bin coprocessor -- --tier high &
//! cargo run --release -- --tier high --coprocessor 127.0.0.1:7878
//! ```
//!
//! # Environment Variables
//!
//! - `SIF_CONFIG`: path to a node_config.toml
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sif_node::acquisition::{
    FixedBattery, FixedTemperature, LogIndicator, ScriptedTrigger, SyntheticTransducer,
};
use sif_node::baseline::{CalibrationController, RetryBackoff};
use sif_node::config::{self, defaults, NodeConfig};
use sif_node::coprocessor::{ByteStream, CoprocessorLink};
use sif_node::pipeline::{DutyCycle, MonitorCycle, NodeLoop, Peripherals, TokioScheduler, TransformStage};
use sif_node::telemetry::TracingPublisher;
use sif_node::types::HardwareTier;

/// Transducer noise floor for the synthetic source.
const SYNTHETIC_NOISE_STD: f64 = 0.02;

/// Modal frequency scale applied once damage is injected.
const DAMAGE_FREQUENCY_FACTOR: f64 = 0.85;

#[derive(Parser, Debug)]
#[command(name = "sif-node", about = "Structural integrity fingerprint sensor node")]
struct CliArgs {
    /// Hardware tier (overrides profile.tier unless set in the config file)
    #[arg(long, value_enum)]
    tier: Option<HardwareTier>,

    /// Path to node_config.toml (overrides SIF_CONFIG and ./node_config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop after this many cycles (default: run until Ctrl+C)
    #[arg(long)]
    cycles: Option<u64>,

    /// Override the normal inter-cycle interval (seconds)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Inject simulated structural damage from this read onwards
    #[arg(long)]
    damage_after: Option<u64>,

    /// Seed for the synthetic transducer
    #[arg(long)]
    seed: Option<u64>,

    /// Ambient temperature reported by the simulated probe (°C)
    #[arg(long, default_value_t = defaults::REFERENCE_TEMPERATURE_C)]
    temperature_c: f64,

    /// Coprocessor address (host:port); overrides coprocessor.addr
    #[arg(long, value_name = "HOST:PORT")]
    coprocessor: Option<String>,
}

fn load_config(args: &CliArgs) -> Result<NodeConfig> {
    let (mut config, provenance) = match &args.config {
        Some(path) => NodeConfig::load_from_file_with_provenance(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::load_with_provenance(),
    };

    if let Some(tier) = args.tier {
        if provenance.is_user_set("profile.tier") && config.profile.tier != tier {
            warn!(
                file = %config.profile.tier,
                cli = %tier,
                "--tier ignored: profile.tier is set explicitly in the config file"
            );
        } else {
            config.profile.tier = tier;
        }
    }
    if let Some(secs) = args.interval_secs {
        config.duty_cycle.interval_secs = Some(secs);
    }
    if let Some(addr) = &args.coprocessor {
        config.coprocessor.addr = Some(addr.clone());
    }

    config.validate().context("invalid node configuration")?;
    Ok(config)
}

async fn build_transform(config: &NodeConfig) -> Result<TransformStage> {
    let profile = config.device_profile();
    if !profile.offload {
        return Ok(TransformStage::local(&profile));
    }
    let Some(addr) = config.coprocessor.addr.as_deref() else {
        bail!("offload enabled without a coprocessor address");
    };
    let stream = tokio::time::timeout(config.coprocessor.timeout(), tokio::net::TcpStream::connect(addr))
        .await
        .with_context(|| format!("connecting to coprocessor at {addr} timed out"))?
        .with_context(|| format!("connecting to coprocessor at {addr}"))?;
    stream.set_nodelay(true)?;
    info!(addr, "[Coprocessor] Connected");
    let stream: Box<dyn ByteStream> = Box::new(stream);
    Ok(TransformStage::Offload {
        link: CoprocessorLink::for_profile(stream, &profile),
        timeout: config.coprocessor.timeout(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    config::init(load_config(&args)?);
    let cfg = config::get();
    let profile = cfg.device_profile();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        client_id = %cfg.node.client_id,
        tier = %profile.tier,
        sample_rate_hz = profile.sample_rate_hz,
        samples = profile.sample_count(),
        bins = profile.bin_count(),
        scoring = %profile.scoring,
        alert_threshold = profile.alert_threshold,
        temperature_compensation = profile.temperature_compensation,
        "SIF node starting"
    );

    let mut calibration = CalibrationController::new(RetryBackoff::new(
        Duration::from_secs(cfg.calibration.retry_secs),
        Duration::from_secs(cfg.calibration.max_backoff_secs),
    ));
    if let Some(path) = cfg.calibration.fingerprint_path() {
        calibration = calibration.with_persistence(path);
        calibration.restore(&profile);
    }

    let mut transducer = SyntheticTransducer::new(profile.sample_rate_hz, SYNTHETIC_NOISE_STD, args.seed)
        .context("building synthetic transducer")?;
    if let Some(after) = args.damage_after {
        transducer = transducer.with_damage(after, DAMAGE_FREQUENCY_FACTOR);
    }

    let peripherals = Peripherals {
        source: Box::new(transducer),
        trigger: Box::new(ScriptedTrigger::always()),
        indicator: Box::new(LogIndicator::default()),
        publisher: Box::new(TracingPublisher::new(cfg.node.broker.clone())),
    };

    let cycle = MonitorCycle::new(
        profile.clone(),
        cfg.node.client_id.clone(),
        cfg.calibration.trigger_window(),
        build_transform(cfg).await?,
        calibration,
        peripherals,
    )?
    .with_temperature_source(Box::new(FixedTemperature(args.temperature_c)));

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut node = NodeLoop::new(
        cycle,
        Box::new(TokioScheduler),
        Box::new(FixedBattery(defaults::LOW_BATTERY_VOLTAGE + 0.5)),
        DutyCycle::from_config(&cfg.duty_cycle, profile.tier),
        cancel_token,
    );
    if let Some(n) = args.cycles {
        node = node.with_max_cycles(n);
    }

    let stats = node.run().await;
    info!(
        cycles = stats.cycles,
        monitored = stats.monitored,
        alerts = stats.alerts,
        "SIF node shut down"
    );
    Ok(())
}
