//! lanwatch daemon - Main entry point
//!
//! Runs the discovery scheduler in the background and serves the REST API.

mod api;
mod config;
mod interfaces;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use lanwatch_core::{DeviceStatus, DeviceView, Subnet};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lanwatch")]
#[command(about = "Local network device discovery daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lanwatch.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Subnet to scan in CIDR form (e.g. 192.168.1.0/24)
    #[arg(short, long)]
    subnet: Option<Subnet>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single scan and exit
    #[arg(long)]
    scan_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("lanwatch v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if let Some(subnet) = args.subnet {
        config.discovery.subnet = Some(subnet);
    }

    let subnet = config.resolve_subnet();
    info!(
        subnet = %subnet,
        history = %config.daemon.history_path.display(),
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone(), subnet);

    if args.scan_once {
        info!("Running single discovery scan");
        let summary = state.scanner.scan_once().await;
        println!("Discovered {} devices ({} tracked):", summary.found, summary.total);
        print_devices(&state.devices().await);
        return Ok(());
    }

    let shutdown = CancellationToken::new();

    let discovery = {
        let scanner = state.scanner.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scanner.run(shutdown).await })
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }

    let served = server::run(state, &config.daemon.bind, shutdown.clone()).await;
    shutdown.cancel();
    discovery.await?;
    served
}

fn print_devices(devices: &BTreeMap<Ipv4Addr, DeviceView>) {
    for (ip, device) in devices {
        let status = match device.status {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        };
        println!(
            "  {:<15}  {:<7}  {:<17}  {}",
            ip,
            status,
            device.mac.as_deref().unwrap_or("-"),
            device.name.as_deref().unwrap_or("-"),
        );
    }
}
