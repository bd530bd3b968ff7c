use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use optium_neo_lib::{DeviceMonitor, JsonFileExporter, MonitorConfig, Registry};
use optium_neo_rs::cli::SessionArgs;
use optium_neo_rs::logging::setup_logging;
use tokio::signal;
use tracing::{error, info};

/// Export stored readings from FreeStyle Optium Neo meters as they are plugged in.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,
    /// How long the event context blocks before checking for shutdown, in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.session.log_file.clone(), &cli.session.verbose)?;

    if let Err(e) = run(cli).await {
        error!("Application failed: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let session = cli.session.session_config()?;
    let monitor_config = MonitorConfig {
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        ..MonitorConfig::default()
    };
    let exporter = JsonFileExporter::new(&cli.session.output_dir);

    info!("Starting USB monitor...");
    let monitor = DeviceMonitor::new(Registry::default(), session, monitor_config)
        .start(exporter)
        .context("Unable to register hotplug callback")?;

    info!("Waiting for meters, press Ctrl+C to exit...");
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down gracefully.");

    let stats = monitor.shutdown().await;
    info!(
        exported = stats.exported,
        failed = stats.failed,
        ignored = stats.ignored,
        "Exit USB monitor"
    );
    Ok(())
}
