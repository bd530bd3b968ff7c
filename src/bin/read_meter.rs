use anyhow::{Context, Result};
use clap::Parser;
use optium_neo_lib::{DeviceIdentity, Exporter, JsonFileExporter, NusbTransport, Registry};
use optium_neo_rs::cli::SessionArgs;
use optium_neo_rs::logging::setup_logging;
use tracing::{error, info};

/// Read an already connected meter once and export its data.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.session.log_file.clone(), &cli.session.verbose)?;

    if let Err(e) = run(cli).await {
        error!("Reading meter failed: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.session.session_config()?;
    let registry = Registry::default();

    info!("Searching for a supported meter...");
    let (device_info, family) = nusb::list_devices()
        .context("Failed to list USB devices")?
        .find_map(|d| {
            let identity = DeviceIdentity::new(d.vendor_id(), d.product_id());
            registry.lookup(identity).map(|family| (d, family))
        })
        .context("No supported meter found. Is it connected?")?;
    info!(
        bus = device_info.bus_number(),
        addr = device_info.device_address(),
        "Found {}",
        family
    );

    let mut transport = NusbTransport::open(&device_info, family.identity()).context("Failed to open meter")?;
    let record = family.run_session(&mut transport, &config).await?;

    let path = JsonFileExporter::new(&cli.session.output_dir)
        .export(&record)
        .await
        .context("Failed to export meter data")?;
    println!("{}", path.display());
    Ok(())
}
