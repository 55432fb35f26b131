mod bluetooth;
mod config;
mod device;
mod error;
mod protocol;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bluer::Address;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use bluetooth::{scanner, BluezDirectory, SdpDiscovery};
use config::AppConfig;
use device::{BatterySample, Headset, ModeCommand};

#[derive(Parser)]
#[command(
    name = "sonyctl",
    version,
    about = "Switch ambient sound modes and read the battery of Sony WH/WF/WI headphones"
)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Headset Bluetooth address (defaults to the selected device)
    #[arg(short, long, global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set ambient sound mode: noise-cancelling, wind-cancelling, ambient-sound, disable
    Mode { mode: ModeCommand },
    /// Read the battery level once
    Battery {
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Poll the battery level until interrupted
    Watch {
        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// List paired headsets
    Devices {
        /// Include devices that don't look like Sony headsets
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Remember a headset for later commands
    Select {
        address: String,
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = AppConfig::load();

    match cli.command {
        Command::Mode { mode } => {
            let headset = open_headset(cli.address.as_deref(), &config).await?;
            headset
                .set_mode(mode)
                .await
                .with_context(|| format!("Failed to set {} on {}", mode, headset.address()))?;
            println!("{}: {}", headset.address(), mode);
        }
        Command::Battery { timeout, json } => {
            let headset = open_headset(cli.address.as_deref(), &config).await?;
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.battery_timeout());
            let shutdown = shutdown_on_ctrl_c();
            let stop = async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    _ = device::stopped(shutdown) => {}
                }
            };
            let result = headset.poll_battery(stop).await;
            print_battery(headset.address(), &result, json)?;
            if let Err(e) = result {
                if !e.is_offline() {
                    return Err(e.into());
                }
            }
        }
        Command::Watch { interval, json } => {
            let headset = open_headset(cli.address.as_deref(), &config).await?;
            let interval = interval
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or_else(|| config.poll_interval());
            let address = headset.address();
            headset
                .watch_battery(
                    interval,
                    config.battery_timeout(),
                    shutdown_on_ctrl_c(),
                    |result| {
                        if let Err(e) = print_battery(address, result, json) {
                            error!("Failed to print battery: {}", e);
                        }
                    },
                )
                .await;
        }
        Command::Devices { all, json } => {
            let devices = scanner::list_devices(&BluezDirectory, !all)
                .await
                .context("Failed to list paired devices")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No paired headsets found");
            } else {
                for d in &devices {
                    let state = if d.connected { "connected" } else { "" };
                    println!("{}  {:<24} {}", d.address, d.name, state);
                }
            }
        }
        Command::Select { address, name } => {
            let addr = parse_address(&address)?;
            config.select_device(addr, name);
            config.save()?;
            println!("Selected {}", addr);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "sonyctl=debug" } else { "sonyctl=info" };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.parse()?)
        .add_directive("bluer=warn".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.parse()
        .map_err(|e| anyhow!("Invalid Bluetooth address '{}': {}", raw, e))
}

async fn open_headset(cli_address: Option<&str>, config: &AppConfig) -> Result<Headset<SdpDiscovery>> {
    let address = find_device(cli_address, config).await?;
    let options = config.headset_options();
    Ok(Headset::new(
        address,
        SdpDiscovery::new(options.connect_timeout),
        options,
    ))
}

/// Flag `--address`, then the configured device, then the first paired Sony headset.
async fn find_device(cli_address: Option<&str>, config: &AppConfig) -> Result<Address> {
    if let Some(raw) = cli_address {
        return parse_address(raw);
    }

    if let Some(addr) = config.selected_address() {
        info!(
            "Using configured device {} ({})",
            config.device_name.as_deref().unwrap_or("unnamed"),
            addr
        );
        return Ok(addr);
    }

    let devices = scanner::list_devices(&BluezDirectory, true)
        .await
        .context("Failed to scan paired devices")?;
    match devices.first() {
        Some(dev) => {
            info!("Using paired device {} ({})", dev.name, dev.address);
            Ok(dev.address)
        }
        None => Err(anyhow!(
            "No Sony headset paired; pass --address or run `sonyctl select <ADDRESS>`"
        )),
    }
}

/// Watch channel flipped to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = tx.send(true);
        }
    });
    rx
}

fn print_battery(
    address: Address,
    result: &error::Result<BatterySample>,
    json: bool,
) -> Result<()> {
    let status = match result {
        Ok(sample) => serde_json::to_value(sample)?,
        Err(e) if e.is_offline() => serde_json::json!({ "state": "offline" }),
        Err(e) => serde_json::json!({ "state": "error", "message": e.to_string() }),
    };

    if json {
        let report = serde_json::json!({ "address": address.to_string(), "battery": status });
        println!("{}", serde_json::to_string(&report)?);
    } else {
        match result {
            Ok(sample) => println!("{}: {}", address, sample),
            Err(e) if e.is_offline() => println!("{}: offline", address),
            Err(e) => println!("{}: error: {}", address, e),
        }
    }
    Ok(())
}
