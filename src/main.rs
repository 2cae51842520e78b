//! dualsense-bridge CLI
//!
//! Runs the controller-to-UDP bridge and a few helpers for finding devices
//! and managing the configuration file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::Notify;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use dualsense_bridge::bridge::Bridge;
use dualsense_bridge::config::{self, Config};
use dualsense_bridge::device::{self, compatibility, Compatibility};

/// Controller to UDP bridge
#[derive(Parser)]
#[command(name = "dualsense-bridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, env = "DUALSENSE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Run {
        /// hidraw device path (overrides config; hidapi discovery if unset)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// UDP port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<std::net::IpAddr>,

        /// Stream 448-byte audio chunks from stdin to the controller
        #[arg(long)]
        audio: bool,

        /// Skip the startup rumble pulse
        #[arg(long)]
        no_warmup: bool,

        /// Disable report counter loss accounting
        #[arg(long)]
        no_loss_accounting: bool,
    },

    /// List connected controllers
    List,

    /// Generate a default configuration file
    Init {
        /// Output file path (defaults to the user config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("dualsense_bridge={}", log_level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            device,
            port,
            bind,
            audio,
            no_warmup,
            no_loss_accounting,
        } => {
            let mut config = Config::load_or_default(cli.config.as_deref())
                .context("Failed to load configuration")?;
            if device.is_some() {
                config.device = device;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind = bind;
            }
            config.audio |= audio;
            if no_warmup {
                config.haptic_warmup.enabled = false;
            }
            if no_loss_accounting {
                config.loss_accounting = false;
            }
            run_bridge(config).await
        }
        Commands::List => list_controllers(),
        Commands::Init { output, force } => init_config(output, force),
        Commands::Validate { file } => validate_config(file),
    }
}

async fn run_bridge(config: Config) -> Result<()> {
    let bridge = Bridge::new(config.clone()).context("Invalid configuration")?;

    // Set up shutdown signal
    let running = Arc::new(AtomicBool::new(true));
    let shutdown = Arc::new(Notify::new());
    {
        let r = Arc::clone(&running);
        let s = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            r.store(false, Ordering::SeqCst);
            s.notify_one();
        })
        .context("Failed to set Ctrl-C handler")?;
    }

    let (reader, output) = device::open(config.device.as_deref())
        .context("Failed to open controller")?;

    println!(
        "{} Bridging controller to udp://{}",
        "✓".bright_green(),
        config.socket_addr().to_string().bright_cyan()
    );
    println!("{}", "Press Ctrl+C to stop".dimmed());

    bridge
        .run(reader, output, running, async move {
            shutdown.notified().await;
        })
        .await
        .context("Bridge stopped")?;

    println!("{} Stopped", "✓".bright_green());
    Ok(())
}

fn list_controllers() -> Result<()> {
    use hidapi::HidApi;

    println!("{}", "Searching for controllers...".dimmed());

    let api = HidApi::new().context("Failed to initialize HID API")?;

    let controllers: Vec<_> = api
        .device_list()
        .map(|d| (d, compatibility(d.vendor_id(), d.product_id(), d.interface_number())))
        .filter(|(_, compat)| *compat != Compatibility::Other)
        .collect();

    let usable = controllers
        .iter()
        .filter(|(_, compat)| *compat == Compatibility::Supported)
        .count();
    if usable == 0 {
        println!("{} No supported controllers found", "✗".bright_red());
    } else {
        println!("\n{} Found {} supported controller(s):", "✓".bright_green(), usable);
    }
    println!();

    for (i, (device, compat)) in controllers.iter().enumerate() {
        let product = device.product_string().unwrap_or("Controller");
        let serial = device.serial_number().unwrap_or("Unknown");
        let connection = if device.interface_number() == -1 {
            "Bluetooth".bright_magenta()
        } else {
            "USB".bright_cyan()
        };

        println!(
            "  {}. {} ({}) - Serial: {} - {}",
            i + 1,
            product.bright_white(),
            connection,
            serial.dimmed(),
            device.path().to_string_lossy()
        );
        if *compat != Compatibility::Supported {
            println!("     {} {}", "unsupported:".bright_red(), compat.to_string().dimmed());
        }
    }

    println!();
    Ok(())
}

fn init_config(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output = match output.or_else(config::default_path) {
        Some(path) => path,
        None => anyhow::bail!("No config directory available; pass --output"),
    };

    if output.exists() && !force {
        warn!("{} already exists", output.display());
        anyhow::bail!("Refusing to overwrite {} (use --force)", output.display());
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    Config::default()
        .save(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} Wrote default configuration to {}",
        "✓".bright_green(),
        output.display()
    );
    Ok(())
}

fn validate_config(file: PathBuf) -> Result<()> {
    print!("Validating {}... ", file.display());

    let config = match Config::load(&file).map_err(anyhow::Error::from).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            println!("{}", "FAILED".bright_red());
            println!("\nError: {}", e);
            return Err(e);
        }
    };

    println!("{}", "OK".bright_green());
    println!(
        "  Device: {}",
        config
            .device
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "auto (hidapi)".to_string())
            .bright_cyan()
    );
    println!("  UDP: {}", config.socket_addr());
    println!("  Poll rate byte: {}", config.poll_rate);
    println!(
        "  Axis: [{}, {}] deadzone {}",
        config.axis.min, config.axis.max, config.axis.deadzone
    );
    println!(
        "  Color: #{:02X}{:02X}{:02X}",
        config.color.r, config.color.g, config.color.b
    );
    println!(
        "  Warm-up rumble: {}",
        if config.haptic_warmup.enabled {
            format!("{} ms", config.haptic_warmup.duration_ms)
        } else {
            "off".to_string()
        }
    );
    println!("  Loss accounting: {}", config.loss_accounting);
    println!("  Audio: {}", config.audio);
    Ok(())
}
