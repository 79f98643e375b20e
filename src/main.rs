//! MicroBridge - HTTP to micro:bit serial bridge
//!
//! Accepts binary program payloads over HTTP and forwards them to an
//! attached micro:bit as length-prefixed serial frames.

mod config;
mod discovery;
mod protocol;
mod serial;
mod server;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use serial::{FrameSink, SerialLink};
use server::{BridgeConfig, BridgeServer, ServerEvent};

/// MicroBridge - HTTP to micro:bit serial bridge
#[derive(Parser)]
#[command(name = "microbridge")]
#[command(author = "MicroBridge Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Forward binary payloads from HTTP to an attached micro:bit", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Serial device path (skips discovery)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Serial baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Serve HTTP even when no serial device can be opened
        #[arg(long)]
        allow_missing_device: bool,
    },

    /// List serial devices visible to the bridge
    Devices,

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show system information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Serve {
            port,
            device,
            baud,
            allow_missing_device,
        } => {
            run_serve(config, port, device, baud, allow_missing_device).await?;
        }
        Commands::Devices => {
            run_devices(&config)?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_system_info();
        }
    }

    Ok(())
}

/// Run the bridge server
async fn run_serve(
    config: Config,
    port: Option<u16>,
    device: Option<PathBuf>,
    baud: Option<u32>,
    allow_missing_device: bool,
) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);
    let baud = baud.unwrap_or(config.serial.baud_rate);
    let allow_missing = allow_missing_device || config.serial.allow_missing_device;

    // Resolve the device path: explicit CLI path, then config, then a
    // prefix scan of the device directory. No match is fatal, before the
    // listener is bound.
    let device_path = match device.or_else(|| config.serial.device.clone()) {
        Some(path) => path,
        None => discovery::find_device(&config.serial.device_dir, &config.serial.device_prefixes)?,
    };

    tracing::info!("Using serial device {}", device_path.display());

    let sink: Option<Box<dyn FrameSink>> = match SerialLink::open(&device_path, baud) {
        Ok(link) => Some(Box::new(link)),
        Err(e) if allow_missing => {
            tracing::warn!(
                "Could not open {}: {} - serving without a device",
                device_path.display(),
                e
            );
            None
        }
        Err(e) => {
            anyhow::bail!(
                "Failed to open {} at {} baud: {}",
                device_path.display(),
                baud,
                e
            );
        }
    };

    let device_line = if sink.is_some() {
        format!("{} ({} baud)", device_path.display(), baud)
    } else {
        "none (--allow-missing-device)".to_string()
    };

    let bridge_config = BridgeConfig::new(port)
        .with_bind_address(config.server.bind_address.clone())
        .with_request_timeout(Duration::from_millis(config.server.request_timeout_ms));

    let mut server = BridgeServer::new(bridge_config, sink);
    let mut event_rx = server.take_event_receiver().unwrap();

    // Start the server
    server.start().await?;

    println!("\n========================================");
    println!("  MicroBridge Server Running");
    println!("========================================");
    println!("  Host:   {}", config.general.name);
    println!("  Port:   {}", port);
    println!("  Device: {}", device_line);
    println!("  Route:  POST /sendToMicrobit");
    println!("========================================");
    println!("\nWaiting for payloads...");
    println!("Press Ctrl+C to stop.\n");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::Started { bind_addr } => {
                        tracing::info!("Accepting requests on {}", bind_addr);
                    }
                    ServerEvent::PayloadForwarded { remote, payload_len, wire_len } => {
                        let remote = remote
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        tracing::info!(
                            "Forwarded {} byte payload ({} bytes on wire) from {}",
                            payload_len,
                            wire_len,
                            remote
                        );
                        println!("+ Forwarded {} bytes from {}", payload_len, remote);
                    }
                    ServerEvent::RequestRejected { remote, reason } => {
                        let remote = remote
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        tracing::warn!("Rejected request from {}: {}", remote, reason);
                    }
                    ServerEvent::Stopped => {
                        break;
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if server.is_running().await {
        server.stop().await?;
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// List serial devices visible to the bridge
fn run_devices(config: &Config) -> anyhow::Result<()> {
    let ports = discovery::list_ports()?;

    if ports.is_empty() {
        println!("No serial devices found.");
        return Ok(());
    }

    println!("Serial devices:");
    for port in &ports {
        let name = PathBuf::from(&port.port_name);
        let file_name = name
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| port.port_name.clone());

        let marker = if discovery::matches_prefix(&file_name, &config.serial.device_prefixes) {
            "*"
        } else {
            " "
        };

        println!(
            "  {} {} ({})",
            marker,
            port.port_name,
            discovery::describe_port_type(&port.port_type)
        );
    }

    println!("\n* matches a configured device prefix");
    Ok(())
}

/// Print system information
fn print_system_info() {
    println!("MicroBridge System Information");
    println!("==============================\n");

    println!("Default port: {}", protocol::DEFAULT_PORT);
    println!("Default baud rate: {}", protocol::DEFAULT_BAUD_RATE);
    println!("Max payload: {} bytes", protocol::MAX_PAYLOAD_LEN);
    println!("Frame format: 2-byte little-endian length prefix + payload");

    #[cfg(target_os = "macos")]
    {
        println!("\nmacOS Notes:");
        println!("  - The micro:bit serial device appears as /dev/cu.usbmodem*");
    }

    #[cfg(target_os = "linux")]
    {
        println!("\nLinux Notes:");
        println!("  - The micro:bit serial device appears as /dev/ttyACM*");
        println!("  - Set serial.device_prefixes = [\"ttyACM\"] in the config");
        println!("  - User must be in the 'dialout' group to open it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        // Test that CLI parsing works
        let cli = Cli::try_parse_from(["microbridge", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_serve_flags() {
        let cli = Cli::try_parse_from([
            "microbridge",
            "serve",
            "--port",
            "9000",
            "--device",
            "/dev/cu.usbmodem1411",
        ])
        .unwrap();

        match cli.command {
            Commands::Serve { port, device, .. } => {
                assert_eq!(port, Some(9000));
                assert_eq!(device, Some(PathBuf::from("/dev/cu.usbmodem1411")));
            }
            _ => panic!("Expected serve subcommand"),
        }
    }
}
