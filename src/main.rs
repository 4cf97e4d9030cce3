use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use serial_line_agent::config::{Config, ConfigLoader};
use serial_line_agent::{logging, stdio, ConnectionManager, NativeBackend, ToolDispatcher};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Serial line agent: one serial session driven by JSON tool calls on stdin/stdout.",
    long_about = "Opens a serial device on request, buffers the newline-terminated text it sends, and answers line-delimited JSON requests ({\"command\": ..., \"params\": ...}) on stdin with one JSON line each on stdout. Logs go to stderr."
)]
struct Args {
    /// Configuration file (overrides the standard search locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default port used by `init` when none is given (path or glob pattern)
    #[arg(short, long)]
    port: Option<String>,

    /// Default baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Default message buffer length
    #[arg(long)]
    buffer_length: Option<usize>,

    /// Log filter, e.g. "debug" or "serial_line_agent=trace"
    #[arg(long)]
    log_level: Option<String>,

    /// Print the detected serial ports as JSON and exit
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let loader = match &self.config {
            Some(path) => ConfigLoader::load_from(path)?,
            None => ConfigLoader::load()?,
        };
        let mut config = loader.into_config();

        if let Some(port) = &self.port {
            config.serial.default_port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.default_baud = baud;
        }
        if let Some(length) = self.buffer_length {
            config.serial.default_buffer_length = length;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.load_config()?;
    logging::init(&config.logging)?;

    let manager = Arc::new(ConnectionManager::new(
        Arc::new(NativeBackend::new()),
        config.initial_session(),
        config.manager_settings(),
    ));

    let listing = manager.list_ports(true).await?;
    if args.list_ports {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    info!(
        "Serial line agent {} starting (default port {}, {} baud, buffer {})",
        env!("CARGO_PKG_VERSION"),
        config.serial.default_port,
        config.serial.default_baud,
        config.serial.default_buffer_length
    );
    if listing.ports.is_empty() {
        warn!("No serial ports detected");
    }
    for port in &listing.ports {
        info!("Found port: {} ({})", port.device, port.description);
    }
    info!("Starting disconnected; use the init tool to open a port");

    let dispatcher = ToolDispatcher::new(manager, config.serial.clone());
    stdio::run_stdio_interface(dispatcher).await?;

    info!("Serial line agent stopped");
    Ok(())
}
