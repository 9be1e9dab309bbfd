use std::process;
use std::time::Duration;

use clap::Parser;
use embedded_can::ExtendedId;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

mod bus;
mod error;
mod monitor;

use bus::SocketCanBus;
use error::MonitorError;
use monitor::{Monitor, MonitorConfig, OutputFormat};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// CAN interface
    #[arg(short, long, default_value_t = String::from("can0"))]
    can_interface: String,

    /// Bitrate to configure on the interface before opening it (e.g. 250000), needs CAP_NET_ADMIN
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Identifier of the remote transmission request (hex)
    #[arg(long, value_parser = parse_hex_id, default_value = "0x18FF28F4")]
    request_id: u32,

    /// Interval between remote transmission requests (e.g. "1s", "500ms")
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    request_interval: Duration,

    /// How long to wait for a frame before reporting no data
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    receive_timeout: Duration,

    /// Output format of the decoded frames
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl Args {
    fn monitor_config(&self) -> Result<MonitorConfig, MonitorError> {
        Ok(MonitorConfig {
            request_id: ExtendedId::new(self.request_id)
                .ok_or(MonitorError::InvalidRequestId(self.request_id))?,
            request_interval: self.request_interval,
            receive_timeout: self.receive_timeout,
            format: self.format,
        })
    }
}

fn parse_hex_id(value: &str) -> Result<u32, std::num::ParseIntError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16)
}

fn register_tracing_subscriber(level_filter: LevelFilter) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(level_filter.into())
                .from_env_lossy(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    debug!(
        "Environment override for debug level to: {:?}",
        level_filter
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    register_tracing_subscriber(LevelFilter::INFO);
    let args = Args::parse();
    info!("CAN interface: {}", args.can_interface);

    let config = match args.monitor_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let bus = match SocketCanBus::open(&args.can_interface, args.bitrate) {
        Ok(bus) => bus,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    info!("Connected to CAN interface: {}", args.can_interface);

    let mut monitor = Monitor::new(bus, std::io::stdout().lock(), config);
    monitor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;
}
