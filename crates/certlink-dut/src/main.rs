// certlink-dut -- DUT agent binary.
//
// Serves the control agent's TLV commands on the device under test and
// runs the traffic-generation worker pool.
//
// Usage:
//   certlink-dut -I wlan0 -T tcp -P 9001
//   certlink-dut -I /dev/ttyS1 -T serial -b 115200
//   certlink-dut -I wlan0 -T udp -P 9001 -g /var/log/dut.log

use anyhow::{bail, Context, Result};
use clap::Parser;

use certlink_core::types::ConnKind;
use certlink_dut::context::AgentContext;
use certlink_dut::dispatch::{Dispatcher, DispatcherConfig};

/// DUT agent: executes control commands and traffic streams.
#[derive(Parser)]
#[command(name = "certlink-dut", version, about)]
struct Cli {
    /// Interface under test, or the serial device path for -T serial.
    #[arg(short = 'I', long = "iface")]
    iface: String,

    /// Control link type: serial|tcp|udp (legacy numeric 1|2|3 accepted).
    #[arg(short = 'T', long = "type")]
    conn_type: String,

    /// Local control port (tcp/udp).
    #[arg(short = 'P', long = "port", default_value_t = 0)]
    port: u16,

    /// Baud rate (serial).
    #[arg(short = 'b', long = "baud", default_value_t = 0)]
    baud: u32,

    /// Redirect log output to this file.
    #[arg(short = 'g', long = "log")]
    log: Option<String>,
}

/// Install the tracing subscriber, optionally writing to a log file.
fn init_logging(log_path: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log.as_deref())?;

    let kind: ConnKind = cli
        .conn_type
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let config = match kind {
        ConnKind::Serial => {
            if cli.baud == 0 {
                bail!("serial control link requires a baud rate (-b)");
            }
            DispatcherConfig::serial(&cli.iface, cli.baud)
        }
        ConnKind::Tcp => {
            if cli.port == 0 {
                bail!("tcp control link requires a local port (-P)");
            }
            DispatcherConfig::tcp("0.0.0.0", cli.port)
        }
        ConnKind::Udp => {
            if cli.port == 0 {
                bail!("udp control link requires a local port (-P)");
            }
            DispatcherConfig::udp("0.0.0.0", cli.port)
        }
    };

    tracing::info!(kind = %kind, iface = %cli.iface, "starting DUT agent");

    let ctx = AgentContext::new(&cli.iface);
    let mut dispatcher = Dispatcher::new(config, ctx);
    dispatcher
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("DUT agent failed to start: {e}"))
}
