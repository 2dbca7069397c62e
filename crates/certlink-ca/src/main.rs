// certlink-ca -- Control Agent binary.
//
// Listens for a test manager on a local TCP port and relays its commands
// to the DUT agent over TCP, UDP, or serial.
//
// Usage:
//   certlink-ca -i 0.0.0.0 -P 9000 -T tcp -d 192.168.0.20 -r 9001
//   certlink-ca -i 0.0.0.0 -P 9000 -T serial -I /dev/ttyUSB0 -b 115200
//   certlink-ca -i 0.0.0.0 -P 9000 -T udp -d 192.168.0.20 -r 9001 -g /var/log/ca.log

use anyhow::{bail, Context, Result};
use clap::Parser;

use certlink_ca::relay::{Relay, RelayConfig};
use certlink_core::types::{ConnKind, DutLink};

/// Control Agent: relays test-manager commands to the DUT agent.
#[derive(Parser)]
#[command(name = "certlink-ca", version, about)]
struct Cli {
    /// Manager-side listen address or interface address.
    #[arg(short = 'i', long = "iface", default_value = "0.0.0.0")]
    iface: String,

    /// DUT interface: serial device path (serial) or unused (tcp/udp).
    #[arg(short = 'I', long = "dutif", default_value = "")]
    dutif: String,

    /// DUT link type: serial|tcp|udp (legacy numeric 1|2|3 accepted).
    #[arg(short = 'T', long = "type")]
    conn_type: String,

    /// Local server port for the manager link.
    #[arg(short = 'P', long = "port")]
    port: u16,

    /// DUT IP address (tcp/udp).
    #[arg(short = 'd', long = "dutip", default_value = "")]
    dutip: String,

    /// DUT port (tcp/udp).
    #[arg(short = 'r', long = "dutport", default_value_t = 0)]
    dutport: u16,

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

    if cli.port == 0 {
        bail!("a nonzero local server port (-P) is required");
    }

    let dut = DutLink {
        kind,
        device: cli.dutif.clone(),
        addr: cli.dutip.clone(),
        port: cli.dutport,
        baud: cli.baud,
    };
    dut.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    tracing::info!(
        listen = %format!("{}:{}", cli.iface, cli.port),
        dut_kind = %kind,
        "starting control agent"
    );

    let mut relay = Relay::new(RelayConfig::new(&cli.iface, cli.port, dut));
    relay.run().await;

    Ok(())
}
