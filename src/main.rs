use clap::{Args, Parser, Subcommand};
use serial_link::config::{Config, ConfigLoader, LogFormat};
use serial_link::port::{list_ports, DataBits, Parity, PortConfig, StopBits, SystemDriver};
use serial_link::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "serial-link",
    version,
    about = "Open a serial port, send payloads and watch what comes back.",
    long_about = "Thin command-line front end over an asynchronous serial connection. \
                  Port defaults come from serial-link.toml or SERIAL_LINK_* environment variables."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the serial devices registered on this machine.
    List {
        /// Print the index-to-name mapping as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Open a port, send one payload and close it.
    Send {
        #[command(flatten)]
        line: LineArgs,

        /// Payload to send.
        data: String,

        /// Interpret DATA as hex digits (whitespace allowed), e.g. "de ad be ef".
        #[arg(long)]
        hex: bool,
    },
    /// Open a port and print every arrival until Ctrl-C.
    Monitor {
        #[command(flatten)]
        line: LineArgs,

        /// Stop after this many seconds.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

/// Line settings; anything left out falls back to the config file.
#[derive(Args, Debug)]
struct LineArgs {
    /// Device name, e.g. /dev/ttyUSB0 or COM3.
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    /// 5, 6, 7 or 8.
    #[arg(long)]
    data_bits: Option<u8>,

    /// 1, 1.5 or 2.
    #[arg(long)]
    stop_bits: Option<StopBits>,

    /// none, odd, even, mark or space.
    #[arg(long)]
    parity: Option<Parity>,
}

impl LineArgs {
    fn resolve(&self, config: &Config) -> Result<PortConfig, Box<dyn std::error::Error>> {
        let port = self
            .port
            .clone()
            .or_else(|| config.serial.port.clone())
            .ok_or("no port given; pass --port or set serial.port in the config file")?;

        let mut resolved = config.serial.port_config(port)?;
        if let Some(baud) = self.baud {
            resolved.baud_rate = baud;
        }
        if let Some(bits) = self.data_bits {
            resolved.data_bits = DataBits::from_count(bits)
                .ok_or_else(|| format!("invalid data bits {bits} (expected 5-8)"))?;
        }
        if let Some(stop_bits) = self.stop_bits {
            resolved.stop_bits = stop_bits;
        }
        if let Some(parity) = self.parity {
            resolved.parity = parity;
        }
        Ok(resolved)
    }
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load() {
        Ok(loader) => loader.into_config(),
        Err(e) => {
            eprintln!("Warning: Failed to load config, using defaults: {e}");
            ConfigLoader::with_defaults().into_config()
        }
    };
    init_tracing(&config);

    if let Err(e) = run(cli.command, &config).await {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

async fn run(command: Command, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::List { json } => {
            let ports = list_ports()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ports)?);
            } else if ports.is_empty() {
                println!("No serial ports found.");
            } else {
                for (index, name) in &ports {
                    println!("{index:>3}  {name}");
                }
            }
        }
        Command::Send { line, data, hex } => {
            let payload = if hex {
                parse_hex(&data)?
            } else {
                data.into_bytes()
            };
            let conn = connect(&line, config)?;
            let result = conn.send(&payload).await;
            conn.close().await;
            let written = result?;
            println!("Sent {written} bytes.");
        }
        Command::Monitor {
            line,
            duration_secs,
        } => {
            let conn = connect(&line, config)?;
            monitor(&conn, config.timeouts.poll_interval(), duration_secs.map(Duration::from_secs))
                .await;
            conn.close().await;
            let stats = conn.stats();
            info!(
                received = stats.bytes_received,
                frames = stats.frames_received,
                overwritten = stats.overwritten_frames,
                "monitor finished"
            );
        }
    }
    Ok(())
}

fn connect(line: &LineArgs, config: &Config) -> Result<Connection, Box<dyn std::error::Error>> {
    let port = line.resolve(config)?;
    let driver = SystemDriver::new().with_event_poll(config.timeouts.event_poll());
    let conn = Connection::with_settings(Arc::new(driver), config.timeouts.connection_settings());
    conn.open(port)?;
    Ok(conn)
}

/// Print each mailbox arrival as hex until Ctrl-C or the deadline.
async fn monitor(conn: &Connection, poll: Duration, limit: Option<Duration>) {
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    let shutdown = shutdown_signal();
    tokio::pin!(deadline, shutdown);
    let mut ticker = tokio::time::interval(poll);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                if let Some(data) = conn.take_unread() {
                    println!("{}", to_hex(&data));
                }
            }
        }
    }
}

fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{input}'"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16).map_err(|_| format!("invalid hex byte '{text}'"))
        })
        .collect()
}

fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Signal received, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("de ad BE EF").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0x7f, 0xff]), "00 7f ff");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "serial-link", "send", "--port", "COM9", "--baud", "19200", "--stop-bits", "2",
            "--parity", "even", "hello",
        ]);
        let Command::Send { line, data, hex } = cli.command else {
            panic!("expected send");
        };
        assert_eq!(data, "hello");
        assert!(!hex);

        let config = line.resolve(&Config::default()).unwrap();
        assert_eq!(config.port, "COM9");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.data_bits, DataBits::Eight);
    }

    #[test]
    fn test_missing_port_is_an_error() {
        let cli = Cli::parse_from(["serial-link", "monitor"]);
        let Command::Monitor { line, .. } = cli.command else {
            panic!("expected monitor");
        };
        assert!(line.resolve(&Config::default()).is_err());
    }
}
