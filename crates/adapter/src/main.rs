//! ti-usb-serial
//!
//! Host-side controller for TI 3410/5052 USB serial adapters. Lists
//! attached adapters, brings them up (downloading firmware when needed) and
//! drives their ports for status queries and line monitoring.

use adapter::usb::{AdapterInfo, AdapterScanner, BulkReadPump, PortData};
use adapter::{AdapterConfig, AttachOutcome, DeviceSession, ModemCounters, ModemLines, SerialInfo};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use common::{CancelToken, UsbTransport, setup_logging};
use protocol::{LineStatus, ModemStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Poll interval of the bulk receive workers
const BULK_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "ti-usb-serial")]
#[command(
    author,
    version,
    about = "TI 3410/5052 USB serial adapter controller"
)]
#[command(long_about = "
Host-side controller for TI 3410/5052 based USB serial adapters, including
Multi-Tech, Moxa UPort 11x0, IBM, Abbott and Honeywell variants.

EXAMPLES:
    # List attached adapters and their firmware state
    ti-usb-serial list

    # Download firmware or switch configuration as needed
    ti-usb-serial attach

    # Show modem lines and line status of port 0 as JSON
    ti-usb-serial status --port 0 --json

    # Watch modem lines and received data of port 1
    ti-usb-serial monitor --port 1

CONFIGURATION:
    Configuration files are looked up in the following order:
    1. Path specified with --config
    2. ~/.config/ti-usb-serial/adapter.toml
    3. /etc/ti-usb-serial/adapter.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Which adapter to use when several are attached (index from `list`)
    #[arg(short, long, value_name = "INDEX", default_value_t = 0, global = true)]
    device: usize,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List supported adapters
    List,
    /// Bring an adapter up
    Attach,
    /// Report modem lines, line status and serial info of a port
    Status {
        #[arg(short, long, default_value_t = 0)]
        port: u8,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch modem-status changes and received data until Ctrl-C
    Monitor {
        #[arg(short, long, default_value_t = 0)]
        port: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = AdapterConfig::default();
        let path = AdapterConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        AdapterConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        AdapterConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.adapter.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("ti-usb-serial v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let cancel = CancelToken::new();
    let device = args.device;

    match args.command.unwrap_or(Commands::List) {
        Commands::List => {
            tokio::task::spawn_blocking(move || list_adapters(&config)).await??;
        }
        Commands::Attach => {
            tokio::task::spawn_blocking(move || attach_adapter(&config, device)).await??;
        }
        Commands::Status { port, json } => {
            let task = tokio::task::spawn_blocking({
                let cancel = cancel.clone();
                move || port_status(&config, device, port, json, &cancel)
            });
            run_until_ctrl_c(task, &cancel).await?;
        }
        Commands::Monitor { port } => {
            monitor_port(config, device, port, cancel).await?;
        }
    }

    Ok(())
}

/// Await a blocking task, cancelling its waits on Ctrl-C
async fn run_until_ctrl_c<T: Send + 'static>(
    mut task: tokio::task::JoinHandle<Result<T>>,
    cancel: &CancelToken,
) -> Result<T> {
    tokio::select! {
        result = &mut task => result?,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, cancelling...");
            cancel.cancel();
            task.await?
        }
    }
}

fn scanner(config: &AdapterConfig) -> Result<AdapterScanner> {
    let identities = config
        .identity_table()
        .context("Invalid identity configuration")?;
    AdapterScanner::new(identities, config.usb.filters.clone())
        .context("Failed to initialize USB context")
}

fn select_adapter(scanner: &AdapterScanner, index: usize) -> Result<AdapterInfo> {
    let adapters = scanner.scan().context("Failed to enumerate USB devices")?;
    if adapters.is_empty() {
        bail!("No supported adapter found");
    }
    adapters
        .get(index)
        .cloned()
        .ok_or_else(|| anyhow!("No adapter #{} ({} found)", index, adapters.len()))
}

fn list_adapters(config: &AdapterConfig) -> Result<()> {
    let adapters = scanner(config)?
        .scan()
        .context("Failed to enumerate USB devices")?;

    if adapters.is_empty() {
        println!("No supported adapters found");
        return Ok(());
    }

    println!("Supported adapters:");
    println!("{:-<72}", "");
    for (index, adapter) in adapters.iter().enumerate() {
        println!(
            "#{:<3} Bus {:03} Device {:03}: {} {} port(s), {}",
            index,
            adapter.bus,
            adapter.address,
            adapter.identity,
            adapter.identity.num_ports(),
            adapter.firmware_state
        );
    }
    println!("{:-<72}", "");
    println!("Total: {} adapter(s)", adapters.len());
    Ok(())
}

/// Open an adapter and run the attach state machine on it
fn attach(
    config: &AdapterConfig,
    index: usize,
) -> Result<(AttachOutcome, mpsc::UnboundedReceiver<PortData>)> {
    let scanner = scanner(config)?;
    let info = select_adapter(&scanner, index)?;

    let transport: Arc<dyn UsbTransport> = Arc::new(
        scanner
            .open(&info)
            .with_context(|| format!("Failed to open {}", info.identity))?,
    );
    let (pump, rx) = BulkReadPump::new(transport.clone(), BULK_POLL);

    let outcome = DeviceSession::attach(
        transport,
        Arc::new(pump),
        scanner.identities(),
        &config.firmware_source(),
        config.session_options(),
    )
    .with_context(|| format!("Failed to attach {}", info.identity))?;

    Ok((outcome, rx))
}

fn attach_ready(
    config: &AdapterConfig,
    index: usize,
) -> Result<(Arc<DeviceSession>, mpsc::UnboundedReceiver<PortData>)> {
    match attach(config, index)? {
        (AttachOutcome::Ready(session), rx) => Ok((session, rx)),
        (outcome, _) => bail!(
            "Adapter is not ready ({:?}), run again once it has re-enumerated",
            outcome
        ),
    }
}

fn attach_adapter(config: &AdapterConfig, index: usize) -> Result<()> {
    let (outcome, _rx) = attach(config, index)?;
    match outcome {
        AttachOutcome::Ready(session) => {
            println!(
                "{} is ready with {} port(s)",
                session.identity(),
                session.num_ports()
            );
            session.detach();
        }
        AttachOutcome::FirmwareDownloaded { reset_issued } => {
            println!(
                "Firmware downloaded{}, the adapter will re-enumerate",
                if reset_issued { " and adapter reset" } else { "" }
            );
        }
        AttachOutcome::ConfigurationSwitched => {
            println!("Switched to the active configuration, the adapter will re-enumerate");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct LineStatusReport {
    tx_empty: bool,
    rx_full: bool,
    overrun: bool,
    parity_error: bool,
    framing_error: bool,
    break_received: bool,
}

impl From<LineStatus> for LineStatusReport {
    fn from(lsr: LineStatus) -> Self {
        Self {
            tx_empty: lsr.contains(LineStatus::TX_EMPTY),
            rx_full: lsr.contains(LineStatus::RX_FULL),
            overrun: lsr.contains(LineStatus::OVERRUN_ERROR),
            parity_error: lsr.contains(LineStatus::PARITY_ERROR),
            framing_error: lsr.contains(LineStatus::FRAMING_ERROR),
            break_received: lsr.contains(LineStatus::BREAK),
        }
    }
}

#[derive(Debug, Serialize)]
struct PortReport {
    adapter: String,
    serial_info: SerialInfo,
    modem_lines: ModemLines,
    counters: ModemCounters,
    line_status: Option<LineStatusReport>,
}

fn port_status(
    config: &AdapterConfig,
    index: usize,
    port: u8,
    json: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let (session, _rx) = attach_ready(config, index)?;
    let port_session = session
        .port(port)
        .ok_or_else(|| anyhow!("{} has no port {}", session.identity(), port))?;

    port_session
        .open(Some(&config.line), cancel)
        .with_context(|| format!("Failed to open port {}", port))?;

    let line_status = match port_session.line_status() {
        Ok(status) => Some(LineStatusReport::from(status.lsr)),
        Err(e) => {
            warn!("Failed to read line status: {}", e);
            None
        }
    };
    let report = PortReport {
        adapter: session.identity().to_string(),
        serial_info: port_session.serial_info(),
        modem_lines: port_session.modem_lines(),
        counters: port_session.counters(),
        line_status,
    };

    port_session.close(cancel);
    session.detach();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &PortReport) {
    let info = &report.serial_info;
    let lines = &report.modem_lines;
    let flag = |on: bool| if on { "on" } else { "off" };

    println!("Adapter:      {}", report.adapter);
    println!("Port:         {}", info.port);
    println!("UART:         {} (baud base {})", info.uart_type, info.baud_base);
    match info.closing_wait_ms {
        Some(ms) => println!("Closing wait: {} ms", ms),
        None => println!("Closing wait: none"),
    }
    println!(
        "Outputs:      DTR {}  RTS {}  LOOP {}",
        flag(lines.dtr),
        flag(lines.rts),
        flag(lines.loopback)
    );
    println!(
        "Inputs:       CTS {}  DSR {}  RI {}  CD {}",
        flag(lines.cts),
        flag(lines.dsr),
        flag(lines.ri),
        flag(lines.cd)
    );
    if let Some(lsr) = &report.line_status {
        println!(
            "Line status:  tx_empty {}  overrun {}  parity {}  framing {}  break {}",
            lsr.tx_empty, lsr.overrun, lsr.parity_error, lsr.framing_error, lsr.break_received
        );
    }
}

async fn monitor_port(config: AdapterConfig, index: usize, port: u8, cancel: CancelToken) -> Result<()> {
    let open = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        move || -> Result<_> {
            let (session, rx) = attach_ready(&config, index)?;
            let port_session = session
                .port(port)
                .ok_or_else(|| anyhow!("{} has no port {}", session.identity(), port))?;
            port_session
                .open(Some(&config.line), &cancel)
                .with_context(|| format!("Failed to open port {}", port))?;
            Ok((session, port_session, rx))
        }
    });
    let (session, port_session, mut rx) = run_until_ctrl_c(open, &cancel).await?;

    info!("Monitoring port {} of {}, press Ctrl+C to stop", port, session.identity());
    println!("{}: {:?}", port, port_session.modem_lines());

    let watcher = std::thread::Builder::new()
        .name(format!("ti-usb-modem-watch-{}", port))
        .spawn({
            let port_session = port_session.clone();
            let cancel = cancel.clone();
            move || loop {
                match port_session.wait_modem_change(ModemStatus::STEADY_MASK, &cancel, None) {
                    Ok(_) => println!("{}: {:?}", port, port_session.modem_lines()),
                    Err(e) if e.is_retryable() => return,
                    Err(e) => {
                        debug!("Modem watch ended: {}", e);
                        return;
                    }
                }
            }
        })
        .context("Failed to spawn modem watcher")?;

    loop {
        tokio::select! {
            data = rx.recv() => match data {
                Some(PortData { port, data }) => {
                    println!("{}: rx {}", port, String::from_utf8_lossy(&data).escape_debug());
                }
                None => {
                    warn!("Receive channel closed");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    cancel.cancel();
    tokio::task::spawn_blocking(move || {
        if watcher.join().is_err() {
            error!("Modem watcher panicked");
        }
        // Close proceeds even though the token is cancelled
        port_session.close(&cancel);
        session.detach();
    })
    .await?;

    Ok(())
}
