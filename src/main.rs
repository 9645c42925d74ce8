//! probe-console
//!
//! Interactive UART console for RP2350 boards, with a managed OpenOCD
//! bridge. `connect` starts OpenOCD (logging to a file), opens the UART,
//! and bridges it to the terminal: typed lines go to the board, board
//! output interleaves cleanly with a redrawn prompt, and Ctrl+C ends the
//! session and tears the bridge down.
//!
//! # Usage
//!
//! ```bash
//! # Bridge the board console, starting OpenOCD alongside
//! probe-console connect -d /dev/ttyACM0 -b 115200 -l openocd.log
//!
//! # Use a J-Link instead of the default CMSIS-DAP adapter
//! probe-console connect -d /dev/ttyACM0 -b 115200 -l openocd.log --probe jlink
//!
//! # List serial ports and probe profiles
//! probe-console list
//! probe-console probes
//!
//! # One-shot line without an interactive session
//! probe-console send -p /dev/ttyACM0 "help"
//! ```

mod probe;
mod serial;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::{debug, warn};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use probe::{get_profile, profile_names, ProbeCommand, ProbeProfile};
use serial::console::{self, Console};
use serial::{PortConfig, SerialConnection};

/// probe-console
///
/// Interactive UART console with a managed OpenOCD bridge
#[derive(Parser)]
#[command(name = "probe-console")]
#[command(version = "0.1.0")]
#[command(about = "Interactive UART console with a managed OpenOCD bridge for RP2350 boards")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the board console, starting the probe bridge alongside
    Connect(ConnectOpts),

    /// List available serial ports
    List,

    /// List built-in probe profiles
    Probes,

    /// Send a single line to the serial port
    Send {
        /// Serial port path
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long, default_value_t = serial::port::RP2350_DEFAULT_BAUD)]
        baud: u32,

        /// Line to send
        command: String,
    },
}

#[derive(Args)]
struct ConnectOpts {
    /// The UART device (e.g. /dev/ttyACM0)
    #[arg(short, long)]
    device: String,

    /// Baud rate for the UART connection (e.g. 115200)
    #[arg(short, long)]
    baud: u32,

    /// File for the probe bridge console logs
    #[arg(short, long)]
    logfile: PathBuf,

    /// Read timeout in seconds for the UART connection
    #[arg(short, long, default_value_t = 1)]
    timeout: u64,

    /// Probe profile (see `probe-console probes`)
    #[arg(long, default_value = "cmsis-dap")]
    probe: String,

    /// TOML file overriding the built-in probe profiles
    #[arg(long)]
    probe_config: Option<PathBuf>,

    /// Record the session to a file
    #[arg(long)]
    capture: Option<PathBuf>,

    /// Attach to an already-running bridge instead of starting one
    #[arg(long)]
    no_probe: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Connect(opts) => handle_connect(opts).await,
        Commands::List => serial::port::print_ports(),
        Commands::Probes => {
            handle_probes();
            Ok(())
        }
        Commands::Send {
            port,
            baud,
            command,
        } => handle_send(&port, baud, &command),
    }
}

/// Start the bridge, run the session, and always tear the bridge down.
///
/// The probe shutdown runs on every exit path, after the session has
/// released the serial port, whether the loop ended by interrupt or by a
/// transport failure.
async fn handle_connect(opts: ConnectOpts) -> Result<()> {
    let profile = resolve_profile(&opts)?;

    let probe = if opts.no_probe {
        println!(
            "{} Skipping probe bridge, attaching to the console only",
            "[*]".cyan().bold()
        );
        None
    } else {
        let cmd = ProbeCommand::from_profile(&profile);
        let handle = cmd
            .spawn(&opts.logfile)
            .context("Failed to start the probe bridge")?;
        println!(
            "{} Probe bridge running (pid {}), logging to {}",
            "[OK]".green().bold(),
            handle.id(),
            opts.logfile.display()
        );
        Some(handle)
    };

    let result = run_session(&opts).await;

    if let Some(handle) = probe {
        match handle.shutdown() {
            Ok(status) => debug!("probe bridge exited: {}", status),
            Err(e) => warn!("probe bridge shutdown failed: {}", e),
        }
    }

    result
}

fn resolve_profile(opts: &ConnectOpts) -> Result<ProbeProfile> {
    if let Some(ref path) = opts.probe_config {
        return ProbeProfile::from_toml_file(path);
    }

    get_profile(&opts.probe).cloned().ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown probe profile: {}. Use 'probe-console probes' to see available profiles.",
            opts.probe
        )
    })
}

/// Open the serial port and run the console loop until it ends.
///
/// The port is released before this returns: the write half drops with the
/// console, and the reader thread is joined after the running flag clears.
async fn run_session(opts: &ConnectOpts) -> Result<()> {
    let config = PortConfig::new(&opts.device)
        .with_baud_rate(opts.baud)
        .with_timeout(Duration::from_secs(opts.timeout));

    let mut conn = SerialConnection::open(config)?;
    conn.flush().context("Failed to flush serial port")?;
    let writer = conn.try_clone()?;

    println!(
        "{} Connected to {} at {} baud",
        "[OK]".green().bold(),
        opts.device,
        opts.baud
    );
    println!("{}", "Press Ctrl+C to exit".yellow());

    let running = Arc::new(AtomicBool::new(true));
    let (events, mut event_rx) = console::event_channel();

    console::spawn_operator_reader(io::BufReader::new(io::stdin()), events.clone());
    let serial_reader = console::spawn_serial_reader(conn, events.clone(), running.clone());
    console::spawn_interrupt_watcher(events);

    let console = Console::new(writer, io::stdout());
    let mut console = match opts.capture {
        Some(ref path) => console.with_capture(path)?,
        None => console,
    };

    let result = console.run(&mut event_rx).await;

    // Unblock the serial reader and wait for it to release its port
    // handle before the caller shuts the probe down.
    drop(event_rx);
    running.store(false, Ordering::SeqCst);
    if serial_reader.join().is_err() {
        warn!("serial reader thread panicked");
    }

    result
}

fn handle_probes() {
    println!("{}", "=".repeat(60));
    println!("{}", "Built-in Probe Profiles".cyan().bold());
    println!("{}", "=".repeat(60));

    for name in profile_names() {
        if let Some(profile) = get_profile(name) {
            println!("\n  {}: {}", name.white().bold(), profile.description);
            println!("    Interface: {}", profile.interface_cfg);
            println!("    Target: {}", profile.target_cfg);
            println!("    Adapter speed: {} kHz", profile.adapter_speed_khz);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "Use {} to load a custom profile",
        "--probe-config <file.toml>".cyan()
    );
}

fn handle_send(port: &str, baud: u32, command: &str) -> Result<()> {
    let config = PortConfig::new(port).with_baud_rate(baud);
    let mut conn = SerialConnection::open(config)?;

    println!(
        "{} Sending to {} at {} baud: {}",
        "[TX]".cyan().bold(),
        port,
        baud,
        command
    );
    conn.write_all(command.trim_end().as_bytes())
        .context("Failed to write to serial port")?;
    conn.write_all(b"\n")
        .context("Failed to write to serial port")?;
    conn.flush().context("Failed to flush serial port")?;

    println!("{}", "[OK] Line sent".green());
    Ok(())
}
