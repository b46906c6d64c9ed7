//! Meterpoll CLI
//!
//! Polls a power meter over Modbus RTU and prints each sweep.

use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use meterpoll_core::cli::{csv_header, print_exit_codes, render_register_map, render_snapshot};
use meterpoll_core::config;
use meterpoll_core::utils::ports;
use meterpoll_core::{
    AppConfig, CliResult, EventHub, ExitCodes, OutputFormat, PollInterval, PollingEngine, SerialParity,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Meterpoll CLI
#[derive(Parser, Debug)]
#[command(
    name = "meterpoll",
    author = "Meterpoll Team",
    version,
    about = "Modbus RTU power meter poller",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "METERPOLL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Write logs to a daily rolling file instead of stderr
    ///
    /// A bare file name is placed in the user log directory.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports, USB adapters first
    ListPorts,

    /// Show the register map that would be polled
    Registers,

    /// Poll the meter until interrupted
    Poll {
        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate (4800, 9600, 19200, 38400, 57600, 115200)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Parity (E, O, N)
        #[arg(long)]
        parity: Option<SerialParity>,

        /// Modbus unit id (1-247)
        #[arg(short, long)]
        unit: Option<u8>,

        /// Poll interval in milliseconds (minimum 200)
        #[arg(short, long)]
        interval: Option<String>,

        /// Low word first float32 layout
        #[arg(long)]
        word_swap: bool,

        /// Response timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Extra attempts after a timeout
        #[arg(long)]
        retries: Option<u32>,

        /// Stop after this many sweeps
        #[arg(short = 'n', long)]
        cycles: Option<u64>,
    },

    /// Write a config file with the defaults
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show exit codes
    ExitCodes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    tracing::debug!("Starting Meterpoll v{}", meterpoll_core::VERSION);

    let result = match &cli.command {
        Commands::ListPorts => list_ports(&cli),
        Commands::Registers => show_registers(&cli),
        Commands::Poll { .. } => poll(&cli),
        Commands::InitConfig { force } => init_config(&cli, *force),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
    .unwrap_or_else(CliResult::from);

    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                eprintln!("{msg}");
            }
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let log_file = cli.log_file.as_deref().map(config::log_file_path);
    if log_file.is_some() {
        if let Err(e) = config::init_directories() {
            eprintln!("Warning: could not create application directories: {e}");
        }
    }

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file = path.file_name().unwrap_or_else(|| OsStr::new("meterpoll.log"));
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file));

            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false);
            if cli.log_json {
                builder.json().init();
            } else {
                builder.init();
            }
            Some(guard)
        }
        None => {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr);
            if cli.log_json {
                builder.json().init();
            } else {
                builder.init();
            }
            None
        }
    }
}

fn list_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = ports::refresh(&EventHub::new())?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(CliResult::success());
    }

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ports)?),
        OutputFormat::Csv => {
            println!("name");
            for port in &ports {
                println!("{port}");
            }
        }
        OutputFormat::Text => {
            for port in &ports {
                println!("{port}");
            }
        }
    }

    Ok(CliResult::success())
}

fn show_registers(cli: &Cli) -> anyhow::Result<CliResult> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let map = config.register_map()?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(map.as_slice())?),
        OutputFormat::Csv => {
            println!("name,fc,offset,address,unit,scale");
            for def in &map {
                println!(
                    "{},{},{},{},{},{}",
                    def.name,
                    def.function.code(),
                    def.offset,
                    def.address(),
                    def.unit,
                    def.scale
                );
            }
        }
        OutputFormat::Text => println!("{}", render_register_map(&map)),
    }

    Ok(CliResult::success())
}

fn poll(cli: &Cli) -> anyhow::Result<CliResult> {
    let Commands::Poll {
        port,
        baud,
        parity,
        unit,
        interval,
        word_swap,
        timeout,
        retries,
        cycles,
    } = &cli.command
    else {
        return Ok(CliResult::error(ExitCodes::INVALID_ARGS, "not a poll command"));
    };

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(port) = port {
        config.connection.port.clone_from(port);
    }
    if let Some(baud) = baud {
        config.connection.baud_rate = *baud;
    }
    if let Some(parity) = parity {
        config.connection.parity = *parity;
    }
    if let Some(unit) = unit {
        config.connection.unit_id = *unit;
    }
    if let Some(timeout) = timeout {
        config.connection.timeout_ms = *timeout;
    }
    if *word_swap {
        config.connection.word_swap = true;
    }
    if let Some(retries) = retries {
        config.polling.retries = *retries;
    }

    let interval = match interval {
        Some(text) => PollInterval::from_text(text),
        None => PollInterval::from_millis(config.polling.interval_ms),
    };
    let map = config.register_map()?;

    let engine = PollingEngine::new().retry_policy(config.polling.retry_policy());

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    engine.start(config.connection.clone(), map, interval)?;
    if !cli.quiet {
        eprintln!("Polling {}", config.connection.connection_info());
    }
    if cli.format == OutputFormat::Csv {
        println!("{}", csv_header());
    }

    let mut printed = 0u64;
    let mut last_failed = 0usize;
    loop {
        match stop_rx.recv_timeout(Duration::from_millis(50)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let stats = engine.stats();
        if stats.cycles > printed {
            printed = stats.cycles;
            let rows = engine.snapshot();
            last_failed = rows
                .iter()
                .filter(|r| r.reading.as_ref().is_some_and(|r| !r.is_ok()))
                .count();
            if cli.format == OutputFormat::Text {
                println!("\n# cycle {printed}");
            }
            println!("{}", render_snapshot(&rows, printed, cli.format));

            if cycles.is_some_and(|limit| printed >= limit) {
                break;
            }
        }

        if !engine.is_running() {
            break;
        }
    }

    engine.stop();

    if cycles.is_some() && last_failed > 0 {
        return Ok(CliResult::error(
            ExitCodes::READ_ERRORS,
            format!("{last_failed} register(s) failed in the last sweep"),
        ));
    }
    Ok(CliResult::success_with_message(format!("Stopped after {printed} cycle(s)")))
}

fn init_config(cli: &Cli, force: bool) -> anyhow::Result<CliResult> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::default_path()?,
    };

    if path.exists() && !force {
        return Ok(CliResult::error(
            ExitCodes::CONFIG_ERROR,
            format!("{} already exists (use --force to overwrite)", path.display()),
        ));
    }

    AppConfig::default().save(&path)?;
    Ok(CliResult::success_with_message(format!("Wrote {}", path.display())))
}
