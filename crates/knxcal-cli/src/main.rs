//! `knxcal` -- iCal to KNX gateway.
//!
//! Fetches an iCalendar feed, finds the configured event and sends values to KNX
//! group addresses when a trigger's offset to that event is reached. Each value is
//! sent once per event occurrence; a state file remembers what was sent.
//!
//! ## Usage
//!
//! ```sh
//! # One evaluation, suitable for cron
//! knxcal --config /etc/knxcal/knxcal.toml
//!
//! # Evaluate every five minutes
//! knxcal run --interval 300
//!
//! # Dry run: evaluate and log, but neither send nor record
//! knxcal --no-knx --no-state --debug
//!
//! # Log to a file, rotated at 1 MB with four backups
//! knxcal run --interval 300 --log /var/log/knxcal.log
//!
//! # Validate the configuration and show when each trigger fires
//! knxcal check --resolve
//!
//! # Show what has been sent for the current occurrence
//! knxcal state
//! ```

mod bus;
mod config;
mod logfile;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::thread;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trigger_engine::{
    Coordinator, CoordinatorOptions, EventFeed, FeedError, FileLedgerStore, GroupBus, LedgerStore,
    Rule, TickError,
};

use crate::bus::KnxBus;
use crate::config::Config;
use crate::logfile::{RotatingFile, DEFAULT_BACKUPS, DEFAULT_MAX_BYTES};

const EXIT_DELIVERY: u8 = 2;
const EXIT_FEED: u8 = 3;
const EXIT_LEDGER: u8 = 4;
const EXIT_CONFIG: u8 = 225;

#[derive(Parser)]
#[command(name = "knxcal", version, about = "iCal to KNX gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true, env = "KNXCAL_CONFIG", default_value = "knxcal.toml")]
    config: PathBuf,

    /// Debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Disable KNX bus access
    #[arg(long, global = true)]
    no_knx: bool,

    /// Disable state keeping
    #[arg(long, global = true)]
    no_state: bool,

    /// Log to FILE instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Rotate the log file once it would exceed BYTES
    #[arg(long, global = true, value_name = "BYTES", default_value_t = DEFAULT_MAX_BYTES)]
    log_max_bytes: u64,

    /// Rotated log files to keep
    #[arg(long, global = true, value_name = "N", default_value_t = DEFAULT_BACKUPS)]
    log_backups: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate triggers and send due values (default)
    Run {
        /// Keep running, evaluating every SECS seconds
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Validate the configuration and list the triggers
    Check {
        /// Also fetch the calendar and show each trigger's time
        #[arg(long)]
        resolve: bool,
    },
    /// Print the stored state as JSON
    State,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }
    info!("KNX Calendar Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), "Error reading config: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let options = CoordinatorOptions {
        bus_enabled: !cli.no_knx,
        state_enabled: !cli.no_state,
        ..CoordinatorOptions::default()
    };

    match cli.command.unwrap_or(Commands::Run { interval: None }) {
        Commands::Run { interval } => run(&config, options, interval),
        Commands::Check { resolve } => check(&config, resolve),
        Commands::State => match show_state(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{:#}", e);
                ExitCode::from(EXIT_LEDGER)
            }
        },
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &cli.log {
        Some(path) => {
            let file = RotatingFile::open(path, cli.log_max_bytes, cli.log_backups)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn run(config: &Config, options: CoordinatorOptions, interval: Option<u64>) -> ExitCode {
    if !options.bus_enabled {
        warn!("KNX bus access disabled");
    }
    if !options.state_enabled {
        warn!(path = %config.state_file.display(), "state keeping disabled");
    }

    let mut coordinator = Coordinator::new(
        config.event_name.clone(),
        config.rules.clone(),
        config.feed(),
        KnxBus::new(config.connection.clone()),
        FileLedgerStore::new(&config.state_file),
    )
    .with_options(options);

    let Some(secs) = interval else {
        return ExitCode::from(tick(&mut coordinator));
    };
    let period = StdDuration::from_secs(secs.max(1));
    info!(interval_secs = period.as_secs(), "running continuously");
    loop {
        tick(&mut coordinator);
        thread::sleep(period);
    }
}

/// Run one tick and map its outcome to an exit code.
fn tick<F, B, S>(coordinator: &mut Coordinator<F, B, S>) -> u8
where
    F: EventFeed,
    B: GroupBus,
    S: LedgerStore,
{
    match coordinator.run_tick() {
        Ok(report) => {
            for failure in &report.failures {
                error!(
                    rule = %failure.rule,
                    error = %failure.error,
                    "value not delivered, retrying next run"
                );
            }
            info!(
                fired = report.fired_count(),
                skipped = report.skipped.len(),
                failed = report.failed_count(),
                "tick complete"
            );
            if report.is_clean() {
                0
            } else {
                EXIT_DELIVERY
            }
        }
        Err(TickError::Feed(FeedError::NotFound(name))) => {
            warn!(event = %name, "No current occurrence found in calendar");
            0
        }
        Err(TickError::Feed(e)) => {
            error!(error = %e, "could not resolve event");
            EXIT_FEED
        }
        Err(e @ TickError::LedgerWrite { .. }) => {
            error!(error = %e, "tick aborted");
            EXIT_LEDGER
        }
    }
}

fn check(config: &Config, resolve: bool) -> ExitCode {
    println!("calendar:   {}", config.ical_url);
    println!("event:      {}", config.event_name);
    println!("timezone:   {}", config.timezone);
    println!("state file: {}", config.state_file.display());
    println!("connection: {}", describe_connection(config));
    println!("triggers:   {}", config.rules.len());
    for rule in &config.rules {
        println!(
            "  {:<20} {:<18} {:<10} {:<7} {}",
            rule.name,
            describe_offset(rule),
            rule.address.to_string(),
            rule.dpt.to_string(),
            rule.value
        );
    }

    if !resolve {
        return ExitCode::SUCCESS;
    }

    let now = Utc::now();
    let window = match config.feed().resolve_event(&config.event_name, now) {
        Ok(window) => window,
        Err(e) => {
            error!(error = %e, "could not resolve event");
            return ExitCode::from(EXIT_FEED);
        }
    };
    println!("occurrence: {}", window.identity);
    println!("  start:    {}", window.start);
    println!("  end:      {}", window.end);
    for rule in &config.rules {
        let at = rule.trigger_at(&window);
        let status = if at <= now { "due" } else { "pending" };
        println!("  {:<20} {}  {}", rule.name, at, status);
    }
    ExitCode::SUCCESS
}

fn show_state(config: &Config) -> Result<()> {
    let state = FileLedgerStore::new(&config.state_file)
        .load()
        .with_context(|| format!("Failed to read state file: {}", config.state_file.display()))?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn describe_connection(config: &Config) -> String {
    let connection = &config.connection;
    match (connection.effective_type(), connection.gateway_ip) {
        (knx_bus::ConnectionType::Tunneling, Some(ip)) => {
            format!("tunneling via {}:{}", ip, connection.gateway_port)
        }
        _ => format!(
            "routing via {} as {}",
            connection.multicast_group, connection.individual_address
        ),
    }
}

/// `72h before begin`, `30m after end`.
fn describe_offset(rule: &Rule) -> String {
    let seconds = rule.offset.num_seconds();
    let magnitude = seconds.abs();
    let amount = if magnitude % 3600 == 0 {
        format!("{}h", magnitude / 3600)
    } else if magnitude % 60 == 0 {
        format!("{}m", magnitude / 60)
    } else {
        format!("{}s", magnitude)
    };
    let direction = if seconds >= 0 { "before" } else { "after" };
    format!("{} {} {}", amount, direction, rule.base)
}
