//! trailing-guard - main entry point
//!
//! This binary provides two subcommands:
//! - check: Validate the launch configuration and environment credentials
//! - replay: Run the trailing-stop controller over historical bars

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trailing_guard::{Direction, TrailingModeKind};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "trailing-guard")]
#[command(about = "Trailing-stop controller with config checks and offline replay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and report missing credentials
    Check {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Replay the trailing stop over a CSV of OHLCV bars
    Replay {
        /// CSV with datetime,open,high,low,close,volume
        #[arg(short, long)]
        data: PathBuf,

        /// Position direction (long or short)
        #[arg(long)]
        direction: Direction,

        /// Initial protective stop price
        #[arg(long)]
        stop: f64,

        /// Entry price (defaults to the first bar's close)
        #[arg(long)]
        entry: Option<f64>,

        /// Position quantity (sized from risk_per_trade when omitted)
        #[arg(long)]
        quantity: Option<f64>,

        /// Account balance used for sizing
        #[arg(long, default_value = "1000")]
        balance: f64,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Trailing mode (overrides config)
        #[arg(long)]
        trailing_mode: Option<TrailingModeKind>,

        /// Activation threshold in R multiples (overrides config)
        #[arg(long)]
        activate_rr: Option<f64>,

        /// Step size in percent (overrides config)
        #[arg(long)]
        step_pct: Option<f64>,

        /// Buffer in percent (overrides config)
        #[arg(long)]
        buffer_pct: Option<f64>,

        /// Persist controller snapshots and the closed trade to this SQLite file
        #[arg(long)]
        state_db: Option<PathBuf>,

        /// Dump the state database (snapshots and trades) as JSON after the run
        #[arg(long, requires = "state_db")]
        export_state: Option<PathBuf>,

        /// Write the replay report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // Log file naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format as the console but without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Credentials live in .env next to the binary's working directory
    dotenv::dotenv().ok();

    let command_name = match &cli.command {
        Commands::Check { .. } => "check",
        Commands::Replay { .. } => "replay",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Check { config } => commands::check::run(config),

        Commands::Replay {
            data,
            direction,
            stop,
            entry,
            quantity,
            balance,
            config,
            trailing_mode,
            activate_rr,
            step_pct,
            buffer_pct,
            state_db,
            export_state,
            output,
        } => commands::replay::run(commands::replay::ReplayArgs {
            data,
            direction,
            stop,
            entry,
            quantity,
            balance,
            config,
            trailing_mode,
            activate_rr,
            step_pct,
            buffer_pct,
            state_db,
            export_state,
            output,
        }),
    }
}
