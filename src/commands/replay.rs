//! Replay command implementation

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use trailing_guard::replay::replay_with;
use trailing_guard::state_store::{ClosedTrade, SqliteStateStore};
use trailing_guard::{
    data, Config, Direction, Position, Symbol, TrailingModeKind, TrailingStopController,
};

#[derive(Debug)]
pub struct ReplayArgs {
    pub data: PathBuf,
    pub direction: Direction,
    pub stop: f64,
    pub entry: Option<f64>,
    pub quantity: Option<f64>,
    pub balance: f64,
    pub config: Option<PathBuf>,
    pub trailing_mode: Option<TrailingModeKind>,
    pub activate_rr: Option<f64>,
    pub step_pct: Option<f64>,
    pub buffer_pct: Option<f64>,
    pub state_db: Option<PathBuf>,
    pub export_state: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Symbol from a `{SYMBOL}_{timeframe}.csv` style file name
fn symbol_from_path(path: &Path) -> Symbol {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("UNKNOWN");
    Symbol::new(stem.split('_').next().unwrap_or(stem).to_uppercase())
}

pub fn run(args: ReplayArgs) -> Result<()> {
    info!("Starting replay");

    let mut config = Config::load(args.config.as_deref())?;

    // Apply overrides
    if let Some(mode) = args.trailing_mode {
        info!("Overriding trailing mode to: {}", mode);
        config.trailing.trailing_mode = mode;
    }
    if let Some(rr) = args.activate_rr {
        info!("Overriding activation RR to: {}", rr);
        config.trailing.trailing_activate_rr = rr;
    }
    if let Some(step) = args.step_pct {
        info!("Overriding step to: {}%", step);
        config.trailing.trailing_step_pct = Some(step);
    }
    if let Some(buffer) = args.buffer_pct {
        info!("Overriding buffer to: {}%", buffer);
        config.trailing.trailing_buffer_pct = buffer;
    }

    let trailing = config
        .trailing_config()
        .context("Invalid trailing stop settings")?
        .context("Trailing stop is disabled in config, nothing to replay")?;

    let bars = data::load_csv(&args.data)?;
    let entry = match args.entry {
        Some(entry) => entry,
        None => bars[0].close,
    };

    let sizer = config.position_sizer(args.balance);
    let quantity = match args.quantity {
        Some(qty) => qty,
        None => {
            let qty = sizer.quantity(entry, args.stop);
            info!(
                "Sized position: {:.6} (risk {:.2}% of {:.2})",
                qty,
                config.trading.risk_per_trade * 100.0,
                args.balance
            );
            qty
        }
    };
    if !sizer.has_margin(entry, quantity) {
        warn!(
            "Position needs {:.2} margin at {}x, balance is {:.2}",
            sizer.required_margin(entry, quantity),
            config.trading.leverage,
            args.balance
        );
    }
    info!(
        "Take profit target ({:.1}R): {:.4}",
        config.trading.rr_ratio,
        sizer.take_profit(args.direction, entry, args.stop)
    );

    let symbol = symbol_from_path(&args.data);
    let position = Position::open(symbol, args.direction, entry, args.stop, quantity)?;
    let mut controller = TrailingStopController::new(position, trailing)?;

    let store = args
        .state_db
        .as_ref()
        .map(SqliteStateStore::open)
        .transpose()?;
    if let Some(store) = &store {
        store.save_snapshot(&controller.snapshot())?;
    }

    let report = replay_with(&mut controller, &bars, |ctl, event| {
        info!(
            "{} amend {} stop {:.4} -> {:.4} at {:.2}R",
            event.datetime,
            ctl.position().direction().exit_side(),
            event.previous_stop,
            event.new_stop,
            event.rr
        );
        if let Some(store) = &store {
            if let Err(e) = store.save_snapshot(&ctl.snapshot()) {
                warn!("Failed to persist snapshot: {:#}", e);
            }
        }
    })?;

    info!("═══════════════════════════════════════════════════════════");
    info!("REPLAY RESULTS: {} {}", report.symbol, report.direction);
    info!("═══════════════════════════════════════════════════════════");
    info!("Entry:          {:.4}", report.entry_price);
    info!("Initial stop:   {:.4}", report.initial_stop);
    info!("Final stop:     {:.4}", controller.current_stop());
    info!("Exit:           {:.4} ({})", report.exit_price, report.reason);
    info!("PnL:            {:.4} ({:+.2}R)", report.pnl, report.r_multiple);
    info!("Amendments:     {}", report.events.len());
    info!("Bars processed: {}/{}", report.bars_processed, bars.len());

    if let Some(store) = &store {
        store.remove_snapshot(report.symbol.as_str())?;
        store.record_trade(&ClosedTrade::from_report(&report, controller.current_stop()))?;

        if let Some(path) = &args.export_state {
            store.export_json(path)?;
            info!("State exported to: {}", path.display());
        }
    }

    if let Some(output) = &args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write report to {}", output.display()))?;
        info!("Report written to: {}", output.display());
    }

    Ok(())
}
