//! Check command implementation
//!
//! Pre-launch sanity check: logs the effective settings, warns about missing
//! credentials and fails on invalid trailing or risk settings.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use trailing_guard::Config;

pub fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    match &config_path {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No config file given, using defaults"),
    }

    let trading = &config.trading;
    info!("Symbols: {}", trading.symbols.join(", "));
    info!(
        "Interval: {} | Leverage: {}x | Risk per trade: {:.2}% | RR target: {:.1}",
        trading.interval,
        trading.leverage,
        trading.risk_per_trade * 100.0,
        trading.rr_ratio
    );
    info!(
        "Update interval: {}s | Data refresh: {}s | Live chart: {}",
        config.runtime.update_interval,
        config.runtime.data_refresh_interval,
        config.runtime.show_live_chart
    );
    if trading.dry_run {
        info!("Dry run enabled: no orders will be sent");
    }

    let missing = config.credentials.missing();
    if !config.credentials.has_exchange_keys() {
        warn!("Exchange credentials missing, live trading will fail");
    }
    if !config.credentials.has_telegram() {
        warn!("Telegram credentials missing, notifications disabled");
    }
    for name in &missing {
        warn!("{} is not set", name);
    }

    let trailing = config
        .trailing_config()
        .context("Invalid trailing stop settings")?;
    match trailing {
        Some(tc) => info!(
            "Trailing stop: {:?} | activate at {:.2}R | buffer {:.2}% | min change {}",
            tc.mode, tc.activate_rr, tc.buffer_pct, tc.min_stop_change
        ),
        None => info!("Trailing stop disabled"),
    }

    if trading.risk_per_trade <= 0.0 || trading.risk_per_trade >= 1.0 {
        anyhow::bail!(
            "risk_per_trade must be a fraction in (0, 1), got {}",
            trading.risk_per_trade
        );
    }
    if trading.leverage == 0 {
        anyhow::bail!("leverage must be at least 1");
    }

    info!("Configuration OK ({} warning(s))", missing.len());
    Ok(())
}
