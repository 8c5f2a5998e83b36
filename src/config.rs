//! Configuration management
//!
//! Loads the JSON launch configuration, merges credentials from the
//! environment (after `.env` has been loaded by the binary) and validates the
//! trailing settings once into a [`TrailingConfig`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::TrailingResult;
use crate::risk::{PositionSizer, PositionSizerConfig};
use crate::trailing::{TrailingConfig, TrailingMode, TrailingModeKind};
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trading: TradingConfig,
    pub trailing: TrailingSettings,
    pub runtime: RuntimeConfig,
    /// Never read from or written to the config file
    #[serde(skip)]
    pub credentials: Credentials,
}

impl Config {
    /// Load configuration from JSON file and merge environment credentials
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.credentials = Credentials::from_env();
        Ok(config)
    }

    /// Config file when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(Config {
                credentials: Credentials::from_env(),
                ..Config::default()
            }),
        }
    }

    /// Validated trailing configuration, `None` when trailing is disabled
    pub fn trailing_config(&self) -> TrailingResult<Option<TrailingConfig>> {
        if !self.trailing.use_trailing_stop {
            return Ok(None);
        }
        self.trailing.to_trailing_config().map(Some)
    }

    pub fn position_sizer(&self, balance: f64) -> PositionSizer {
        PositionSizerConfig::default()
            .with_balance(balance)
            .with_risk_per_trade(self.trading.risk_per_trade)
            .with_leverage(self.trading.leverage)
            .with_min_notional(self.trading.min_notional)
            .with_rr_ratio(self.trading.rr_ratio)
            .build()
    }
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub interval: String,
    pub leverage: u32,
    pub risk_per_trade: f64,
    pub rr_ratio: f64,
    pub min_notional: f64,
    pub allow_multiple_positions: bool,
    pub dry_run: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
            ],
            interval: "5m".to_string(),
            leverage: 15,
            risk_per_trade: 0.03,
            rr_ratio: 4.0,
            min_notional: 105.0,
            allow_multiple_positions: true,
            dry_run: false,
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// Trailing-stop settings as they appear in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingSettings {
    pub use_trailing_stop: bool,
    pub trailing_mode: TrailingModeKind,
    pub trailing_activate_rr: f64,
    pub trailing_step_pct: Option<f64>,
    /// Distance behind price for continuous mode; falls back to `trailing_step_pct`
    pub trailing_offset_pct: Option<f64>,
    pub trailing_buffer_pct: f64,
    pub min_stop_change: f64,
}

impl Default for TrailingSettings {
    fn default() -> Self {
        TrailingSettings {
            use_trailing_stop: true,
            trailing_mode: TrailingModeKind::Step,
            trailing_activate_rr: 1.0,
            trailing_step_pct: Some(0.5),
            trailing_offset_pct: None,
            trailing_buffer_pct: 0.0,
            min_stop_change: 0.0,
        }
    }
}

impl TrailingSettings {
    pub fn to_trailing_config(&self) -> TrailingResult<TrailingConfig> {
        let mode = TrailingMode::from_kind(
            self.trailing_mode,
            self.trailing_step_pct,
            self.trailing_offset_pct,
        )?;
        TrailingConfig::new(mode, self.trailing_activate_rr, self.trailing_buffer_pct)?
            .with_min_stop_change(self.min_stop_change)
    }
}

/// Polling and display settings consumed by the live loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Seconds between trailing-stop evaluations
    pub update_interval: u64,
    /// Seconds between market data refreshes
    pub data_refresh_interval: u64,
    pub show_live_chart: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            update_interval: 5,
            data_refresh_interval: 5,
            show_live_chart: true,
        }
    }
}

/// Exchange and notification credentials, sourced only from the environment
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub binance_api_key: Option<String>,
    pub binance_api_secret: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as missing
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Credentials {
            binance_api_key: get("BINANCE_API_KEY"),
            binance_api_secret: get("BINANCE_API_SECRET"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
        }
    }

    /// Names of unset variables, exchange keys first
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("BINANCE_API_KEY", &self.binance_api_key),
            ("BINANCE_API_SECRET", &self.binance_api_secret),
            ("TELEGRAM_BOT_TOKEN", &self.telegram_bot_token),
            ("TELEGRAM_CHAT_ID", &self.telegram_chat_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn has_exchange_keys(&self) -> bool {
        self.binance_api_key.is_some() && self.binance_api_secret.is_some()
    }

    pub fn has_telegram(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_launch_flags() {
        let config = Config::default();
        assert_eq!(config.trading.symbols.len(), 3);
        assert_eq!(config.trading.interval, "5m");
        assert_eq!(config.trading.leverage, 15);
        assert_eq!(config.runtime.update_interval, 5);
        assert!(config.runtime.show_live_chart);

        let trailing = config.trailing_config().unwrap().unwrap();
        assert_eq!(trailing.mode, TrailingMode::Step { step_pct: 0.5 });
        assert_eq!(trailing.activate_rr, 1.0);
        assert_eq!(trailing.buffer_pct, 0.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "trading": { "symbols": ["SOLUSDT"], "leverage": 5 },
            "trailing": { "trailing_mode": "continuous", "trailing_offset_pct": 1.2 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.trading.symbols(), vec![Symbol::new("SOLUSDT")]);
        assert_eq!(config.trading.leverage, 5);
        assert_eq!(config.trading.risk_per_trade, 0.03);

        let trailing = config.trailing_config().unwrap().unwrap();
        assert_eq!(trailing.mode, TrailingMode::Continuous { offset_pct: 1.2 });
    }

    #[test]
    fn test_unknown_mode_fails_at_load() {
        let json = r#"{ "trailing": { "trailing_mode": "sometimes" } }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn test_disabled_trailing_yields_none() {
        let mut config = Config::default();
        config.trailing.use_trailing_stop = false;
        config.trailing.trailing_step_pct = None;
        assert!(config.trailing_config().unwrap().is_none());
    }

    #[test]
    fn test_step_mode_without_step_pct() {
        let mut config = Config::default();
        config.trailing.trailing_step_pct = None;
        let err = config.trailing_config().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        config.trailing.trailing_step_pct = Some(-1.0);
        assert!(config.trailing_config().is_err());
    }

    #[test]
    fn test_credentials_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("BINANCE_API_KEY", "key"),
            ("BINANCE_API_SECRET", "secret"),
            ("TELEGRAM_BOT_TOKEN", "  "),
        ]
        .into_iter()
        .collect();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(creds.has_exchange_keys());
        assert!(!creds.has_telegram());
        assert_eq!(
            creds.missing(),
            vec!["TELEGRAM_BOT_TOKEN", "TELEGRAM_CHAT_ID"]
        );
    }

    #[test]
    fn test_credentials_never_serialized() {
        let mut config = Config::default();
        config.credentials.binance_api_secret = Some("secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret\""));
        assert!(!json.contains("credentials"));
    }

    #[test]
    fn test_position_sizer_from_config() {
        let config = Config::default();
        let sizer = config.position_sizer(1_000.0);
        assert_eq!(sizer.config().leverage, 15);
        assert_eq!(sizer.config().min_notional, 105.0);
    }
}
