//! Core data types shared by the trailing-stop core, replay and persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be finite and positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// Extreme in the position's favor: high for longs, low for shorts
    pub fn favorable_extreme(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.high,
            Direction::Short => self.low,
        }
    }

    /// Extreme against the position: low for longs, high for shorts
    pub fn adverse_extreme(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.low,
            Direction::Short => self.high,
        }
    }
}

/// Trading pair symbol using Arc<str> for cheap cloning
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of an open exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for longs, -1 for shorts
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Signed price move from `from` to `to`, positive when it favors the position
    #[inline]
    pub fn favorable_move(self, from: f64, to: f64) -> f64 {
        self.sign() * (to - from)
    }

    /// Level `pct` percent behind `price` on the protective side
    #[inline]
    pub fn offset_behind(self, price: f64, pct: f64) -> f64 {
        price * (1.0 - self.sign() * pct / 100.0)
    }

    /// True when `candidate` reduces risk compared with `current`
    #[inline]
    pub fn is_tighter(self, candidate: f64, current: f64) -> bool {
        self.favorable_move(current, candidate) > 0.0
    }

    /// Side of the protective stop order
    pub fn exit_side(self) -> &'static str {
        match self {
            Direction::Long => "SELL",
            Direction::Short => "BUY",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{}', expected long or short", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bar_validation() {
        let now = Utc::now();
        assert!(Bar::new(now, 100.0, 105.0, 95.0, 102.0, 10.0).is_ok());
        assert!(matches!(
            Bar::new(now, 100.0, 95.0, 105.0, 100.0, 10.0),
            Err(BarValidationError::HighLessThanLow { .. })
        ));
        assert!(matches!(
            Bar::new(now, 100.0, 105.0, 95.0, 110.0, 10.0),
            Err(BarValidationError::CloseOutOfRange { .. })
        ));
        assert!(matches!(
            Bar::new(now, f64::NAN, 105.0, 95.0, 100.0, 10.0),
            Err(BarValidationError::NonPositivePrice { .. })
        ));
        assert!(matches!(
            Bar::new(now, 100.0, 105.0, 95.0, 100.0, -1.0),
            Err(BarValidationError::NegativeVolume(_))
        ));
    }

    #[test]
    fn test_direction_offsets() {
        assert_relative_eq!(Direction::Long.offset_behind(200.0, 1.0), 198.0, epsilon = 1e-9);
        assert_relative_eq!(Direction::Short.offset_behind(200.0, 1.0), 202.0, epsilon = 1e-9);
        assert!(Direction::Long.is_tighter(99.0, 98.0));
        assert!(!Direction::Long.is_tighter(98.0, 98.0));
        assert!(Direction::Short.is_tighter(101.0, 102.0));
        assert_relative_eq!(Direction::Short.favorable_move(100.0, 97.0), 3.0);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("LONG".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("sell".parse::<Direction>().unwrap(), Direction::Short);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Short.to_string(), "SHORT");
        assert_eq!(Direction::Long.exit_side(), "SELL");
    }

    #[test]
    fn test_symbol_serde() {
        let symbol = Symbol::new("BTCUSDT");
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"BTCUSDT\"");
        let parsed: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, symbol);
    }
}
