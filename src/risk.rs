//! Position sizing and margin checks
//!
//! Sizes a new position so that hitting the initial stop loses a fixed
//! fraction of the account balance:
//!
//! ```text
//! quantity = max(balance * risk_per_trade / |entry - stop|, min_notional / entry)
//! ```
//!
//! The notional floor keeps tiny-risk trades above the exchange minimum, so
//! the realized risk can exceed `risk_per_trade` when the stop is very wide.

use tracing::debug;

use crate::types::Direction;

/// Configuration for PositionSizer using builder pattern
#[derive(Debug, Clone)]
pub struct PositionSizerConfig {
    /// Account balance in quote currency
    pub balance: f64,
    /// Fraction of balance risked per trade (0.03 = 3%)
    pub risk_per_trade: f64,
    pub leverage: u32,
    /// Smallest order value accepted by the exchange
    pub min_notional: f64,
    /// Take-profit distance in multiples of R
    pub rr_ratio: f64,
}

impl Default for PositionSizerConfig {
    fn default() -> Self {
        Self {
            balance: 1_000.0,
            risk_per_trade: 0.03,
            leverage: 15,
            min_notional: 105.0,
            rr_ratio: 4.0,
        }
    }
}

impl PositionSizerConfig {
    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = balance;
        self
    }

    /// Set risk per trade as a fraction (e.g., 0.03 = 3%)
    pub fn with_risk_per_trade(mut self, risk: f64) -> Self {
        self.risk_per_trade = risk;
        self
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_min_notional(mut self, min_notional: f64) -> Self {
        self.min_notional = min_notional;
        self
    }

    pub fn with_rr_ratio(mut self, rr_ratio: f64) -> Self {
        self.rr_ratio = rr_ratio;
        self
    }

    pub fn build(self) -> PositionSizer {
        PositionSizer { config: self }
    }
}

/// Computes quantities, margin requirements and targets for new positions
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: PositionSizerConfig,
}

impl PositionSizer {
    pub fn config(&self) -> &PositionSizerConfig {
        &self.config
    }

    /// Quantity risking `risk_per_trade` of the balance between entry and stop
    pub fn quantity(&self, entry_price: f64, stop_price: f64) -> f64 {
        let stop_distance = (entry_price - stop_price).abs();
        if stop_distance == 0.0 || entry_price <= 0.0 {
            return 0.0;
        }

        let risk_amount = self.config.balance * self.config.risk_per_trade;
        let risk_sized = risk_amount / stop_distance;
        let notional_floor = self.config.min_notional / entry_price;

        debug!(
            "Sizing: risk_amount={:.2}, stop_distance={:.4}, risk_sized={:.6}, floor={:.6}",
            risk_amount, stop_distance, risk_sized, notional_floor
        );

        risk_sized.max(notional_floor)
    }

    /// Margin locked by a position at the configured leverage
    pub fn required_margin(&self, entry_price: f64, quantity: f64) -> f64 {
        let leverage = self.config.leverage.max(1) as f64;
        entry_price * quantity / leverage
    }

    pub fn has_margin(&self, entry_price: f64, quantity: f64) -> bool {
        self.required_margin(entry_price, quantity) <= self.config.balance
    }

    /// Target `rr_ratio` risk units beyond entry
    pub fn take_profit(&self, direction: Direction, entry_price: f64, stop_price: f64) -> f64 {
        let risk = (entry_price - stop_price).abs();
        entry_price + direction.sign() * self.config.rr_ratio * risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sizer() -> PositionSizer {
        PositionSizerConfig::default()
            .with_balance(10_000.0)
            .with_risk_per_trade(0.02)
            .with_leverage(10)
            .build()
    }

    #[test]
    fn test_quantity_from_risk() {
        // Risk = 10,000 * 0.02 = 200, stop distance = 5 -> 40 units
        assert_relative_eq!(sizer().quantity(100.0, 95.0), 40.0);
    }

    #[test]
    fn test_quantity_respects_notional_floor() {
        // 1.0 of risk over a 30,000 stop is ~2 notional, far below 105
        let sizer = PositionSizerConfig::default()
            .with_balance(100.0)
            .with_risk_per_trade(0.01)
            .build();
        let qty = sizer.quantity(60_000.0, 30_000.0);
        assert_relative_eq!(qty, 105.0 / 60_000.0);
    }

    #[test]
    fn test_zero_stop_distance() {
        assert_eq!(sizer().quantity(100.0, 100.0), 0.0);
    }

    #[test]
    fn test_margin_check() {
        let sizer = sizer();
        assert_relative_eq!(sizer.required_margin(100.0, 40.0), 400.0);
        assert!(sizer.has_margin(100.0, 40.0));
        assert!(!sizer.has_margin(100.0, 1_001.0));
    }

    #[test]
    fn test_take_profit() {
        let sizer = sizer();
        assert_relative_eq!(sizer.take_profit(Direction::Long, 100.0, 98.0), 108.0);
        assert_relative_eq!(sizer.take_profit(Direction::Short, 100.0, 102.0), 92.0);
    }
}
