//! Open directional exposure tracked by a trailing-stop controller

use serde::{Deserialize, Serialize};

use crate::error::{check_price, TrailingError, TrailingResult};
use crate::types::{Direction, Symbol};

/// One open position.
///
/// Entry, initial stop and quantity are fixed once opened, so the risk unit
/// R never changes. `current_stop_price` starts at the initial stop and is
/// only moved by [`crate::trailing::TrailingStopController`], always toward
/// less risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    symbol: Symbol,
    direction: Direction,
    entry_price: f64,
    initial_stop_price: f64,
    quantity: f64,
    current_stop_price: f64,
}

impl Position {
    /// Open a position, validating prices and stop placement
    pub fn open(
        symbol: Symbol,
        direction: Direction,
        entry_price: f64,
        initial_stop_price: f64,
        quantity: f64,
    ) -> TrailingResult<Self> {
        let position = Self {
            symbol,
            direction,
            entry_price,
            initial_stop_price,
            quantity,
            current_stop_price: initial_stop_price,
        };
        position.validate()?;
        Ok(position)
    }

    /// Check the invariants `open` establishes.
    ///
    /// Positions that arrive through deserialization (persisted snapshots)
    /// must pass this before a controller will take them.
    pub fn validate(&self) -> TrailingResult<()> {
        check_price(self.entry_price)?;
        check_price(self.initial_stop_price)?;
        check_price(self.current_stop_price)?;

        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(TrailingError::InvalidPosition(format!(
                "quantity must be finite and > 0, got {}",
                self.quantity
            )));
        }

        // Stop must sit on the protective side so that R > 0
        if self
            .direction
            .favorable_move(self.initial_stop_price, self.entry_price)
            <= 0.0
        {
            return Err(TrailingError::InvalidPosition(format!(
                "{} stop {} is not on the protective side of entry {}",
                self.direction, self.initial_stop_price, self.entry_price
            )));
        }

        if self
            .direction
            .is_tighter(self.initial_stop_price, self.current_stop_price)
        {
            return Err(TrailingError::InvalidPosition(format!(
                "current stop {} is looser than initial stop {}",
                self.current_stop_price, self.initial_stop_price
            )));
        }
        Ok(())
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn initial_stop_price(&self) -> f64 {
        self.initial_stop_price
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn current_stop_price(&self) -> f64 {
        self.current_stop_price
    }

    pub(crate) fn set_current_stop(&mut self, stop: f64) {
        self.current_stop_price = stop;
    }

    /// Risk unit R = |entry - initial stop|
    pub fn risk_unit(&self) -> f64 {
        (self.entry_price - self.initial_stop_price).abs()
    }

    /// Favorable excursion of `price` from entry, in units of R
    pub fn risk_multiple(&self, price: f64) -> f64 {
        self.direction.favorable_move(self.entry_price, price) / self.risk_unit()
    }

    /// Price at which the excursion reaches `rr` risk multiples
    pub fn price_at_rr(&self, rr: f64) -> f64 {
        self.entry_price + self.direction.sign() * rr * self.risk_unit()
    }

    /// Risk still on the table at the current stop (negative once profit is locked)
    pub fn open_risk(&self) -> f64 {
        self.direction
            .favorable_move(self.current_stop_price, self.entry_price)
            * self.quantity
    }

    /// True when `price` has reached or crossed the current stop
    pub fn is_stop_breached(&self, price: f64) -> bool {
        self.direction.favorable_move(self.current_stop_price, price) <= 0.0
    }

    pub fn pnl(&self, exit_price: f64) -> f64 {
        self.direction.favorable_move(self.entry_price, exit_price) * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;

    fn long() -> Position {
        Position::open(Symbol::new("BTCUSDT"), Direction::Long, 100.0, 98.0, 2.0).unwrap()
    }

    #[test]
    fn test_risk_unit_and_multiple() {
        let pos = long();
        assert_relative_eq!(pos.risk_unit(), 2.0);
        assert_relative_eq!(pos.risk_multiple(102.0), 1.0);
        assert_relative_eq!(pos.risk_multiple(99.0), -0.5);
        assert_relative_eq!(pos.price_at_rr(1.5), 103.0);
        assert_relative_eq!(pos.current_stop_price(), 98.0);
    }

    #[test]
    fn test_short_mirrors_long() {
        let pos =
            Position::open(Symbol::new("ETHUSDT"), Direction::Short, 100.0, 104.0, 1.0).unwrap();
        assert_relative_eq!(pos.risk_unit(), 4.0);
        assert_relative_eq!(pos.risk_multiple(92.0), 2.0);
        assert_relative_eq!(pos.price_at_rr(1.0), 96.0);
        assert!(pos.is_stop_breached(104.0));
        assert!(!pos.is_stop_breached(103.9));
        assert_relative_eq!(pos.pnl(90.0), 10.0);
    }

    #[test]
    fn test_open_rejects_bad_inputs() {
        let sym = Symbol::new("BTCUSDT");
        let err = Position::open(sym.clone(), Direction::Long, 100.0, 101.0, 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPosition);

        let err = Position::open(sym.clone(), Direction::Short, 100.0, 100.0, 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPosition);

        let err = Position::open(sym.clone(), Direction::Long, f64::NAN, 98.0, 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPrice);

        let err = Position::open(sym, Direction::Long, 100.0, 98.0, 0.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPosition);
    }

    #[test]
    fn test_validate_catches_tampered_snapshot() {
        let pos = long();
        let json = serde_json::to_string(&pos).unwrap();

        // Zero risk unit
        let flat: Position = serde_json::from_str(
            &json.replace("\"entry_price\":100.0", "\"entry_price\":98.0"),
        )
        .unwrap();
        assert_eq!(flat.validate().unwrap_err().kind(), ErrorKind::InvalidPosition);

        // Stop above a long entry
        let inverted: Position = serde_json::from_str(
            &json
                .replace("\"initial_stop_price\":98.0", "\"initial_stop_price\":150.0")
                .replace("\"current_stop_price\":98.0", "\"current_stop_price\":150.0"),
        )
        .unwrap();
        assert_eq!(inverted.validate().unwrap_err().kind(), ErrorKind::InvalidPosition);

        let mut loosened = pos.clone();
        loosened.set_current_stop(97.0);
        assert_eq!(loosened.validate().unwrap_err().kind(), ErrorKind::InvalidPosition);

        assert!(pos.validate().is_ok());
    }

    #[test]
    fn test_open_risk() {
        let mut pos = long();
        assert_relative_eq!(pos.open_risk(), 4.0);
        pos.set_current_stop(101.0);
        assert_relative_eq!(pos.open_risk(), -2.0);
        assert!(pos.is_stop_breached(101.0));
    }
}
