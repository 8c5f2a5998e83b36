//! Trailing-stop state machine
//!
//! One [`TrailingStopController`] is created per open position. It consumes
//! price ticks (or bars) and decides when the protective stop should move.
//! It never talks to an exchange: a returned [`StopUpdate`] with
//! `updated == true` is the signal for the caller to amend the stop order.
//!
//! ```text
//! INACTIVE --(RR >= activate_rr)--> ACTIVE --(stop hit / manual close)--> CLOSED
//!     \________________________(stop hit / manual close)____________________/
//! ```
//!
//! The stop is a ratchet: once moved it only ever tightens.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{check_price, TrailingError, TrailingResult};
use crate::position::Position;
use crate::types::Bar;

/// Tolerance for the step gate so that an exact one-step move is not lost to rounding
const STEP_EPSILON: f64 = 1e-12;

/// Trailing mode as named in configuration (`step`, `continuous`, `bar_extremes`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingModeKind {
    Step,
    Continuous,
    BarExtremes,
}

impl fmt::Display for TrailingModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrailingModeKind::Step => "step",
            TrailingModeKind::Continuous => "continuous",
            TrailingModeKind::BarExtremes => "bar_extremes",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TrailingModeKind {
    type Err = TrailingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "step" => Ok(TrailingModeKind::Step),
            "continuous" => Ok(TrailingModeKind::Continuous),
            "bar_extremes" | "bar-extremes" => Ok(TrailingModeKind::BarExtremes),
            other => Err(TrailingError::InvalidConfig(format!(
                "unknown trailing mode '{}' (expected step, continuous or bar_extremes)",
                other
            ))),
        }
    }
}

/// Validated trailing mode with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrailingMode {
    /// Move the stop `step_pct` behind price, but only after price has advanced
    /// a full `step_pct` since the last adjustment
    Step { step_pct: f64 },
    /// Keep the stop `offset_pct` behind price on every improving tick
    Continuous { offset_pct: f64 },
    /// Trail the stop to the adverse extreme of the latest bar
    BarExtremes,
}

impl TrailingMode {
    pub fn kind(&self) -> TrailingModeKind {
        match self {
            TrailingMode::Step { .. } => TrailingModeKind::Step,
            TrailingMode::Continuous { .. } => TrailingModeKind::Continuous,
            TrailingMode::BarExtremes => TrailingModeKind::BarExtremes,
        }
    }

    /// Build a mode from its configured name.
    ///
    /// Continuous mode uses `offset_pct` when given, otherwise `step_pct`.
    pub fn from_kind(
        kind: TrailingModeKind,
        step_pct: Option<f64>,
        offset_pct: Option<f64>,
    ) -> TrailingResult<Self> {
        match kind {
            TrailingModeKind::Step => step_pct
                .map(|step_pct| TrailingMode::Step { step_pct })
                .ok_or_else(|| {
                    TrailingError::InvalidConfig("step mode requires trailing_step_pct".into())
                }),
            TrailingModeKind::Continuous => offset_pct
                .or(step_pct)
                .map(|offset_pct| TrailingMode::Continuous { offset_pct })
                .ok_or_else(|| {
                    TrailingError::InvalidConfig(
                        "continuous mode requires trailing_offset_pct or trailing_step_pct".into(),
                    )
                }),
            TrailingModeKind::BarExtremes => Ok(TrailingMode::BarExtremes),
        }
    }
}

/// Immutable trailing configuration snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    pub mode: TrailingMode,
    /// Risk multiple at which trailing engages
    pub activate_rr: f64,
    /// Safety margin applied behind the theoretical trail level, in percent
    pub buffer_pct: f64,
    /// Improvements no larger than this absolute amount are ignored
    #[serde(default)]
    pub min_stop_change: f64,
}

impl TrailingConfig {
    pub fn new(mode: TrailingMode, activate_rr: f64, buffer_pct: f64) -> TrailingResult<Self> {
        let config = Self {
            mode,
            activate_rr,
            buffer_pct,
            min_stop_change: 0.0,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn step(step_pct: f64, activate_rr: f64, buffer_pct: f64) -> TrailingResult<Self> {
        Self::new(TrailingMode::Step { step_pct }, activate_rr, buffer_pct)
    }

    pub fn continuous(offset_pct: f64, activate_rr: f64, buffer_pct: f64) -> TrailingResult<Self> {
        Self::new(TrailingMode::Continuous { offset_pct }, activate_rr, buffer_pct)
    }

    pub fn with_min_stop_change(mut self, min_stop_change: f64) -> TrailingResult<Self> {
        self.min_stop_change = min_stop_change;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> TrailingResult<()> {
        fn percent(name: &str, value: f64) -> TrailingResult<()> {
            if value.is_finite() && value > 0.0 && value < 100.0 {
                Ok(())
            } else {
                Err(TrailingError::InvalidConfig(format!(
                    "{} must be in (0, 100), got {}",
                    name, value
                )))
            }
        }

        match self.mode {
            TrailingMode::Step { step_pct } => percent("step_pct", step_pct)?,
            TrailingMode::Continuous { offset_pct } => percent("offset_pct", offset_pct)?,
            TrailingMode::BarExtremes => {}
        }

        if !self.activate_rr.is_finite() || self.activate_rr < 0.0 {
            return Err(TrailingError::InvalidConfig(format!(
                "activate_rr must be >= 0, got {}",
                self.activate_rr
            )));
        }
        if !self.buffer_pct.is_finite() || !(0.0..100.0).contains(&self.buffer_pct) {
            return Err(TrailingError::InvalidConfig(format!(
                "buffer_pct must be in [0, 100), got {}",
                self.buffer_pct
            )));
        }
        if !self.min_stop_change.is_finite() || self.min_stop_change < 0.0 {
            return Err(TrailingError::InvalidConfig(format!(
                "min_stop_change must be >= 0, got {}",
                self.min_stop_change
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrailingState {
    Inactive,
    Active,
    Closed,
}

impl fmt::Display for TrailingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailingState::Inactive => write!(f, "INACTIVE"),
            TrailingState::Active => write!(f, "ACTIVE"),
            TrailingState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a position left the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Stop hit before trailing engaged
    StopLoss,
    /// Stop hit while trailing was active
    TrailingStop,
    Manual,
}

impl CloseReason {
    /// Stable identifier used in persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TrailingStop => "trailing_stop",
            CloseReason::Manual => "manual",
        }
    }
}

impl FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(CloseReason::StopLoss),
            "trailing_stop" => Ok(CloseReason::TrailingStop),
            "manual" => Ok(CloseReason::Manual),
            other => Err(format!("unknown close reason '{}'", other)),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "Stop Loss"),
            CloseReason::TrailingStop => write!(f, "Trailing Stop"),
            CloseReason::Manual => write!(f, "Manual Close"),
        }
    }
}

/// Result of feeding one price (or bar) to the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopUpdate {
    pub stop_price: f64,
    pub previous_stop: f64,
    /// Stop moved; the protective order needs amending
    pub updated: bool,
    /// This call moved the controller from INACTIVE to ACTIVE
    pub activated: bool,
    pub state: TrailingState,
}

/// Serializable controller state for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingSnapshot {
    pub position: Position,
    pub state: TrailingState,
    pub step_anchor: Option<f64>,
    pub adjustments: u32,
}

/// Trailing-stop controller for a single position
#[derive(Debug, Clone)]
pub struct TrailingStopController {
    position: Position,
    config: TrailingConfig,
    state: TrailingState,
    /// Reference price of the last applied STEP adjustment
    step_anchor: Option<f64>,
    adjustments: u32,
}

impl TrailingStopController {
    pub fn new(position: Position, config: TrailingConfig) -> TrailingResult<Self> {
        config.validate()?;
        position.validate()?;

        let state = if config.activate_rr == 0.0 {
            TrailingState::Active
        } else {
            TrailingState::Inactive
        };

        info!(
            "[Trailing] {} {} entry={:.4} stop={:.4} R={:.4} mode={} activation={:.4} ({})",
            position.symbol(),
            position.direction(),
            position.entry_price(),
            position.initial_stop_price(),
            position.risk_unit(),
            config.mode.kind(),
            position.price_at_rr(config.activate_rr),
            state
        );

        Ok(Self {
            position,
            config,
            state,
            step_anchor: None,
            adjustments: 0,
        })
    }

    /// Rebuild a controller from a persisted snapshot
    pub fn restore(snapshot: TrailingSnapshot, config: TrailingConfig) -> TrailingResult<Self> {
        config.validate()?;

        if snapshot.state == TrailingState::Closed {
            return Err(TrailingError::InvalidState {
                state: snapshot.state,
            });
        }

        let position = snapshot.position;
        position.validate()?;
        let stop = position.current_stop_price();

        let state = if config.activate_rr == 0.0 {
            TrailingState::Active
        } else {
            snapshot.state
        };

        debug!(
            "[Trailing] {} restored in {} with stop {:.4}",
            position.symbol(), state, stop
        );

        Ok(Self {
            position,
            config,
            state,
            step_anchor: snapshot.step_anchor,
            adjustments: snapshot.adjustments,
        })
    }

    pub fn snapshot(&self) -> TrailingSnapshot {
        TrailingSnapshot {
            position: self.position.clone(),
            state: self.state,
            step_anchor: self.step_anchor,
            adjustments: self.adjustments,
        }
    }

    pub fn state(&self) -> TrailingState {
        self.state
    }

    pub fn config(&self) -> &TrailingConfig {
        &self.config
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn into_position(self) -> Position {
        self.position
    }

    pub fn current_stop(&self) -> f64 {
        self.position.current_stop_price()
    }

    /// Number of stop amendments issued so far
    pub fn adjustments(&self) -> u32 {
        self.adjustments
    }

    /// Price at which trailing engages
    pub fn activation_price(&self) -> f64 {
        self.position.price_at_rr(self.config.activate_rr)
    }

    pub fn risk_multiple(&self, price: f64) -> f64 {
        self.position.risk_multiple(price)
    }

    pub fn is_stop_breached(&self, price: f64) -> bool {
        self.position.is_stop_breached(price)
    }

    /// Feed the latest market price.
    ///
    /// BAR_EXTREMES trails completed bars only and rejects single prices,
    /// since a stop at the tick itself would be breached by that same tick.
    pub fn on_price_update(&mut self, price: f64) -> TrailingResult<StopUpdate> {
        self.ensure_open()?;
        check_price(price)?;
        if self.config.mode == TrailingMode::BarExtremes {
            return Err(TrailingError::InvalidConfig(
                "bar_extremes mode trails completed bars, feed on_bar".into(),
            ));
        }
        Ok(self.evaluate(price, price))
    }

    /// Feed a completed bar.
    ///
    /// Activation and STEP/CONTINUOUS trailing use the favorable extreme;
    /// BAR_EXTREMES trails to the adverse extreme.
    pub fn on_bar(&mut self, bar: &Bar) -> TrailingResult<StopUpdate> {
        self.ensure_open()?;
        bar.validate()?;
        let direction = self.position.direction();
        Ok(self.evaluate(
            bar.favorable_extreme(direction),
            bar.adverse_extreme(direction),
        ))
    }

    pub fn on_stop_hit(&mut self) -> TrailingResult<CloseReason> {
        self.ensure_open()?;
        let reason = match self.state {
            TrailingState::Active => CloseReason::TrailingStop,
            _ => CloseReason::StopLoss,
        };
        self.close(reason);
        Ok(reason)
    }

    pub fn on_manual_close(&mut self) -> TrailingResult<CloseReason> {
        self.ensure_open()?;
        self.close(CloseReason::Manual);
        Ok(CloseReason::Manual)
    }

    fn close(&mut self, reason: CloseReason) {
        self.state = TrailingState::Closed;
        info!(
            "[Trailing] {} closed ({}) with stop {:.4} after {} adjustment(s)",
            self.position.symbol(),
            reason,
            self.current_stop(),
            self.adjustments
        );
    }

    fn ensure_open(&self) -> TrailingResult<()> {
        if self.state == TrailingState::Closed {
            return Err(TrailingError::InvalidState { state: self.state });
        }
        Ok(())
    }

    fn with_buffer(&self, level: f64) -> f64 {
        self.position
            .direction()
            .offset_behind(level, self.config.buffer_pct)
    }

    fn try_activate(&mut self, reference: f64) -> bool {
        if self.state != TrailingState::Inactive {
            return false;
        }
        let rr = self.position.risk_multiple(reference);
        if rr < self.config.activate_rr {
            return false;
        }
        self.state = TrailingState::Active;
        info!(
            "[Trailing] {} activated at {:.4} (RR {:.2} >= {:.2})",
            self.position.symbol(), reference, rr, self.config.activate_rr
        );
        true
    }

    fn step_reached(&self, reference: f64, step_pct: f64) -> bool {
        match self.step_anchor {
            None => true,
            Some(anchor) => {
                let moved = self.position.direction().favorable_move(anchor, reference) / anchor;
                moved + STEP_EPSILON >= step_pct / 100.0
            }
        }
    }

    /// Single read-modify-write of state and stop for one input
    fn evaluate(&mut self, reference: f64, adverse: f64) -> StopUpdate {
        let previous = self.current_stop();
        let activated = self.try_activate(reference);
        let unchanged = StopUpdate {
            stop_price: previous,
            previous_stop: previous,
            updated: false,
            activated,
            state: self.state,
        };

        if self.state != TrailingState::Active {
            return unchanged;
        }

        let direction = self.position.direction();
        let candidate = match self.config.mode {
            TrailingMode::Step { step_pct } => {
                if !self.step_reached(reference, step_pct) {
                    return unchanged;
                }
                self.with_buffer(direction.offset_behind(reference, step_pct))
            }
            TrailingMode::Continuous { offset_pct } => {
                self.with_buffer(direction.offset_behind(reference, offset_pct))
            }
            TrailingMode::BarExtremes => self.with_buffer(adverse),
        };

        let improvement = direction.favorable_move(previous, candidate);
        if improvement <= self.config.min_stop_change {
            debug!(
                "[Trailing] {} candidate {:.4} does not improve stop {:.4}",
                self.position.symbol(), candidate, previous
            );
            return unchanged;
        }

        self.position.set_current_stop(candidate);
        if let TrailingMode::Step { .. } = self.config.mode {
            self.step_anchor = Some(reference);
        }
        self.adjustments += 1;

        info!(
            "[Trailing] {} stop {:.4} -> {:.4} (price {:.4})",
            self.position.symbol(), previous, candidate, reference
        );

        StopUpdate {
            stop_price: candidate,
            previous_stop: previous,
            updated: true,
            activated,
            state: self.state,
        }
    }
}
