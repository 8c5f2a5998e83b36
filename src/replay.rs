//! Offline replay of a trailing-stop controller over historical bars
//!
//! Each bar is first checked against the stop in force when the bar opened;
//! only if the stop survives does the bar feed the controller. This keeps
//! the replay from exiting on a stop level that was computed from the same
//! bar that would then trigger it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{TrailingError, TrailingResult};
use crate::trailing::{CloseReason, TrailingStopController};
use crate::types::{Bar, Direction, Symbol};

/// One stop amendment emitted during replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopEvent {
    pub datetime: DateTime<Utc>,
    pub previous_stop: f64,
    pub new_stop: f64,
    /// Favorable excursion of the bar in R multiples
    pub rr: f64,
    pub activated: bool,
}

/// Outcome of replaying one position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub quantity: f64,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub reason: CloseReason,
    pub pnl: f64,
    /// Realized result in units of initial risk
    pub r_multiple: f64,
    pub bars_processed: usize,
    pub activated_at: Option<DateTime<Utc>>,
    pub events: Vec<StopEvent>,
}

/// Drive `controller` across `bars` until the stop is hit or the data ends.
///
/// Gaps through the stop fill at the bar open rather than the stop price.
pub fn replay(
    controller: &mut TrailingStopController,
    bars: &[Bar],
) -> TrailingResult<ReplayReport> {
    replay_with(controller, bars, |_, _| {})
}

/// Like [`replay`], calling `on_amend` after every applied stop amendment
pub fn replay_with<F>(
    controller: &mut TrailingStopController,
    bars: &[Bar],
    mut on_amend: F,
) -> TrailingResult<ReplayReport>
where
    F: FnMut(&TrailingStopController, &StopEvent),
{
    let direction = controller.position().direction();
    let mut events = Vec::new();
    let mut activated_at = None;
    let mut exit: Option<(f64, DateTime<Utc>, CloseReason)> = None;
    let mut processed = 0usize;

    for bar in bars {
        bar.validate()?;
        processed += 1;

        let stop = controller.current_stop();
        if controller.is_stop_breached(bar.adverse_extreme(direction)) {
            let fill = if controller.is_stop_breached(bar.open) {
                bar.open
            } else {
                stop
            };
            let reason = controller.on_stop_hit()?;
            exit = Some((fill, bar.datetime, reason));
            break;
        }

        let update = controller.on_bar(bar)?;
        if update.activated {
            activated_at = Some(bar.datetime);
        }
        if update.updated {
            let event = StopEvent {
                datetime: bar.datetime,
                previous_stop: update.previous_stop,
                new_stop: update.stop_price,
                rr: controller.risk_multiple(bar.favorable_extreme(direction)),
                activated: update.activated,
            };
            on_amend(controller, &event);
            events.push(event);
        } else {
            debug!("{} stop unchanged at {:.4}", bar.datetime, update.stop_price);
        }
    }

    let (exit_price, exit_time, reason) = match exit {
        Some(exit) => exit,
        None => {
            let last = bars.last().ok_or_else(|| {
                TrailingError::InvalidPosition("no bars to replay".into())
            })?;
            let reason = controller.on_manual_close()?;
            (last.close, last.datetime, reason)
        }
    };

    let position = controller.position();
    let pnl = position.pnl(exit_price);
    let r_multiple = position.risk_multiple(exit_price);

    info!(
        "Replay {} {}: exit {:.4} ({}) pnl={:.4} R={:.2} amendments={}",
        position.symbol(),
        direction,
        exit_price,
        reason,
        pnl,
        r_multiple,
        events.len()
    );

    Ok(ReplayReport {
        symbol: position.symbol().clone(),
        direction,
        entry_price: position.entry_price(),
        initial_stop: position.initial_stop_price(),
        quantity: position.quantity(),
        exit_price,
        exit_time,
        reason,
        pnl,
        r_multiple,
        bars_processed: processed,
        activated_at,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::position::Position;
    use crate::trailing::{TrailingConfig, TrailingState};
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn bars(rows: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        let start = Utc::now();
        rows.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| {
                Bar::new(start + Duration::minutes(5 * i as i64), o, h, l, c, 1.0).unwrap()
            })
            .collect()
    }

    fn controller() -> TrailingStopController {
        let pos =
            Position::open(Symbol::new("BTCUSDT"), Direction::Long, 100.0, 98.0, 1.0).unwrap();
        TrailingStopController::new(pos, TrailingConfig::step(0.5, 1.0, 0.0).unwrap()).unwrap()
    }

    #[test]
    fn test_replay_exits_on_trailed_stop() {
        let mut ctl = controller();
        let data = bars(&[
            (100.0, 101.0, 99.5, 100.8),
            (100.8, 102.0, 100.5, 101.8), // activates, stop -> 101.49
            (101.8, 102.6, 101.6, 102.4), // stop -> 102.087
            (102.4, 102.5, 101.9, 102.0), // breaches 102.087
            (102.0, 105.0, 101.0, 104.0),
        ]);

        let report = replay(&mut ctl, &data).unwrap();
        assert_eq!(report.reason, CloseReason::TrailingStop);
        assert_eq!(report.bars_processed, 4);
        assert_eq!(report.events.len(), 2);
        assert!(report.events[0].activated);
        assert_relative_eq!(report.exit_price, 102.087, epsilon = 1e-9);
        assert_relative_eq!(report.pnl, 2.087, epsilon = 1e-9);
        assert_eq!(report.activated_at, Some(data[1].datetime));
        assert_eq!(ctl.state(), TrailingState::Closed);
    }

    #[test]
    fn test_replay_with_reports_each_amendment() {
        let mut ctl = controller();
        let data = bars(&[
            (100.8, 102.0, 100.5, 101.8),
            (101.8, 102.6, 101.6, 102.4),
            (102.4, 102.7, 102.2, 102.5),
        ]);
        let mut seen = Vec::new();
        let report = replay_with(&mut ctl, &data, |ctl, event| {
            assert_eq!(ctl.current_stop(), event.new_stop);
            seen.push(ctl.adjustments());
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(report.events.len(), 2);
    }

    #[test]
    fn test_replay_gap_fills_at_open() {
        let mut ctl = controller();
        let data = bars(&[(99.0, 99.5, 98.5, 99.0), (97.0, 97.5, 96.0, 96.5)]);
        let report = replay(&mut ctl, &data).unwrap();
        assert_eq!(report.reason, CloseReason::StopLoss);
        assert_relative_eq!(report.exit_price, 97.0);
        assert_relative_eq!(report.r_multiple, -1.5);
    }

    #[test]
    fn test_replay_closes_manually_at_end() {
        let mut ctl = controller();
        let data = bars(&[(100.0, 100.5, 99.5, 100.2), (100.2, 101.0, 100.0, 100.9)]);
        let report = replay(&mut ctl, &data).unwrap();
        assert_eq!(report.reason, CloseReason::Manual);
        assert_relative_eq!(report.exit_price, 100.9);
        assert!(report.events.is_empty());
        assert!(report.activated_at.is_none());
    }

    #[test]
    fn test_replay_on_closed_controller_fails() {
        let mut ctl = controller();
        ctl.on_manual_close().unwrap();
        let data = bars(&[(100.0, 100.5, 99.5, 100.2)]);
        let err = replay(&mut ctl, &data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
