use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::window::RollingWindow;
use crate::indicator::{Indicator, IndicatorKind};
use crate::model::{Candle, IndicatorValue};

/// RSI over simple rolling means of gains and losses (no Wilder smoothing).
///
/// The first close has no delta, so the first defined value is at index
/// `period`.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsiState {
    prev_close: Option<f64>,
    gains: RollingWindow,
    losses: RollingWindow,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }
}

impl Indicator for Rsi {
    type State = RsiState;
    type Output = IndicatorValue;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn required_candles(&self) -> usize {
        self.period + 1
    }

    fn initial_state(&self) -> RsiState {
        RsiState {
            prev_close: None,
            gains: RollingWindow::new(self.period),
            losses: RollingWindow::new(self.period),
        }
    }

    fn next(&self, state: &mut RsiState, candle: &Candle) -> IndicatorValue {
        let prev = state.prev_close.replace(candle.close)?;
        let delta = candle.close - prev;
        state.gains.push(delta.max(0.0));
        state.losses.push((-delta).max(0.0));

        let avg_gain = state.gains.mean()?;
        let avg_loss = state.losses.mean()?;
        Some(rsi_value(avg_gain, avg_loss))
    }
}

/// RSI from average gain/loss. A window without losses reads 100, and a
/// window with no movement at all reads a neutral 50.
fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain > 0.0 { 100.0 } else { 50.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
