use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::window::RollingWindow;
use crate::indicator::{Indicator, IndicatorKind};
use crate::model::{Candle, IndicatorValue};

/// Average True Range as a simple rolling mean of true ranges.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtrState {
    prev_close: Option<f64>,
    true_ranges: RollingWindow,
}

impl Atr {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }
}

/// True range against the previous close. Undefined for the first candle.
pub fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    (candle.high - candle.low)
        .max((candle.high - prev_close).abs())
        .max((candle.low - prev_close).abs())
}

impl Indicator for Atr {
    type State = AtrState;
    type Output = IndicatorValue;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Atr
    }

    fn required_candles(&self) -> usize {
        self.period + 1
    }

    fn initial_state(&self) -> AtrState {
        AtrState {
            prev_close: None,
            true_ranges: RollingWindow::new(self.period),
        }
    }

    fn next(&self, state: &mut AtrState, candle: &Candle) -> IndicatorValue {
        let prev_close = state.prev_close.replace(candle.close)?;
        state.true_ranges.push(true_range(candle, prev_close));
        state.true_ranges.mean()
    }
}
