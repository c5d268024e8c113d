use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::window::RollingWindow;
use crate::indicator::{Indicator, IndicatorKind};
use crate::model::{Candle, IndicatorValue};

/// Simple Moving Average of closes.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    type State = RollingWindow;
    type Output = IndicatorValue;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sma
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    fn initial_state(&self) -> RollingWindow {
        RollingWindow::new(self.period)
    }

    fn next(&self, window: &mut RollingWindow, candle: &Candle) -> IndicatorValue {
        window.push(candle.close);
        window.mean()
    }
}

/// Last value of an exponential recurrence; `None` before the first input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmaState {
    last: Option<f64>,
}

/// Exponential Moving Average.
///
/// Seeded with the first input itself, so it is defined from index 0 and
/// every value depends on the whole prefix, not just the last `period` points.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Feed one raw value into the recurrence.
    pub fn update(&self, state: &mut EmaState, value: f64) -> f64 {
        let ema = match state.last {
            None => value,
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
        };
        state.last = Some(ema);
        ema
    }
}

impl Indicator for Ema {
    type State = EmaState;
    type Output = f64;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Ema
    }

    fn required_candles(&self) -> usize {
        1
    }

    fn initial_state(&self) -> EmaState {
        EmaState::default()
    }

    fn next(&self, state: &mut EmaState, candle: &Candle) -> f64 {
        self.update(state, candle.close)
    }
}
