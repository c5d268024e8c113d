use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::ma::{Ema, EmaState};
use crate::indicator::{Indicator, IndicatorKind};
use crate::model::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
}

/// MACD line (fast EMA - slow EMA) and its EMA signal line.
///
/// All three EMAs seed with their first input, so both lines are defined
/// from the very first candle.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        signal_period: usize,
    ) -> Result<Self, Report<IndicatorError>> {
        if fast_period == 0 || slow_period == 0 || signal_period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "all periods must be > 0".into(),
            });
        }
        if fast_period >= slow_period {
            bail!(IndicatorError::InvalidParameter {
                name: "fast_period must be < slow_period".into(),
            });
        }
        Ok(Self {
            fast: Ema::new(fast_period)?,
            slow: Ema::new(slow_period)?,
            signal: Ema::new(signal_period)?,
        })
    }
}

impl Indicator for Macd {
    type State = MacdState;
    type Output = MacdPoint;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Macd
    }

    fn required_candles(&self) -> usize {
        1
    }

    fn initial_state(&self) -> MacdState {
        MacdState::default()
    }

    fn next(&self, state: &mut MacdState, candle: &Candle) -> MacdPoint {
        let fast = self.fast.update(&mut state.fast, candle.close);
        let slow = self.slow.update(&mut state.slow, candle.close);
        let macd = fast - slow;
        let signal = self.signal.update(&mut state.signal, macd);
        MacdPoint {
            macd,
            signal,
            histogram: macd - signal,
        }
    }
}
