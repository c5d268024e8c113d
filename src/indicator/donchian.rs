//! Donchian Channel: highest high / lowest low over a lookback window.

use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::IndicatorError;
use crate::indicator::window::RollingWindow;
use crate::indicator::{Indicator, IndicatorKind};
use crate::model::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone)]
pub struct DonchianChannel {
    period: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonchianState {
    highs: RollingWindow,
    lows: RollingWindow,
}

impl DonchianChannel {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }
}

impl Indicator for DonchianChannel {
    type State = DonchianState;
    type Output = Option<Channel>;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Donchian
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    fn initial_state(&self) -> DonchianState {
        DonchianState {
            highs: RollingWindow::new(self.period),
            lows: RollingWindow::new(self.period),
        }
    }

    fn next(&self, state: &mut DonchianState, candle: &Candle) -> Option<Channel> {
        state.highs.push(candle.high);
        state.lows.push(candle.low);
        Some(Channel {
            high: state.highs.max()?,
            low: state.lows.min()?,
        })
    }
}
