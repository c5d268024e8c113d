use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::window::RollingWindow;
use crate::indicator::{Indicator, IndicatorKind};
use crate::model::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger Bands: SMA of closes +/- `k` sample standard deviations.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Result<Self, Report<IndicatorError>> {
        if period < 2 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be >= 2".into(),
            });
        }
        if std_dev_multiplier <= 0.0 || !std_dev_multiplier.is_finite() {
            bail!(IndicatorError::InvalidParameter {
                name: "std_dev_multiplier must be > 0".into(),
            });
        }
        Ok(Self {
            period,
            std_dev_multiplier,
        })
    }
}

impl Indicator for BollingerBands {
    type State = RollingWindow;
    type Output = Option<Bands>;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Bollinger
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    fn initial_state(&self) -> RollingWindow {
        RollingWindow::new(self.period)
    }

    fn next(&self, window: &mut RollingWindow, candle: &Candle) -> Option<Bands> {
        window.push(candle.close);
        let middle = window.mean()?;
        let std_dev = window.sample_std(middle);
        Some(Bands {
            upper: middle + self.std_dev_multiplier * std_dev,
            middle,
            lower: middle - self.std_dev_multiplier * std_dev,
        })
    }
}
