use serde::{Deserialize, Serialize};

use crate::indicator::{Indicator, IndicatorKind};
use crate::model::Candle;

/// On-Balance Volume: running total of volume signed by close direction.
///
/// The first candle contributes its volume as-is. An unchanged close counts
/// as an up move.
#[derive(Debug, Clone, Default)]
pub struct OnBalanceVolume;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObvState {
    prev_close: Option<f64>,
    total: f64,
}

impl Indicator for OnBalanceVolume {
    type State = ObvState;
    type Output = f64;

    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Obv
    }

    fn required_candles(&self) -> usize {
        1
    }

    fn initial_state(&self) -> ObvState {
        ObvState::default()
    }

    fn next(&self, state: &mut ObvState, candle: &Candle) -> f64 {
        state.total = match state.prev_close {
            None => candle.volume,
            Some(prev) if candle.close < prev => state.total - candle.volume,
            Some(_) => state.total + candle.volume,
        };
        state.prev_close = Some(candle.close);
        state.total
    }
}
