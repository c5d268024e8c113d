pub mod atr;
pub mod bollinger;
pub mod donchian;
pub mod ma;
pub mod macd;
pub mod obv;
pub mod rsi;
pub mod window;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::Candle;
use crate::series::CandleSeries;

/// The fixed set of indicator families the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Bollinger,
    Macd,
    Atr,
    Obv,
    Donchian,
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Rsi => "rsi",
            Self::Bollinger => "bollinger",
            Self::Macd => "macd",
            Self::Atr => "atr",
            Self::Obv => "obv",
            Self::Donchian => "donchian",
        };
        f.write_str(name)
    }
}

/// A technical indicator expressed as a per-candle recurrence.
///
/// Candles must be in ascending chronological order (oldest first). All
/// history an indicator needs lives in its `State`, which can be persisted
/// and handed back later to continue the recurrence where it stopped.
pub trait Indicator {
    type State: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned;
    type Output: Copy;

    fn kind(&self) -> IndicatorKind;

    /// Minimum number of candles required to produce the first defined value.
    fn required_candles(&self) -> usize;

    fn initial_state(&self) -> Self::State;

    /// Consume one candle and return the output for it.
    fn next(&self, state: &mut Self::State, candle: &Candle) -> Self::Output;

    /// One output per candle in `series`, starting from a fresh state.
    fn compute(&self, series: &CandleSeries) -> Vec<Self::Output> {
        let mut state = self.initial_state();
        self.resume(&mut state, series.candles())
    }

    /// Continue the recurrence over `candles`, updating `state` in place.
    fn resume(&self, state: &mut Self::State, candles: &[Candle]) -> Vec<Self::Output> {
        candles.iter().map(|c| self.next(state, c)).collect()
    }
}

/// Run an indicator from scratch over an unchecked candle slice.
#[cfg(test)]
pub(crate) fn run_over<I: Indicator>(indicator: &I, candles: &[Candle]) -> Vec<I::Output> {
    let mut state = indicator.initial_state();
    indicator.resume(&mut state, candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display() {
        assert_eq!(IndicatorKind::Bollinger.to_string(), "bollinger");
        assert_eq!(IndicatorKind::Donchian.to_string(), "donchian");
        assert_eq!(IndicatorKind::Obv.to_string(), "obv");
    }
}
