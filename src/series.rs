use error_stack::{Report, bail};

use crate::error::EngineError;
use crate::model::Candle;

/// Fewest candles any computation run accepts.
pub const MIN_HISTORY: usize = 60;

/// An ordered, read-only view over the candles of one computation run.
///
/// Candles must already be sorted ascending by `open_time`; the series
/// rejects out-of-order input but never sorts it.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series, failing with `InsufficientHistory` below
    /// [`MIN_HISTORY`] candles and with `MalformedInput` on non-increasing
    /// open times or non-finite prices/volumes.
    pub fn new(candles: Vec<Candle>) -> Result<Self, Report<EngineError>> {
        Self::with_min_history(candles, MIN_HISTORY)
    }

    pub(crate) fn with_min_history(
        candles: Vec<Candle>,
        min_history: usize,
    ) -> Result<Self, Report<EngineError>> {
        if candles.len() < min_history {
            bail!(EngineError::InsufficientHistory {
                required: min_history,
                available: candles.len(),
            });
        }
        validate_candles(&candles, None)?;
        Ok(Self { candles })
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn close(&self, index: usize) -> f64 {
        self.candles[index].close
    }

    pub fn high(&self, index: usize) -> f64 {
        self.candles[index].high
    }

    pub fn low(&self, index: usize) -> f64 {
        self.candles[index].low
    }

    pub fn volume(&self, index: usize) -> f64 {
        self.candles[index].volume
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

/// Check ordering and finiteness. When `after` is set every open time must
/// also be strictly greater than it.
pub(crate) fn validate_candles(
    candles: &[Candle],
    after: Option<i64>,
) -> Result<(), Report<EngineError>> {
    let mut previous = after;
    for (index, candle) in candles.iter().enumerate() {
        if let Some(prev) = previous {
            if candle.open_time <= prev {
                bail!(EngineError::MalformedInput {
                    index,
                    reason: format!(
                        "open_time {} is not after previous open_time {prev}",
                        candle.open_time
                    ),
                });
            }
        }
        let fields = [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
            ("volume", candle.volume),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            bail!(EngineError::MalformedInput {
                index,
                reason: format!("{name} is not finite ({value})"),
            });
        }
        previous = Some(candle.open_time);
    }
    Ok(())
}
