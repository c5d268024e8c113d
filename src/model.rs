use serde::{Deserialize, Serialize};

/// One OHLCV bar.
///
/// Times are epoch milliseconds. The field names on the wire follow the
/// exchange kline shape (`openTime`, `closeTime`). `id` is the store's row
/// identifier and is `0` for candles that have not been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    #[serde(default)]
    pub id: i64,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A single indicator output: `None` while the indicator is still warming
/// up, `Some(v)` afterwards. `Some(NaN)` is a legitimate defined value and is
/// never used to mean "not enough history".
pub type IndicatorValue = Option<f64>;

/// Indicator values for one candle, aligned index-for-index with the input
/// series and keyed by the candle's row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub candle_id: i64,
    pub open_time: i64,
    pub ema_200: IndicatorValue,
    pub sma_short: IndicatorValue,
    pub sma_long: IndicatorValue,
    pub rsi_14: IndicatorValue,
    pub atr_14: IndicatorValue,
    pub bb_upper: IndicatorValue,
    pub bb_lower: IndicatorValue,
    pub macd: IndicatorValue,
    pub macd_signal: IndicatorValue,
    pub donchian_high: IndicatorValue,
    pub donchian_low: IndicatorValue,
    pub obv: IndicatorValue,
}

impl IndicatorSnapshot {
    /// Column values in storage order.
    pub fn values(&self) -> [IndicatorValue; 12] {
        [
            self.ema_200,
            self.sma_short,
            self.sma_long,
            self.rsi_14,
            self.atr_14,
            self.bb_upper,
            self.bb_lower,
            self.macd,
            self.macd_signal,
            self.donchian_high,
            self.donchian_low,
            self.obv,
        ]
    }
}
