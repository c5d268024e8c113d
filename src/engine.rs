use error_stack::{Report, bail};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, IndicatorError};
use crate::indicator::atr::{Atr, AtrState};
use crate::indicator::bollinger::{Bands, BollingerBands};
use crate::indicator::donchian::{Channel, DonchianChannel, DonchianState};
use crate::indicator::ma::{Ema, EmaState, Sma};
use crate::indicator::macd::{Macd, MacdPoint, MacdState};
use crate::indicator::obv::{ObvState, OnBalanceVolume};
use crate::indicator::rsi::{Rsi, RsiState};
use crate::indicator::window::RollingWindow;
use crate::indicator::{Indicator, IndicatorKind};
use crate::model::{Candle, IndicatorSnapshot};
use crate::series::{CandleSeries, MIN_HISTORY, validate_candles};

/// Periods and multipliers for the indicator set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    pub ema_period: usize,
    pub sma_short_period: usize,
    pub sma_long_period: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub donchian_period: usize,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            ema_period: 200,
            sma_short_period: 20,
            sma_long_period: 50,
            rsi_period: 14,
            atr_period: 14,
            bollinger_period: 20,
            bollinger_k: 2.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            donchian_period: 20,
        }
    }
}

/// Everything needed to continue a computation after the last candle it saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub params: EngineParams,
    pub last_open_time: i64,
    pub candles_seen: usize,
    ema: EmaState,
    sma_short: RollingWindow,
    sma_long: RollingWindow,
    rsi: RsiState,
    atr: AtrState,
    bollinger: RollingWindow,
    macd: MacdState,
    donchian: DonchianState,
    obv: ObvState,
}

/// Runs the fixed indicator set over a candle series and lines the results
/// up into one snapshot per candle.
///
/// Computation is a pure function of its input. The batch path and the
/// resume path share the same per-candle recurrences, so splitting a series
/// and resuming yields exactly the values of a single full run.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    params: EngineParams,
    min_history: usize,
    ema: Ema,
    sma_short: Sma,
    sma_long: Sma,
    rsi: Rsi,
    atr: Atr,
    bollinger: BollingerBands,
    macd: Macd,
    donchian: DonchianChannel,
    obv: OnBalanceVolume,
}

impl IndicatorEngine {
    pub fn new(params: EngineParams) -> Result<Self, Report<IndicatorError>> {
        let ema = Ema::new(params.ema_period)?;
        let sma_short = Sma::new(params.sma_short_period)?;
        let sma_long = Sma::new(params.sma_long_period)?;
        let rsi = Rsi::new(params.rsi_period)?;
        let atr = Atr::new(params.atr_period)?;
        let bollinger = BollingerBands::new(params.bollinger_period, params.bollinger_k)?;
        let macd = Macd::new(params.macd_fast, params.macd_slow, params.macd_signal)?;
        let donchian = DonchianChannel::new(params.donchian_period)?;
        let obv = OnBalanceVolume;

        let min_history = [
            sma_short.required_candles(),
            sma_long.required_candles(),
            rsi.required_candles(),
            atr.required_candles(),
            bollinger.required_candles(),
            donchian.required_candles(),
        ]
        .into_iter()
        .fold(MIN_HISTORY, usize::max);

        Ok(Self {
            params,
            min_history,
            ema,
            sma_short,
            sma_long,
            rsi,
            atr,
            bollinger,
            macd,
            donchian,
            obv,
        })
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Fewest candles a full computation accepts.
    pub fn min_history(&self) -> usize {
        self.min_history
    }

    /// Tags of the indicators this engine runs, in column order.
    pub fn kinds(&self) -> Vec<IndicatorKind> {
        vec![
            self.ema.kind(),
            self.sma_short.kind(),
            self.sma_long.kind(),
            self.rsi.kind(),
            self.atr.kind(),
            self.bollinger.kind(),
            self.macd.kind(),
            self.donchian.kind(),
            self.obv.kind(),
        ]
    }

    /// One snapshot per candle of `series`.
    pub fn compute(
        &self,
        series: &CandleSeries,
    ) -> Result<Vec<IndicatorSnapshot>, Report<EngineError>> {
        self.check_history(series)?;
        let columns = Columns {
            ema: self.ema.compute(series),
            sma_short: self.sma_short.compute(series),
            sma_long: self.sma_long.compute(series),
            rsi: self.rsi.compute(series),
            atr: self.atr.compute(series),
            bollinger: self.bollinger.compute(series),
            macd: self.macd.compute(series),
            donchian: self.donchian.compute(series),
            obv: self.obv.compute(series),
        };
        Ok(columns.assemble(series.candles()))
    }

    /// Like [`compute`](Self::compute), also returning the state after the
    /// last candle.
    pub fn compute_resumable(
        &self,
        series: &CandleSeries,
    ) -> Result<(Vec<IndicatorSnapshot>, EngineState), Report<EngineError>> {
        self.check_history(series)?;
        let mut state = self.initial_state();
        let snapshots = self.advance(&mut state, series.candles());
        Ok((snapshots, state))
    }

    /// Continue from `state` over candles that come strictly after
    /// `state.last_open_time`. Returns snapshots for `candles` only.
    pub fn resume(
        &self,
        mut state: EngineState,
        candles: &[Candle],
    ) -> Result<(Vec<IndicatorSnapshot>, EngineState), Report<EngineError>> {
        if state.params != self.params {
            bail!(EngineError::StateMismatch);
        }
        validate_candles(candles, Some(state.last_open_time))?;
        let snapshots = self.advance(&mut state, candles);
        Ok((snapshots, state))
    }

    fn check_history(&self, series: &CandleSeries) -> Result<(), Report<EngineError>> {
        if series.len() < self.min_history {
            bail!(EngineError::InsufficientHistory {
                required: self.min_history,
                available: series.len(),
            });
        }
        Ok(())
    }

    fn initial_state(&self) -> EngineState {
        EngineState {
            params: self.params,
            last_open_time: i64::MIN,
            candles_seen: 0,
            ema: self.ema.initial_state(),
            sma_short: self.sma_short.initial_state(),
            sma_long: self.sma_long.initial_state(),
            rsi: self.rsi.initial_state(),
            atr: self.atr.initial_state(),
            bollinger: self.bollinger.initial_state(),
            macd: self.macd.initial_state(),
            donchian: self.donchian.initial_state(),
            obv: self.obv.initial_state(),
        }
    }

    /// Continue every indicator over `candles` column by column.
    fn advance(&self, state: &mut EngineState, candles: &[Candle]) -> Vec<IndicatorSnapshot> {
        let columns = Columns {
            ema: self.ema.resume(&mut state.ema, candles),
            sma_short: self.sma_short.resume(&mut state.sma_short, candles),
            sma_long: self.sma_long.resume(&mut state.sma_long, candles),
            rsi: self.rsi.resume(&mut state.rsi, candles),
            atr: self.atr.resume(&mut state.atr, candles),
            bollinger: self.bollinger.resume(&mut state.bollinger, candles),
            macd: self.macd.resume(&mut state.macd, candles),
            donchian: self.donchian.resume(&mut state.donchian, candles),
            obv: self.obv.resume(&mut state.obv, candles),
        };

        if let Some(last) = candles.last() {
            state.last_open_time = last.open_time;
        }
        state.candles_seen += candles.len();

        columns.assemble(candles)
    }
}

/// Per-indicator outputs, each aligned with the candles they came from.
struct Columns {
    ema: Vec<f64>,
    sma_short: Vec<Option<f64>>,
    sma_long: Vec<Option<f64>>,
    rsi: Vec<Option<f64>>,
    atr: Vec<Option<f64>>,
    bollinger: Vec<Option<Bands>>,
    macd: Vec<MacdPoint>,
    donchian: Vec<Option<Channel>>,
    obv: Vec<f64>,
}

impl Columns {
    fn assemble(self, candles: &[Candle]) -> Vec<IndicatorSnapshot> {
        candles
            .iter()
            .enumerate()
            .map(|(i, candle)| IndicatorSnapshot {
                candle_id: candle.id,
                open_time: candle.open_time,
                ema_200: Some(self.ema[i]),
                sma_short: self.sma_short[i],
                sma_long: self.sma_long[i],
                rsi_14: self.rsi[i],
                atr_14: self.atr[i],
                bb_upper: self.bollinger[i].map(|b| b.upper),
                bb_lower: self.bollinger[i].map(|b| b.lower),
                macd: Some(self.macd[i].macd),
                macd_signal: Some(self.macd[i].signal),
                donchian_high: self.donchian[i].map(|c| c.high),
                donchian_low: self.donchian[i].map(|c| c.low),
                obv: Some(self.obv[i]),
            })
            .collect()
    }
}
