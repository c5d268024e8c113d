pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::engine::EngineState;
use crate::error::StorageError;
use crate::model::{Candle, IndicatorSnapshot};

/// Candle source and indicator sink.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn Storage`).
pub trait Storage: Send + Sync {
    /// Insert or update candles by `(symbol, open_time)`, keeping row ids
    /// stable. Returns the number of rows written.
    ///
    /// A stored resume state that covers any of the written open times is
    /// discarded, since it no longer matches the history. Every call with at
    /// least one candle advances the symbol's history generation.
    fn upsert_candles(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> BoxFuture<'_, Result<usize, Report<StorageError>>>;

    /// Full history for `symbol`, ascending by open time.
    fn load_candles(&self, symbol: &str) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>>;

    /// Candles strictly after `open_time`, ascending.
    fn load_candles_after(
        &self,
        symbol: &str,
        open_time: i64,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>>;

    /// Counter bumped by every candle upsert for `symbol`; `0` before the
    /// first one.
    fn history_generation(&self, symbol: &str) -> BoxFuture<'_, Result<i64, Report<StorageError>>>;

    fn load_state(
        &self,
        symbol: &str,
    ) -> BoxFuture<'_, Result<Option<EngineState>, Report<StorageError>>>;

    /// Write indicator columns by candle id together with the state that
    /// follows them, in one transaction.
    ///
    /// `generation` is the history generation the snapshots were computed
    /// from. If candles were upserted since, nothing is written and the call
    /// fails with `StorageError::HistoryChanged`.
    fn write_snapshots(
        &self,
        symbol: &str,
        snapshots: &[IndicatorSnapshot],
        state: &EngineState,
        generation: i64,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Stored indicator values for `symbol`, ascending by open time.
    fn load_snapshots(
        &self,
        symbol: &str,
    ) -> BoxFuture<'_, Result<Vec<IndicatorSnapshot>, Report<StorageError>>>;
}
