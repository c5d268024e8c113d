use chrono::Utc;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::path::Path;
use std::str::FromStr;

use crate::engine::EngineState;
use crate::error::StorageError;
use crate::model::{Candle, IndicatorSnapshot};
use crate::storage::Storage;

type CandleRow = (i64, i64, i64, f64, f64, f64, f64, f64);

type SnapshotRow = (
    i64,
    i64,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
);

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        Self::migrate(pool).await
    }

    /// Private in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, Report<StorageError>> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .change_context(StorageError::Migration)?
            .create_if_missing(true);
        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .change_context(StorageError::Migration)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, Report<StorageError>> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;
        Ok(Self { pool })
    }
}

impl Storage for SqliteStorage {
    fn upsert_candles(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> BoxFuture<'_, Result<usize, Report<StorageError>>> {
        let symbol = symbol.to_string();
        let candles = candles.to_vec();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            for c in &candles {
                sqlx::query(
                    "INSERT INTO candles \
                     (symbol, open_time, close_time, open, high, low, close, volume) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT (symbol, open_time) DO UPDATE SET \
                     close_time = excluded.close_time, open = excluded.open, \
                     high = excluded.high, low = excluded.low, \
                     close = excluded.close, volume = excluded.volume",
                )
                .bind(&symbol)
                .bind(c.open_time)
                .bind(c.close_time)
                .bind(c.open)
                .bind(c.high)
                .bind(c.low)
                .bind(c.close)
                .bind(c.volume)
                .execute(&mut *tx)
                .await
                .change_context(StorageError::Insert)
                .attach_with(|| format!("open_time: {}", c.open_time))?;
            }

            if let Some(earliest) = candles.iter().map(|c| c.open_time).min() {
                sqlx::query("DELETE FROM indicator_state WHERE symbol = ? AND last_open_time >= ?")
                    .bind(&symbol)
                    .bind(earliest)
                    .execute(&mut *tx)
                    .await
                    .change_context(StorageError::Insert)?;

                sqlx::query(
                    "INSERT INTO candle_history (symbol, generation) VALUES (?, 1) \
                     ON CONFLICT (symbol) DO UPDATE SET generation = generation + 1",
                )
                .bind(&symbol)
                .execute(&mut *tx)
                .await
                .change_context(StorageError::Insert)?;
            }

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(candles.len())
        })
    }

    fn load_candles(&self, symbol: &str) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>> {
        self.load_candles_after(symbol, i64::MIN)
    }

    fn load_candles_after(
        &self,
        symbol: &str,
        open_time: i64,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let rows: Vec<CandleRow> = sqlx::query_as(
                "SELECT id, open_time, close_time, open, high, low, close, volume \
                 FROM candles \
                 WHERE symbol = ? AND open_time > ? \
                 ORDER BY open_time ASC",
            )
            .bind(&symbol)
            .bind(open_time)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(rows.into_iter().map(map_candle_row).collect())
        })
    }

    fn history_generation(&self, symbol: &str) -> BoxFuture<'_, Result<i64, Report<StorageError>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT generation FROM candle_history WHERE symbol = ?")
                    .bind(&symbol)
                    .fetch_optional(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;
            Ok(row.map_or(0, |(generation,)| generation))
        })
    }

    fn load_state(
        &self,
        symbol: &str,
    ) -> BoxFuture<'_, Result<Option<EngineState>, Report<StorageError>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT state FROM indicator_state WHERE symbol = ?")
                    .bind(&symbol)
                    .fetch_optional(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;

            row.map(|(json,)| {
                serde_json::from_str(&json)
                    .change_context(StorageError::Decode)
                    .attach_with(|| format!("indicator state for {symbol}"))
            })
            .transpose()
        })
    }

    fn write_snapshots(
        &self,
        symbol: &str,
        snapshots: &[IndicatorSnapshot],
        state: &EngineState,
        generation: i64,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let symbol = symbol.to_string();
        let snapshots = snapshots.to_vec();
        let state_json = serde_json::to_string(state).change_context(StorageError::Insert);
        let last_open_time = state.last_open_time;
        Box::pin(async move {
            let state_json = state_json?;
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            for s in &snapshots {
                let result = sqlx::query(
                    "UPDATE candles SET \
                     ema_200 = ?, sma_short = ?, sma_long = ?, rsi_14 = ?, atr_14 = ?, \
                     bb_upper = ?, bb_lower = ?, macd = ?, macd_signal = ?, \
                     donchian_high = ?, donchian_low = ?, obv = ? \
                     WHERE id = ? AND symbol = ?",
                )
                .bind(s.ema_200)
                .bind(s.sma_short)
                .bind(s.sma_long)
                .bind(s.rsi_14)
                .bind(s.atr_14)
                .bind(s.bb_upper)
                .bind(s.bb_lower)
                .bind(s.macd)
                .bind(s.macd_signal)
                .bind(s.donchian_high)
                .bind(s.donchian_low)
                .bind(s.obv)
                .bind(s.candle_id)
                .bind(&symbol)
                .execute(&mut *tx)
                .await
                .change_context(StorageError::Insert)?;

                if result.rows_affected() == 0 {
                    return Err(Report::new(StorageError::Insert)
                        .attach(format!("no candle row {} for {symbol}", s.candle_id)));
                }
            }

            // Checked once the transaction holds the write lock.
            let current: Option<(i64,)> =
                sqlx::query_as("SELECT generation FROM candle_history WHERE symbol = ?")
                    .bind(&symbol)
                    .fetch_optional(&mut *tx)
                    .await
                    .change_context(StorageError::Query)?;
            let current = current.map_or(0, |(g,)| g);
            if current != generation {
                return Err(Report::new(StorageError::HistoryChanged).attach(format!(
                    "{symbol}: computed from generation {generation}, store is at {current}"
                )));
            }

            sqlx::query(
                "INSERT INTO indicator_state (symbol, last_open_time, state, updated_at) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT (symbol) DO UPDATE SET \
                 last_open_time = excluded.last_open_time, state = excluded.state, \
                 updated_at = excluded.updated_at",
            )
            .bind(&symbol)
            .bind(last_open_time)
            .bind(&state_json)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .change_context(StorageError::Insert)?;

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn load_snapshots(
        &self,
        symbol: &str,
    ) -> BoxFuture<'_, Result<Vec<IndicatorSnapshot>, Report<StorageError>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let rows: Vec<SnapshotRow> = sqlx::query_as(
                "SELECT id, open_time, ema_200, sma_short, sma_long, rsi_14, atr_14, \
                 bb_upper, bb_lower, macd, macd_signal, donchian_high, donchian_low, obv \
                 FROM candles WHERE symbol = ? ORDER BY open_time ASC",
            )
            .bind(&symbol)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(rows.into_iter().map(map_snapshot_row).collect())
        })
    }
}

fn map_candle_row((id, open_time, close_time, open, high, low, close, volume): CandleRow) -> Candle {
    Candle {
        id,
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
    }
}

fn map_snapshot_row(
    (
        candle_id,
        open_time,
        ema_200,
        sma_short,
        sma_long,
        rsi_14,
        atr_14,
        bb_upper,
        bb_lower,
        macd,
        macd_signal,
        donchian_high,
        donchian_low,
        obv,
    ): SnapshotRow,
) -> IndicatorSnapshot {
    IndicatorSnapshot {
        candle_id,
        open_time,
        ema_200,
        sma_short,
        sma_long,
        rsi_14,
        atr_14,
        bb_upper,
        bb_lower,
        macd,
        macd_signal,
        donchian_high,
        donchian_low,
        obv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineParams, IndicatorEngine};
    use crate::series::CandleSeries;
    use crate::test_support::synthetic_candles;

    async fn seeded_storage(symbol: &str, n: usize) -> (SqliteStorage, Vec<Candle>) {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.upsert_candles(symbol, &synthetic_candles(n)).await.unwrap();
        let stored = storage.load_candles(symbol).await.unwrap();
        (storage, stored)
    }

    #[tokio::test]
    async fn upsert_and_load_candles_ascending() {
        let (storage, stored) = seeded_storage("BTCUSDT", 5).await;
        assert_eq!(stored.len(), 5);
        assert!(stored.windows(2).all(|w| w[0].open_time < w[1].open_time));
        assert!(stored.iter().all(|c| c.id > 0));

        let other = storage.load_candles("ETHUSDT").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn upsert_updates_in_place_and_keeps_ids() {
        let (storage, stored) = seeded_storage("BTCUSDT", 3).await;
        let updated = Candle {
            close: 999.0,
            ..stored[1]
        };
        storage.upsert_candles("BTCUSDT", &[updated]).await.unwrap();

        let reloaded = storage.load_candles("BTCUSDT").await.unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded[1].id, stored[1].id);
        assert_eq!(reloaded[1].close, 999.0);
    }

    #[tokio::test]
    async fn load_candles_after_is_exclusive() {
        let (storage, stored) = seeded_storage("BTCUSDT", 6).await;
        let after = storage
            .load_candles_after("BTCUSDT", stored[3].open_time)
            .await
            .unwrap();
        assert_eq!(after, stored[4..].to_vec());
    }

    #[tokio::test]
    async fn snapshots_and_state_round_trip() {
        let (storage, stored) = seeded_storage("BTCUSDT", 80).await;
        let engine = IndicatorEngine::new(EngineParams::default()).unwrap();
        let series = CandleSeries::new(stored).unwrap();
        let (snapshots, state) = engine.compute_resumable(&series).unwrap();

        assert!(storage.load_state("BTCUSDT").await.unwrap().is_none());
        storage
            .write_snapshots("BTCUSDT", &snapshots, &state, 1)
            .await
            .unwrap();

        let loaded = storage.load_snapshots("BTCUSDT").await.unwrap();
        assert_eq!(loaded, snapshots);
        assert_eq!(loaded[0].sma_short, None);
        assert_eq!(storage.load_state("BTCUSDT").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn write_is_all_or_nothing() {
        let (storage, stored) = seeded_storage("BTCUSDT", 60).await;
        let engine = IndicatorEngine::new(EngineParams::default()).unwrap();
        let (mut snapshots, state) = engine
            .compute_resumable(&CandleSeries::new(stored).unwrap())
            .unwrap();
        snapshots[59].candle_id = 10_000;

        assert!(
            storage
                .write_snapshots("BTCUSDT", &snapshots, &state, 1)
                .await
                .is_err()
        );
        let loaded = storage.load_snapshots("BTCUSDT").await.unwrap();
        assert!(loaded.iter().all(|s| s.ema_200.is_none()));
        assert!(storage.load_state("BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rewriting_history_drops_state() {
        let (storage, stored) = seeded_storage("BTCUSDT", 70).await;
        let engine = IndicatorEngine::new(EngineParams::default()).unwrap();
        let (snapshots, state) = engine
            .compute_resumable(&CandleSeries::new(stored.clone()).unwrap())
            .unwrap();
        storage
            .write_snapshots("BTCUSDT", &snapshots, &state, 1)
            .await
            .unwrap();

        // Appending newer candles keeps the state valid.
        let mut newer = synthetic_candles(72)[70..].to_vec();
        for c in &mut newer {
            c.id = 0;
        }
        storage.upsert_candles("BTCUSDT", &newer).await.unwrap();
        assert!(storage.load_state("BTCUSDT").await.unwrap().is_some());

        // Touching a candle the state already covers invalidates it.
        storage
            .upsert_candles("BTCUSDT", &[stored[10]])
            .await
            .unwrap();
        assert!(storage.load_state("BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn every_upsert_advances_history_generation() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert_eq!(storage.history_generation("BTCUSDT").await.unwrap(), 0);

        let candles = synthetic_candles(3);
        storage.upsert_candles("BTCUSDT", &candles).await.unwrap();
        storage.upsert_candles("BTCUSDT", &candles[2..]).await.unwrap();
        storage.upsert_candles("BTCUSDT", &[]).await.unwrap();
        assert_eq!(storage.history_generation("BTCUSDT").await.unwrap(), 2);
        assert_eq!(storage.history_generation("ETHUSDT").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_from_outdated_history_is_rejected() {
        let (storage, stored) = seeded_storage("BTCUSDT", 70).await;
        let generation = storage.history_generation("BTCUSDT").await.unwrap();
        let engine = IndicatorEngine::new(EngineParams::default()).unwrap();
        let (snapshots, state) = engine
            .compute_resumable(&CandleSeries::new(stored.clone()).unwrap())
            .unwrap();

        // A rewrite lands after the candles were read.
        let rewritten = Candle {
            close: stored[40].close + 50.0,
            ..stored[40]
        };
        storage.upsert_candles("BTCUSDT", &[rewritten]).await.unwrap();

        let err = storage
            .write_snapshots("BTCUSDT", &snapshots, &state, generation)
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), StorageError::HistoryChanged));
        assert!(storage.load_state("BTCUSDT").await.unwrap().is_none());
        let loaded = storage.load_snapshots("BTCUSDT").await.unwrap();
        assert!(loaded.iter().all(|s| s.ema_200.is_none()));
    }

    #[tokio::test]
    async fn corrupt_state_is_a_decode_error() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO indicator_state (symbol, last_open_time, state, updated_at) \
             VALUES ('BTCUSDT', 0, 'not json', '')",
        )
        .execute(&storage.pool)
        .await
        .unwrap();
        let err = storage.load_state("BTCUSDT").await.unwrap_err();
        assert!(matches!(err.current_context(), StorageError::Decode));
    }
}
