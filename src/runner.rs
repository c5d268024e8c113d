use std::sync::Arc;

use derive_more::Display;
use error_stack::{Report, ResultExt};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{EngineState, IndicatorEngine};
use crate::error::{EngineError, RunError, StorageError};
use crate::model::IndicatorSnapshot;
use crate::series::CandleSeries;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Recompute every candle from the first one.
    #[default]
    #[display("full")]
    Full,
    /// Continue from the stored state over newer candles only.
    #[display("incremental")]
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Snapshots and state were written. `mode` is the mode that actually
    /// ran, which is `Full` when an incremental run had to fall back.
    Computed { mode: RunMode, written: usize },
    /// Not enough history yet; nothing was written.
    Skipped { available: usize, required: usize },
    /// No candles newer than the stored state.
    UpToDate,
    /// Candles were upserted while the run was computing. Nothing was
    /// written; the next run recomputes from the new history.
    HistoryChanged,
}

/// Read candles, compute indicators, write them back.
///
/// Runs are serialized by an in-process lock held across the whole
/// read-compute-write cycle, so two runs never interleave their writes.
pub struct IndicatorRunner {
    engine: IndicatorEngine,
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl IndicatorRunner {
    pub fn new(engine: IndicatorEngine, storage: Arc<dyn Storage>) -> Self {
        Self {
            engine,
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &IndicatorEngine {
        &self.engine
    }

    pub async fn run(&self, symbol: &str, mode: RunMode) -> Result<RunOutcome, Report<RunError>> {
        let run_id = Uuid::new_v4();
        let _guard = self.write_lock.lock().await;
        info!(%run_id, symbol, %mode, "indicator run started");

        let outcome = match mode {
            RunMode::Full => self.run_full(symbol, run_id).await?,
            RunMode::Incremental => self.run_incremental(symbol, run_id).await?,
        };

        info!(%run_id, symbol, ?outcome, "indicator run finished");
        Ok(outcome)
    }

    async fn run_full(&self, symbol: &str, run_id: Uuid) -> Result<RunOutcome, Report<RunError>> {
        let generation = self.generation(symbol).await?;
        let candles = self
            .storage
            .load_candles(symbol)
            .await
            .change_context(RunError::Storage)?;
        debug!(%run_id, symbol, loaded = candles.len(), "candles loaded");

        let computed = CandleSeries::with_min_history(candles, self.engine.min_history())
            .and_then(|series| self.engine.compute_resumable(&series));

        let (snapshots, state) = match computed {
            Ok(result) => result,
            Err(report) => {
                if let EngineError::InsufficientHistory {
                    required,
                    available,
                } = report.current_context()
                {
                    warn!(
                        %run_id,
                        symbol,
                        available,
                        required,
                        "insufficient history, skipping"
                    );
                    return Ok(RunOutcome::Skipped {
                        available: *available,
                        required: *required,
                    });
                }
                return Err(report
                    .change_context(RunError::Engine)
                    .attach(format!("symbol: {symbol}")));
            }
        };

        self.persist(symbol, run_id, RunMode::Full, &snapshots, &state, generation)
            .await
    }

    async fn run_incremental(
        &self,
        symbol: &str,
        run_id: Uuid,
    ) -> Result<RunOutcome, Report<RunError>> {
        let generation = self.generation(symbol).await?;
        let stored = match self.storage.load_state(symbol).await {
            Ok(stored) => stored,
            Err(report) if matches!(report.current_context(), StorageError::Decode) => {
                warn!(%run_id, symbol, error = ?report, "stored state unreadable, running full computation");
                None
            }
            Err(report) => return Err(report.change_context(RunError::Storage)),
        };

        let Some(state) = stored else {
            info!(%run_id, symbol, "no stored state, running full computation");
            return self.run_full(symbol, run_id).await;
        };

        if state.params != *self.engine.params() {
            warn!(%run_id, symbol, "stored state uses other parameters, running full computation");
            return self.run_full(symbol, run_id).await;
        }

        let candles = self
            .storage
            .load_candles_after(symbol, state.last_open_time)
            .await
            .change_context(RunError::Storage)?;

        if candles.is_empty() {
            debug!(%run_id, symbol, last_open_time = state.last_open_time, "already up to date");
            return Ok(RunOutcome::UpToDate);
        }

        let (snapshots, state) = self
            .engine
            .resume(state, &candles)
            .change_context(RunError::Engine)
            .attach_with(|| format!("symbol: {symbol}"))?;

        self.persist(symbol, run_id, RunMode::Incremental, &snapshots, &state, generation)
            .await
    }

    async fn generation(&self, symbol: &str) -> Result<i64, Report<RunError>> {
        self.storage
            .history_generation(symbol)
            .await
            .change_context(RunError::Storage)
    }

    async fn persist(
        &self,
        symbol: &str,
        run_id: Uuid,
        mode: RunMode,
        snapshots: &[IndicatorSnapshot],
        state: &EngineState,
        generation: i64,
    ) -> Result<RunOutcome, Report<RunError>> {
        match self
            .storage
            .write_snapshots(symbol, snapshots, state, generation)
            .await
        {
            Ok(()) => Ok(RunOutcome::Computed {
                mode,
                written: snapshots.len(),
            }),
            Err(report) if matches!(report.current_context(), StorageError::HistoryChanged) => {
                warn!(%run_id, symbol, error = ?report, "candles changed during run, results discarded");
                Ok(RunOutcome::HistoryChanged)
            }
            Err(report) => Err(report.change_context(RunError::Storage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineParams;
    use crate::model::Candle;
    use crate::storage::sqlite::SqliteStorage;
    use futures::future::BoxFuture;
    use crate::test_support::{candles_from_closes, synthetic_candles};

    const SYMBOL: &str = "BTCUSDT";

    async fn storage_with(candles: &[Candle]) -> Arc<dyn Storage> {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.upsert_candles(SYMBOL, candles).await.unwrap();
        Arc::new(storage)
    }

    fn runner(storage: &Arc<dyn Storage>, params: EngineParams) -> IndicatorRunner {
        IndicatorRunner::new(IndicatorEngine::new(params).unwrap(), Arc::clone(storage))
    }

    /// Snapshots a single full computation over `candles` would produce,
    /// with candle ids taken from the store.
    async fn expected(storage: &Arc<dyn Storage>) -> Vec<IndicatorSnapshot> {
        let candles = storage.load_candles(SYMBOL).await.unwrap();
        IndicatorEngine::new(EngineParams::default())
            .unwrap()
            .compute(&CandleSeries::new(candles).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn short_history_is_skipped_without_writes() {
        let storage = storage_with(&synthetic_candles(30)).await;
        let outcome = runner(&storage, EngineParams::default())
            .run(SYMBOL, RunMode::Full)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Skipped {
                available: 30,
                required: 60
            }
        );
        assert!(storage.load_state(SYMBOL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skip_reports_engine_requirement() {
        let storage = storage_with(&synthetic_candles(70)).await;
        let params = EngineParams {
            sma_long_period: 100,
            ..EngineParams::default()
        };
        let outcome = runner(&storage, params).run(SYMBOL, RunMode::Full).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Skipped {
                available: 70,
                required: 100
            }
        );
    }

    #[tokio::test]
    async fn full_run_writes_every_candle() {
        let storage = storage_with(&synthetic_candles(80)).await;
        let outcome = runner(&storage, EngineParams::default())
            .run(SYMBOL, RunMode::Full)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Computed {
                mode: RunMode::Full,
                written: 80
            }
        );
        assert_eq!(storage.load_snapshots(SYMBOL).await.unwrap(), expected(&storage).await);
        let state = storage.load_state(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.candles_seen, 80);
    }

    #[tokio::test]
    async fn incremental_without_state_falls_back_to_full() {
        let storage = storage_with(&synthetic_candles(80)).await;
        let outcome = runner(&storage, EngineParams::default())
            .run(SYMBOL, RunMode::Incremental)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Computed {
                mode: RunMode::Full,
                written: 80
            }
        );
    }

    #[tokio::test]
    async fn incremental_run_matches_full_recompute() {
        let candles = synthetic_candles(100);
        let storage = storage_with(&candles[..80]).await;
        let runner = runner(&storage, EngineParams::default());
        runner.run(SYMBOL, RunMode::Full).await.unwrap();

        assert_eq!(
            runner.run(SYMBOL, RunMode::Incremental).await.unwrap(),
            RunOutcome::UpToDate
        );

        storage.upsert_candles(SYMBOL, &candles[80..]).await.unwrap();
        let outcome = runner.run(SYMBOL, RunMode::Incremental).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Computed {
                mode: RunMode::Incremental,
                written: 20
            }
        );

        assert_eq!(storage.load_snapshots(SYMBOL).await.unwrap(), expected(&storage).await);
        let state = storage.load_state(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.last_open_time, candles[99].open_time);
        assert_eq!(state.candles_seen, 100);
    }

    #[tokio::test]
    async fn changed_params_force_full_run() {
        let storage = storage_with(&synthetic_candles(80)).await;
        runner(&storage, EngineParams::default())
            .run(SYMBOL, RunMode::Full)
            .await
            .unwrap();

        let params = EngineParams {
            rsi_period: 7,
            ..EngineParams::default()
        };
        let outcome = runner(&storage, params)
            .run(SYMBOL, RunMode::Incremental)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Computed {
                mode: RunMode::Full,
                written: 80
            }
        );
        let state = storage.load_state(SYMBOL).await.unwrap().unwrap();
        assert_eq!(state.params, params);
    }

    #[tokio::test]
    async fn rewritten_history_forces_full_run() {
        let mut candles = synthetic_candles(80);
        let storage = storage_with(&candles).await;
        let runner = runner(&storage, EngineParams::default());
        runner.run(SYMBOL, RunMode::Full).await.unwrap();

        candles[40].close += 1.0;
        storage.upsert_candles(SYMBOL, &candles[40..41]).await.unwrap();

        let outcome = runner.run(SYMBOL, RunMode::Incremental).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Computed {
                mode: RunMode::Full,
                written: 80
            }
        );
        assert_eq!(storage.load_snapshots(SYMBOL).await.unwrap(), expected(&storage).await);
    }

    #[tokio::test]
    async fn malformed_candle_aborts_without_writes() {
        let mut candles = synthetic_candles(80);
        candles[50].high = f64::INFINITY;
        let storage = storage_with(&candles).await;

        let err = runner(&storage, EngineParams::default())
            .run(SYMBOL, RunMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), RunError::Engine));
        assert!(storage.load_state(SYMBOL).await.unwrap().is_none());
        let snapshots = storage.load_snapshots(SYMBOL).await.unwrap();
        assert!(snapshots.iter().all(|s| s.values().iter().all(Option::is_none)));
    }

    #[tokio::test]
    async fn concurrent_runs_are_serialized() {
        let candles = synthetic_candles(90);
        let storage = storage_with(&candles[..80]).await;
        let runner = runner(&storage, EngineParams::default());
        runner.run(SYMBOL, RunMode::Full).await.unwrap();
        storage.upsert_candles(SYMBOL, &candles[80..]).await.unwrap();

        let (a, b) = tokio::join!(
            runner.run(SYMBOL, RunMode::Incremental),
            runner.run(SYMBOL, RunMode::Incremental)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let computed = outcomes
            .iter()
            .filter(|o| matches!(o, RunOutcome::Computed { written: 10, .. }))
            .count();
        assert_eq!(computed, 1);
        assert!(outcomes.contains(&RunOutcome::UpToDate));
        assert_eq!(storage.load_snapshots(SYMBOL).await.unwrap(), expected(&storage).await);
    }

    /// Store whose first full load is followed by a rewrite of one candle,
    /// as an import landing while a run is computing would do.
    struct RewriteAfterLoad {
        inner: SqliteStorage,
        rewrite: std::sync::Mutex<Option<Candle>>,
    }

    impl Storage for RewriteAfterLoad {
        fn upsert_candles(
            &self,
            symbol: &str,
            candles: &[Candle],
        ) -> BoxFuture<'_, Result<usize, Report<StorageError>>> {
            self.inner.upsert_candles(symbol, candles)
        }

        fn load_candles(
            &self,
            symbol: &str,
        ) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>> {
            let symbol = symbol.to_string();
            Box::pin(async move {
                let candles = self.inner.load_candles(&symbol).await?;
                let pending = self.rewrite.lock().unwrap().take();
                if let Some(candle) = pending {
                    self.inner.upsert_candles(&symbol, &[candle]).await?;
                }
                Ok(candles)
            })
        }

        fn load_candles_after(
            &self,
            symbol: &str,
            open_time: i64,
        ) -> BoxFuture<'_, Result<Vec<Candle>, Report<StorageError>>> {
            self.inner.load_candles_after(symbol, open_time)
        }

        fn history_generation(
            &self,
            symbol: &str,
        ) -> BoxFuture<'_, Result<i64, Report<StorageError>>> {
            self.inner.history_generation(symbol)
        }

        fn load_state(
            &self,
            symbol: &str,
        ) -> BoxFuture<'_, Result<Option<EngineState>, Report<StorageError>>> {
            self.inner.load_state(symbol)
        }

        fn write_snapshots(
            &self,
            symbol: &str,
            snapshots: &[IndicatorSnapshot],
            state: &EngineState,
            generation: i64,
        ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            self.inner.write_snapshots(symbol, snapshots, state, generation)
        }

        fn load_snapshots(
            &self,
            symbol: &str,
        ) -> BoxFuture<'_, Result<Vec<IndicatorSnapshot>, Report<StorageError>>> {
            self.inner.load_snapshots(symbol)
        }
    }

    #[tokio::test]
    async fn rewrite_during_run_discards_results() {
        let inner = SqliteStorage::in_memory().await.unwrap();
        inner.upsert_candles(SYMBOL, &synthetic_candles(80)).await.unwrap();
        let mut rewritten = inner.load_candles(SYMBOL).await.unwrap()[40];
        rewritten.close += 50.0;
        let storage: Arc<dyn Storage> = Arc::new(RewriteAfterLoad {
            inner,
            rewrite: std::sync::Mutex::new(Some(rewritten)),
        });
        let runner = runner(&storage, EngineParams::default());

        assert_eq!(
            runner.run(SYMBOL, RunMode::Full).await.unwrap(),
            RunOutcome::HistoryChanged
        );
        assert!(storage.load_state(SYMBOL).await.unwrap().is_none());

        let outcome = runner.run(SYMBOL, RunMode::Incremental).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Computed {
                mode: RunMode::Full,
                written: 80
            }
        );
        let stored = storage.load_snapshots(SYMBOL).await.unwrap();
        assert_eq!(stored, expected(&storage).await);
    }

    #[tokio::test]
    async fn unreadable_state_falls_back_to_full_run() {
        // OBV overflows to infinity, which JSON cannot carry.
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let mut candles = candles_from_closes(&closes);
        for c in &mut candles {
            c.volume = 1e308;
        }
        let storage = storage_with(&candles).await;
        let runner = runner(&storage, EngineParams::default());
        runner.run(SYMBOL, RunMode::Full).await.unwrap();
        assert!(storage.load_state(SYMBOL).await.is_err());

        let outcome = runner.run(SYMBOL, RunMode::Incremental).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Computed {
                mode: RunMode::Full,
                written: 80
            }
        );
    }

    #[test]
    fn run_mode_parses_lowercase() {
        use clap::ValueEnum;
        assert_eq!(RunMode::from_str("incremental", false), Ok(RunMode::Incremental));
        assert_eq!(RunMode::Full.to_string(), "full");
    }
}
