use crate::model::Candle;

const BASE_TIME: i64 = 1_700_000_000_000;
const MINUTE_MS: i64 = 60_000;

/// Flat candles (open = high = low = close) one minute apart.
pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle {
            id: i as i64 + 1,
            open_time: BASE_TIME + i as i64 * MINUTE_MS,
            close_time: BASE_TIME + (i as i64 + 1) * MINUTE_MS - 1,
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 1.0,
        })
        .collect()
}

/// Candles with explicit high/low/close/volume and open equal to close.
pub fn candles_from_hlcv(rows: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
    rows.iter()
        .enumerate()
        .map(|(i, &(high, low, close, volume))| Candle {
            id: i as i64 + 1,
            open_time: BASE_TIME + i as i64 * MINUTE_MS,
            close_time: BASE_TIME + (i as i64 + 1) * MINUTE_MS - 1,
            open: close,
            high,
            low,
            close,
            volume,
        })
        .collect()
}

/// Deterministic wavy price path with integer volumes, so OBV steps are
/// exact in floating point.
pub fn synthetic_candles(n: usize) -> Vec<Candle> {
    let mut prev_close = 100.0;
    (0..n)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 8.0 * (t * 0.37).sin() + 3.0 * (t * 0.11).cos() + t * 0.05;
            let open = prev_close;
            let wick = 0.5 + (i % 5) as f64 * 0.25;
            prev_close = close;
            Candle {
                id: i as i64 + 1,
                open_time: BASE_TIME + i as i64 * MINUTE_MS,
                close_time: BASE_TIME + (i as i64 + 1) * MINUTE_MS - 1,
                open,
                high: open.max(close) + wick,
                low: open.min(close) - wick,
                close,
                volume: (100 + (i * 37) % 50) as f64,
            }
        })
        .collect()
}
