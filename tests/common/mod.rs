use chrono::{DateTime, Duration, Utc};
use flow_scanner::models::{Candle, CandleSeries};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-17T07:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Candles from (open, high, low, close, volume) tuples, `interval` apart,
/// the last one stamped at `end`.
pub fn make_candles_ending(
    end: DateTime<Utc>,
    interval: Duration,
    data: &[(f64, f64, f64, f64, f64)],
) -> CandleSeries {
    let n = data.len() as i32;
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c, v))| Candle {
            timestamp: end - interval * (n - 1 - i as i32),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        })
        .collect();

    CandleSeries::new(candles)
}

/// `n_flat` overlapping candles around `price`, then a bullish gap whose
/// third candle is the last one. Gap bottom is `price + 1`, top `price + 3`,
/// so the entry is `price + 2`.
pub fn gap_series(
    end: DateTime<Utc>,
    interval: Duration,
    n_flat: usize,
    price: f64,
) -> CandleSeries {
    let mut bars: Vec<(f64, f64, f64, f64, f64)> = (0..n_flat)
        .map(|i| {
            let close = if i % 2 == 0 { price + 0.2 } else { price - 0.2 };
            (price, price + 1.0, price - 1.0, close, 100.0)
        })
        .collect();
    bars.push((price, price + 1.0, price - 1.0, price + 0.5, 100.0));
    bars.push((price + 1.0, price + 4.0, price + 0.5, price + 3.5, 100.0));
    bars.push((price + 4.0, price + 6.0, price + 3.0, price + 5.5, 150.0));
    make_candles_ending(end, interval, &bars)
}
