use chrono::{DateTime, Duration, Utc};

use crate::core::fvg::FVG_PATTERN;
use crate::models::{Candle, CandleSeries, GapDirection, Pattern, Timeframe};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let with_volume: Vec<(f64, f64, f64, f64, f64)> = data
        .iter()
        .map(|&(o, h, l, c)| (o, h, l, c, 100.0))
        .collect();
    make_candles_with_volume(&with_volume)
}

/// Same as `make_candles` with an explicit volume per candle.
pub fn make_candles_with_volume(data: &[(f64, f64, f64, f64, f64)]) -> CandleSeries {
    let base = base_time();
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c, v))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        })
        .collect();

    CandleSeries::new(candles)
}

/// Overlapping candles around `price`; never forms a gap.
pub fn make_flat(n: usize, price: f64) -> CandleSeries {
    let data: Vec<(f64, f64, f64, f64)> = (0..n)
        .map(|i| {
            let close = if i % 2 == 0 { price + 0.2 } else { price - 0.2 };
            (price, price + 1.0, price - 1.0, close)
        })
        .collect();
    make_candles(&data)
}

/// A bare valid pattern with the given entry and a 2% risk distance.
pub fn make_pattern(
    symbol: &str,
    timeframe: Timeframe,
    direction: GapDirection,
    entry: f64,
    start: DateTime<Utc>,
) -> Pattern {
    let half_gap = entry * 0.005;
    let risk = entry * 0.02;
    let (stop_loss, take_profit) = match direction {
        GapDirection::Bullish => (entry - risk, entry + risk * 2.0),
        GapDirection::Bearish => (entry + risk, entry - risk * 2.0),
    };
    Pattern {
        id: None,
        symbol: symbol.to_string(),
        timeframe,
        pattern_type: FVG_PATTERN.to_string(),
        direction,
        start_timestamp: start,
        entry_price: entry,
        stop_loss,
        take_profit,
        gap_top: entry + half_gap,
        gap_bottom: entry - half_gap,
        gap_size_percent: 1.0,
        is_valid: true,
        filled_timestamp: None,
        confluence_count: 1,
        confluence_timeframes: None,
    }
}
