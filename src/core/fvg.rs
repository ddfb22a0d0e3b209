use chrono::{DateTime, Utc};
use tracing::trace;

use crate::core::detector::PatternDetector;
use crate::core::levels::{self, ATR_PERIOD};
use crate::models::{Candle, GapDirection, Pattern, Timeframe};
use crate::params::TradingParameters;

pub const FVG_PATTERN: &str = "fvg";

/// Three-candle fair value gap detector.
///
/// A bullish gap leaves `c[i-2].high < c[i].low` with a bullish third candle;
/// a bearish gap leaves `c[i-2].low > c[i].high` with a bearish third candle.
/// Entry is the gap midpoint. The stop is offset from the gap edge (bottom for
/// bullish, top for bearish) and the target projects the resulting risk from
/// the midpoint entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct GapDetector;

impl GapDetector {
    pub fn new() -> Self {
        Self
    }

    fn bullish(
        &self,
        triple: (&Candle, &Candle, &Candle),
        atr: Option<f64>,
        symbol: &str,
        timeframe: Timeframe,
        params: &TradingParameters,
    ) -> Option<Pattern> {
        let (c1, c2, c3) = triple;
        let gap_bottom = c1.high;
        let gap_top = c3.low;
        if gap_bottom >= gap_top || gap_bottom <= 0.0 {
            return None;
        }

        let gap_size_percent = (gap_top - gap_bottom) / gap_bottom * 100.0;
        if gap_size_percent < params.detection.min_gap_percent {
            return None;
        }
        if !c3.is_bullish() {
            return None;
        }
        if params.detection.volume_confirmation && c3.volume <= c2.volume {
            return None;
        }

        Some(self.build(
            GapDirection::Bullish,
            gap_top,
            gap_bottom,
            gap_size_percent,
            atr,
            c3.timestamp,
            symbol,
            timeframe,
            params,
        ))
    }

    fn bearish(
        &self,
        triple: (&Candle, &Candle, &Candle),
        atr: Option<f64>,
        symbol: &str,
        timeframe: Timeframe,
        params: &TradingParameters,
    ) -> Option<Pattern> {
        let (c1, c2, c3) = triple;
        let gap_top = c1.low;
        let gap_bottom = c3.high;
        if gap_top <= gap_bottom || gap_top <= 0.0 {
            return None;
        }

        let gap_size_percent = (gap_top - gap_bottom) / gap_top * 100.0;
        if gap_size_percent < params.detection.min_gap_percent {
            return None;
        }
        if !c3.is_bearish() {
            return None;
        }
        if params.detection.volume_confirmation && c3.volume <= c2.volume {
            return None;
        }

        Some(self.build(
            GapDirection::Bearish,
            gap_top,
            gap_bottom,
            gap_size_percent,
            atr,
            c3.timestamp,
            symbol,
            timeframe,
            params,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        direction: GapDirection,
        gap_top: f64,
        gap_bottom: f64,
        gap_size_percent: f64,
        atr: Option<f64>,
        timestamp: DateTime<Utc>,
        symbol: &str,
        timeframe: Timeframe,
        params: &TradingParameters,
    ) -> Pattern {
        let entry_price = (gap_bottom + gap_top) / 2.0;
        let edge = match direction {
            GapDirection::Bullish => gap_bottom,
            GapDirection::Bearish => gap_top,
        };
        let stop_loss =
            levels::stop_loss(edge, direction, atr, params.risk.stop_loss_atr_multiplier);
        let take_profit = levels::take_profit(
            entry_price,
            stop_loss,
            direction,
            params.risk.take_profit_rr_ratio,
        );

        trace!(
            "{} {} gap on {} {}: {:.4}-{:.4} ({:.3}%)",
            symbol,
            direction,
            timeframe,
            timestamp,
            gap_bottom,
            gap_top,
            gap_size_percent
        );

        Pattern {
            id: None,
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: FVG_PATTERN.to_string(),
            direction,
            start_timestamp: timestamp,
            entry_price,
            stop_loss,
            take_profit,
            gap_top,
            gap_bottom,
            gap_size_percent,
            is_valid: true,
            filled_timestamp: None,
            confluence_count: 1,
            confluence_timeframes: None,
        }
    }
}

impl PatternDetector for GapDetector {
    fn pattern_type(&self) -> &str {
        FVG_PATTERN
    }

    fn detect(
        &self,
        candles: &[Candle],
        symbol: &str,
        timeframe: Timeframe,
        params: &TradingParameters,
    ) -> Vec<Pattern> {
        if candles.len() < 3 {
            return Vec::new();
        }

        let atr = levels::atr_series(candles, ATR_PERIOD);
        let mut patterns = Vec::new();

        for i in 2..candles.len() {
            let triple = (&candles[i - 2], &candles[i - 1], &candles[i]);
            if let Some(p) = self.bullish(triple, atr[i], symbol, timeframe, params) {
                patterns.push(p);
            }
            if let Some(p) = self.bearish(triple, atr[i], symbol, timeframe, params) {
                patterns.push(p);
            }
        }

        patterns
    }

    fn is_valid(
        &self,
        pattern: &Pattern,
        current_price: f64,
        now: DateTime<Utc>,
        params: &TradingParameters,
    ) -> bool {
        if !pattern.is_valid {
            return false;
        }

        let elapsed = (now - pattern.start_timestamp).num_seconds() as f64;
        let age_candles = elapsed / pattern.timeframe.as_seconds() as f64;
        if age_candles > params.detection.max_age_candles as f64 {
            return false;
        }

        match pattern.direction {
            GapDirection::Bullish => current_price > pattern.gap_bottom,
            GapDirection::Bearish => current_price < pattern.gap_top,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_candles, make_candles_with_volume};
    use chrono::Duration;

    fn no_volume() -> TradingParameters {
        let mut p = TradingParameters::default();
        p.detection.volume_confirmation = false;
        p
    }

    fn bullish_triple() -> Vec<(f64, f64, f64, f64, f64)> {
        vec![
            (100.0, 102.0, 98.0, 101.0, 100.0),
            (103.0, 106.0, 102.5, 105.0, 100.0),
            (107.0, 110.0, 106.0, 109.0, 150.0),
        ]
    }

    #[test]
    fn detects_bullish_gap_with_levels() {
        let candles = make_candles_with_volume(&bullish_triple());
        let patterns =
            GapDetector.detect(candles.as_slice(), "BTC/USDT", Timeframe::H1, &TradingParameters::default());

        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.direction, GapDirection::Bullish);
        assert_eq!(p.pattern_type, FVG_PATTERN);
        assert!((p.gap_bottom - 102.0).abs() < 1e-9);
        assert!((p.gap_top - 106.0).abs() < 1e-9);
        assert!((p.entry_price - 104.0).abs() < 1e-9);
        // no ATR warmup: 2% below the gap bottom
        assert!((p.stop_loss - 99.96).abs() < 1e-9);
        assert!((p.take_profit - (104.0 + 4.04 * 2.0)).abs() < 1e-9);
        assert_eq!(p.start_timestamp, candles[2].timestamp);
        assert!(p.is_valid);
    }

    #[test]
    fn detects_bearish_gap() {
        let candles = make_candles_with_volume(&[
            (110.0, 115.0, 108.0, 112.0, 100.0),
            (106.0, 107.0, 103.0, 104.0, 100.0),
            (100.0, 102.0, 96.0, 98.0, 150.0),
        ]);
        let patterns =
            GapDetector.detect(candles.as_slice(), "BTC/USDT", Timeframe::H1, &TradingParameters::default());

        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.direction, GapDirection::Bearish);
        assert!((p.gap_top - 108.0).abs() < 1e-9);
        assert!((p.gap_bottom - 102.0).abs() < 1e-9);
        assert!((p.gap_size_percent - 6.0 / 108.0 * 100.0).abs() < 1e-9);
        assert!(p.stop_loss > p.gap_top);
        assert!(p.take_profit < p.entry_price);
    }

    #[test]
    fn volume_confirmation_filters_weak_third_candle() {
        let mut data = bullish_triple();
        data[2].4 = 90.0;
        let candles = make_candles_with_volume(&data);

        let with_volume =
            GapDetector.detect(candles.as_slice(), "BTC/USDT", Timeframe::H1, &TradingParameters::default());
        assert!(with_volume.is_empty());

        let without = GapDetector.detect(candles.as_slice(), "BTC/USDT", Timeframe::H1, &no_volume());
        assert_eq!(without.len(), 1);
    }

    #[test]
    fn gap_requires_directional_third_candle() {
        // gap up, but third candle closes below its open
        let candles = make_candles(&[
            (100.0, 102.0, 98.0, 101.0),
            (103.0, 106.0, 102.5, 105.0),
            (109.0, 110.0, 106.0, 107.0),
        ]);
        assert!(GapDetector
            .detect(candles.as_slice(), "BTC/USDT", Timeframe::H1, &no_volume())
            .is_empty());
    }

    #[test]
    fn gap_below_threshold_is_ignored() {
        let candles = make_candles(&[
            (10000.0, 10001.0, 9999.0, 10000.5),
            (10001.0, 10002.0, 10000.5, 10001.5),
            (10001.5, 10003.0, 10001.1, 10002.0),
        ]);
        assert!(GapDetector
            .detect(candles.as_slice(), "BTC/USDT", Timeframe::M1, &no_volume())
            .is_empty());
    }

    #[test]
    fn fewer_than_three_candles_yields_nothing() {
        let candles = make_candles(&[(100.0, 102.0, 98.0, 101.0), (103.0, 106.0, 102.5, 105.0)]);
        assert!(GapDetector
            .detect(candles.as_slice(), "BTC/USDT", Timeframe::M1, &no_volume())
            .is_empty());
    }

    #[test]
    fn detected_levels_respect_gap_bounds() {
        // staircase with a gap on every step
        let data: Vec<(f64, f64, f64, f64)> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 3.0;
                if i % 2 == 0 {
                    (base, base + 1.0, base - 1.0, base + 0.8)
                } else {
                    (base - 0.5, base + 0.5, base - 1.5, base - 1.2)
                }
            })
            .collect();
        let candles = make_candles(&data);
        let patterns = GapDetector.detect(candles.as_slice(), "ETH/USDT", Timeframe::M5, &no_volume());
        assert!(!patterns.is_empty());

        for p in &patterns {
            assert!(p.gap_top > p.gap_bottom);
            assert!(p.entry_price > p.gap_bottom && p.entry_price < p.gap_top);
            let idx = candles
                .iter()
                .position(|c| c.timestamp == p.start_timestamp)
                .unwrap();
            match p.direction {
                GapDirection::Bullish => {
                    assert!(candles[idx - 2].high < candles[idx].low);
                    assert!(p.stop_loss < p.entry_price && p.take_profit > p.entry_price);
                }
                GapDirection::Bearish => {
                    assert!(candles[idx - 2].low > candles[idx].high);
                    assert!(p.stop_loss > p.entry_price && p.take_profit < p.entry_price);
                }
            }
        }
        // output follows input order
        assert!(patterns
            .windows(2)
            .all(|w| w[0].start_timestamp <= w[1].start_timestamp));
    }

    #[test]
    fn atr_stop_is_anchored_at_gap_edge() {
        let mut data: Vec<(f64, f64, f64, f64)> = (0..20)
            .map(|_| (100.0, 101.0, 99.0, 100.0))
            .collect();
        data.push((100.0, 101.0, 99.5, 100.8));
        data.push((101.0, 104.0, 100.9, 103.5));
        data.push((104.0, 106.0, 103.0, 105.5));
        let candles = make_candles(&data);
        let patterns = GapDetector.detect(candles.as_slice(), "BTC/USDT", Timeframe::M1, &no_volume());
        let p = patterns.last().unwrap();

        let atr = levels::atr_series(candles.as_slice(), ATR_PERIOD)[candles.len() - 1].unwrap();
        assert!((p.stop_loss - (p.gap_bottom - atr * 1.5)).abs() < 1e-9);
        let risk = p.entry_price - p.stop_loss;
        assert!((p.take_profit - (p.entry_price + risk * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn validity_tracks_fill_and_age() {
        let candles = make_candles_with_volume(&bullish_triple());
        let p = GapDetector
            .detect(candles.as_slice(), "BTC/USDT", Timeframe::H1, &TradingParameters::default())
            .remove(0);
        let params = TradingParameters::default();
        let start = p.start_timestamp;

        assert!(GapDetector.is_valid(&p, 105.0, start + Duration::hours(1), &params));
        // traded back into the gap bottom
        assert!(!GapDetector.is_valid(&p, 102.0, start + Duration::hours(1), &params));
        // 50 candles old is still fine, 51 is not
        assert!(GapDetector.is_valid(&p, 105.0, start + Duration::hours(50), &params));
        assert!(!GapDetector.is_valid(&p, 105.0, start + Duration::hours(51), &params));

        let mut filled = p.clone();
        filled.invalidate(start);
        assert!(!GapDetector.is_valid(&filled, 105.0, start, &params));
    }

    #[test]
    fn bearish_validity_uses_gap_top() {
        let candles = make_candles_with_volume(&[
            (110.0, 115.0, 108.0, 112.0, 100.0),
            (106.0, 107.0, 103.0, 104.0, 100.0),
            (100.0, 102.0, 96.0, 98.0, 150.0),
        ]);
        let p = GapDetector
            .detect(candles.as_slice(), "BTC/USDT", Timeframe::M15, &TradingParameters::default())
            .remove(0);
        let now = p.start_timestamp + Duration::minutes(30);
        let params = TradingParameters::default();
        assert!(GapDetector.is_valid(&p, 105.0, now, &params));
        assert!(!GapDetector.is_valid(&p, 108.0, now, &params));
    }

    #[test]
    fn describe_rounds_ratios() {
        let candles = make_candles_with_volume(&bullish_triple());
        let p = GapDetector
            .detect(candles.as_slice(), "BTC/USDT", Timeframe::H1, &TradingParameters::default())
            .remove(0);
        let info = GapDetector.describe(&p);
        assert_eq!(info.pattern_type, "fvg");
        assert!((info.risk_reward - 2.0).abs() < 1e-9);
        assert!((info.gap_size_percent - 3.92).abs() < 1e-9);
    }
}
