use crate::models::{Candle, GapDirection};

pub const ATR_PERIOD: usize = 14;

/// Fallback stop offset when no ATR is available.
const FALLBACK_STOP_PCT: f64 = 0.02;

/// Rolling-mean ATR aligned with `candles`. Entries before the first full
/// window are `None`.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < period {
        return out;
    }

    let trs: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| c.true_range(i.checked_sub(1).map(|p| candles[p].close)))
        .collect();

    let mut sum: f64 = trs[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..trs.len() {
        sum += trs[i] - trs[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Stop beyond `anchor` by `atr * multiplier`, or a flat 2% when ATR is
/// missing or zero.
pub fn stop_loss(anchor: f64, direction: GapDirection, atr: Option<f64>, multiplier: f64) -> f64 {
    match atr.filter(|a| *a > 0.0 && a.is_finite()) {
        Some(atr) => match direction {
            GapDirection::Bullish => anchor - atr * multiplier,
            GapDirection::Bearish => anchor + atr * multiplier,
        },
        None => match direction {
            GapDirection::Bullish => anchor * (1.0 - FALLBACK_STOP_PCT),
            GapDirection::Bearish => anchor * (1.0 + FALLBACK_STOP_PCT),
        },
    }
}

pub fn take_profit(entry: f64, stop: f64, direction: GapDirection, rr_ratio: f64) -> f64 {
    let risk = (entry - stop).abs();
    match direction {
        GapDirection::Bullish => entry + risk * rr_ratio,
        GapDirection::Bearish => entry - risk * rr_ratio,
    }
}

/// Reward over risk. Zero when the risk distance is zero.
pub fn risk_reward(entry: f64, stop: f64, target: f64) -> f64 {
    let risk = (entry - stop).abs();
    if risk == 0.0 {
        return 0.0;
    }
    (target - entry).abs() / risk
}

/// Position notional capped by both the risk budget and the max allocation.
pub fn position_size(
    capital: f64,
    max_risk_percent: f64,
    position_size_percent: f64,
    entry: f64,
    stop: f64,
) -> f64 {
    let per_unit_risk = (entry - stop).abs();
    if per_unit_risk == 0.0 {
        return 0.0;
    }
    let risk_budget = capital * max_risk_percent / 100.0;
    let max_position = capital * position_size_percent / 100.0;
    (risk_budget / per_unit_risk).min(max_position)
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
