use chrono::{NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::models::Timeframe;
use crate::params::{DetectionParameters, RiskParameters, TradingParameters};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Universe
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,

    // Risk
    pub position_size_percent: f64,
    pub max_risk_percent: f64,
    pub stop_loss_atr_multiplier: f64,
    pub take_profit_rr_ratio: f64,

    // Gap detection
    pub fvg_min_gap_percent: f64,
    pub fvg_max_age_candles: u32,
    pub fvg_volume_confirmation: bool,

    // Confluence
    pub min_timeframe_confluence: usize,
    pub confluence_lookback_hours: i64,

    // Backtest
    pub backtest_start_date: NaiveDate,
    pub backtest_end_date: NaiveDate,
    pub backtest_initial_capital: f64,

    // Storage
    pub parameters_file: PathBuf,
    pub data_dir: PathBuf,

    pub scan_interval_seconds: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Missing or unparseable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };
        let date = |key: &str, default: NaiveDate| -> NaiveDate {
            NaiveDate::parse_from_str(&env(key, ""), "%Y-%m-%d").unwrap_or(default)
        };

        let symbols: Vec<String> = env("SYMBOLS", "BTC/USDT,ETH/USDT")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let mut timeframes: Vec<Timeframe> = env("TIMEFRAMES", "1m,5m,15m,1h,4h,1d")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| match Timeframe::from_str_loose(s) {
                Some(tf) => Some(tf),
                None => {
                    warn!("Ignoring unknown timeframe '{}'", s);
                    None
                }
            })
            .collect();
        timeframes.sort();
        timeframes.dedup();

        Config {
            symbols,
            timeframes,
            position_size_percent: env("POSITION_SIZE_PERCENT", "2.0").parse().unwrap_or(2.0),
            max_risk_percent: env("MAX_RISK_PERCENT", "1.0").parse().unwrap_or(1.0),
            stop_loss_atr_multiplier: env("STOP_LOSS_ATR_MULTIPLIER", "1.5")
                .parse()
                .unwrap_or(1.5),
            take_profit_rr_ratio: env("TAKE_PROFIT_RR_RATIO", "2.0").parse().unwrap_or(2.0),
            fvg_min_gap_percent: env("FVG_MIN_GAP_PERCENT", "0.1").parse().unwrap_or(0.1),
            fvg_max_age_candles: env("FVG_MAX_AGE_CANDLES", "50").parse().unwrap_or(50),
            fvg_volume_confirmation: env("FVG_VOLUME_CONFIRMATION", "true").to_lowercase()
                == "true",
            min_timeframe_confluence: env("MIN_TIMEFRAME_CONFLUENCE", "3").parse().unwrap_or(3),
            confluence_lookback_hours: env("CONFLUENCE_LOOKBACK_HOURS", "24")
                .parse::<i64>()
                .ok()
                .filter(|h| *h > 0 && TimeDelta::try_hours(*h).is_some())
                .unwrap_or(24),
            backtest_start_date: date(
                "BACKTEST_START_DATE",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            ),
            backtest_end_date: date(
                "BACKTEST_END_DATE",
                NaiveDate::from_ymd_opt(2024, 12, 1).unwrap_or_default(),
            ),
            backtest_initial_capital: env("BACKTEST_INITIAL_CAPITAL", "10000")
                .parse()
                .unwrap_or(10_000.0),
            parameters_file: PathBuf::from(env("PARAMETERS_FILE", "data/parameters.json")),
            data_dir: PathBuf::from(env("DATA_DIR", "data")),
            scan_interval_seconds: env("SCAN_INTERVAL_SECONDS", "60").parse().unwrap_or(60),
            log_level: env("LOG_LEVEL", "info").to_lowercase(),
        }
    }

    /// Global parameter defaults, before any symbol or timeframe override.
    pub fn default_parameters(&self) -> TradingParameters {
        TradingParameters {
            risk: RiskParameters {
                max_risk_percent: self.max_risk_percent,
                stop_loss_atr_multiplier: self.stop_loss_atr_multiplier,
                take_profit_rr_ratio: self.take_profit_rr_ratio,
                position_size_percent: self.position_size_percent,
            },
            detection: DetectionParameters {
                min_gap_percent: self.fvg_min_gap_percent,
                max_age_candles: self.fvg_max_age_candles,
                volume_confirmation: self.fvg_volume_confirmation,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
