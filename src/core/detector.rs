use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::fvg::GapDetector;
use crate::core::levels::{risk_reward, round2};
use crate::error::{Result, ScanError};
use crate::models::{Candle, GapDirection, Pattern, Timeframe};
use crate::params::TradingParameters;

/// Flat, display-oriented view of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternInfo {
    pub pattern_type: String,
    pub direction: GapDirection,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub gap_top: f64,
    pub gap_bottom: f64,
    pub gap_size_percent: f64,
}

impl PatternInfo {
    pub fn from_pattern(pattern: &Pattern) -> Self {
        Self {
            pattern_type: pattern.pattern_type.clone(),
            direction: pattern.direction,
            symbol: pattern.symbol.clone(),
            timeframe: pattern.timeframe,
            entry: pattern.entry_price,
            stop_loss: pattern.stop_loss,
            take_profit: pattern.take_profit,
            risk_reward: round2(risk_reward(
                pattern.entry_price,
                pattern.stop_loss,
                pattern.take_profit,
            )),
            timestamp: pattern.start_timestamp,
            valid: pattern.is_valid,
            gap_top: pattern.gap_top,
            gap_bottom: pattern.gap_bottom,
            gap_size_percent: round2(pattern.gap_size_percent),
        }
    }
}

/// A pattern type the scanner can run. Parameters arrive already resolved
/// for the symbol and timeframe being processed.
pub trait PatternDetector: Send + Sync {
    fn pattern_type(&self) -> &str;

    fn detect(
        &self,
        candles: &[Candle],
        symbol: &str,
        timeframe: Timeframe,
        params: &TradingParameters,
    ) -> Vec<Pattern>;

    fn is_valid(
        &self,
        pattern: &Pattern,
        current_price: f64,
        now: DateTime<Utc>,
        params: &TradingParameters,
    ) -> bool;

    fn describe(&self, pattern: &Pattern) -> PatternInfo {
        PatternInfo::from_pattern(pattern)
    }
}

/// Maps a pattern-type tag to its detector.
pub struct DetectorRegistry {
    detectors: BTreeMap<String, Box<dyn PatternDetector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in detector.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(GapDetector::new()));
        registry
    }

    pub fn register(&mut self, detector: Box<dyn PatternDetector>) {
        self.detectors
            .insert(detector.pattern_type().to_string(), detector);
    }

    pub fn get(&self, pattern_type: &str) -> Result<&dyn PatternDetector> {
        self.detectors
            .get(pattern_type)
            .map(|d| d.as_ref())
            .ok_or_else(|| ScanError::UnknownPatternType(pattern_type.to_string()))
    }

    pub fn pattern_types(&self) -> Vec<String> {
        self.detectors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
