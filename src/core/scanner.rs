use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::core::detector::DetectorRegistry;
use crate::data::{CandleSource, PatternQuery, PatternStore};
use crate::error::ScanError;
use crate::models::{GapDirection, Pattern, Timeframe};
use crate::params::ParameterStore;

const MIN_CANDLES: usize = 3;

/// Counts over the currently valid patterns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternSummary {
    pub total: usize,
    pub bullish: usize,
    pub bearish: usize,
    pub by_symbol: BTreeMap<String, usize>,
    pub patterns: Vec<Pattern>,
}

/// Runs registered detectors over symbols and timeframes.
pub struct PatternScanner<'a> {
    registry: &'a DetectorRegistry,
    params: &'a ParameterStore,
}

impl<'a> PatternScanner<'a> {
    pub fn new(registry: &'a DetectorRegistry, params: &'a ParameterStore) -> Self {
        Self { registry, params }
    }

    /// Detects patterns for one symbol/timeframe. When `store` is given the
    /// results are saved and carry their store ids.
    pub async fn detect_patterns(
        &self,
        source: &dyn CandleSource,
        store: Option<&mut dyn PatternStore>,
        symbol: &str,
        timeframe: Timeframe,
        pattern_types: Option<&[String]>,
    ) -> Result<Vec<Pattern>> {
        let mut found = self.detect(source, symbol, timeframe, pattern_types).await?;
        if let Some(store) = store {
            save_all(store, &mut found)?;
        }
        Ok(found)
    }

    async fn detect(
        &self,
        source: &dyn CandleSource,
        symbol: &str,
        timeframe: Timeframe,
        pattern_types: Option<&[String]>,
    ) -> Result<Vec<Pattern>> {
        let candles = source.candles(symbol, timeframe, None, None, None).await?;
        if candles.len() < MIN_CANDLES {
            let err = ScanError::InsufficientData {
                required: MIN_CANDLES,
                actual: candles.len(),
            };
            warn!("{} {}: {}", symbol, timeframe, err);
            return Ok(Vec::new());
        }

        let types = match pattern_types {
            Some(t) => t.to_vec(),
            None => self.registry.pattern_types(),
        };
        let params = self.params.resolve(Some(symbol), Some(timeframe));

        let mut all = Vec::new();
        for pattern_type in &types {
            let detector = match self.registry.get(pattern_type) {
                Ok(d) => d,
                Err(e) => {
                    warn!("{} {}: {}", symbol, timeframe, e);
                    continue;
                }
            };
            let found = detector.detect(candles.as_slice(), symbol, timeframe, &params);
            debug!(
                "Detected {} {} patterns for {} {}",
                found.len(),
                pattern_type,
                symbol,
                timeframe
            );
            all.extend(found);
        }

        Ok(all)
    }

    /// Scans every symbol × timeframe, saving results. A failing unit is
    /// logged and skipped.
    pub async fn scan_all_symbols(
        &self,
        source: &dyn CandleSource,
        store: &mut dyn PatternStore,
        symbols: &[String],
        timeframes: &[Timeframe],
        pattern_types: Option<&[String]>,
    ) -> BTreeMap<String, Vec<Pattern>> {
        info!(
            "Starting pattern scan: {} symbols, {} timeframes",
            symbols.len(),
            timeframes.len()
        );

        let mut results = BTreeMap::new();
        for symbol in symbols {
            let mut symbol_patterns = Vec::new();
            for &tf in timeframes {
                let mut found = match self.detect(source, symbol, tf, pattern_types).await {
                    Ok(found) => found,
                    Err(e) => {
                        error!("Error scanning {} {}: {:#}", symbol, tf, e);
                        continue;
                    }
                };
                match save_all(store, &mut found) {
                    Ok(()) => symbol_patterns.extend(found),
                    Err(e) => error!("Error saving {} {} patterns: {}", symbol, tf, e),
                }
            }
            if !symbol_patterns.is_empty() {
                info!("{}: {} patterns found", symbol, symbol_patterns.len());
            }
            results.insert(symbol.clone(), symbol_patterns);
        }

        let total: usize = results.values().map(Vec::len).sum();
        info!("Scan complete: {} total patterns", total);
        results
    }

    /// Invalidates stored patterns for `symbol` that are filled or expired.
    /// Returns the number invalidated.
    pub fn update_pattern_validity(
        &self,
        store: &mut dyn PatternStore,
        symbol: &str,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let patterns = store.valid_patterns(&PatternQuery::new().symbol(symbol))?;
        let mut invalidated = 0;

        for pattern in &patterns {
            let Ok(detector) = self.registry.get(&pattern.pattern_type) else {
                continue;
            };
            let params = self.params.resolve(Some(&pattern.symbol), Some(pattern.timeframe));
            if detector.is_valid(pattern, current_price, now, &params) {
                continue;
            }
            if let Some(id) = pattern.id {
                if store.invalidate_pattern(id, now)? {
                    invalidated += 1;
                    debug!(
                        "Invalidated {} pattern for {} @ {}",
                        pattern.pattern_type, symbol, pattern.start_timestamp
                    );
                }
            }
        }

        Ok(invalidated)
    }
}

/// Saves each pattern and stamps it with its store id.
fn save_all(store: &mut dyn PatternStore, patterns: &mut [Pattern]) -> crate::error::Result<()> {
    for pattern in patterns.iter_mut() {
        pattern.id = Some(store.save_pattern(pattern.clone())?);
    }
    Ok(())
}

pub fn pattern_summary(
    store: &dyn PatternStore,
    symbol: Option<&str>,
    timeframe: Option<Timeframe>,
    pattern_type: Option<&str>,
) -> Result<PatternSummary> {
    let query = PatternQuery {
        symbol: symbol.map(str::to_string),
        pattern_type: pattern_type.map(str::to_string),
        timeframe,
        since: None,
    };
    let patterns = store.valid_patterns(&query)?;

    let mut summary = PatternSummary {
        total: patterns.len(),
        ..Default::default()
    };
    for p in &patterns {
        match p.direction {
            GapDirection::Bullish => summary.bullish += 1,
            GapDirection::Bearish => summary.bearish += 1,
        }
        *summary.by_symbol.entry(p.symbol.clone()).or_insert(0) += 1;
    }
    summary.patterns = patterns;
    Ok(summary)
}
