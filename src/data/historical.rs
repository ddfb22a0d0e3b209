use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::data::{cache, CandleSource};
use crate::models::{Candle, CandleSeries, Timeframe};

/// In-memory candle source keyed by symbol and timeframe.
#[derive(Debug, Default, Clone)]
pub struct HistoricalCandles {
    data: HashMap<(String, Timeframe), Vec<Candle>>,
}

impl HistoricalCandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load candles for one series. Input order does not matter; duplicate
    /// timestamps keep the last occurrence.
    pub fn load(&mut self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        let mut candles = candles;
        candles.sort_by_key(|c| c.timestamp);
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for c in candles {
            match deduped.last_mut() {
                Some(last) if last.timestamp == c.timestamp => *last = c,
                _ => deduped.push(c),
            }
        }
        self.data.insert((symbol.to_string(), timeframe), deduped);
    }

    /// Loads every `{symbol}_{tf}.json` cache file that exists under `data_dir`.
    pub fn from_cache_dir(
        data_dir: impl AsRef<Path>,
        symbols: &[String],
        timeframes: &[Timeframe],
    ) -> Self {
        let mut source = Self::new();
        for symbol in symbols {
            for &tf in timeframes {
                match cache::load_cached(data_dir.as_ref(), symbol, tf) {
                    Ok(series) => {
                        debug!("Loaded {} {} candles for {}", series.len(), tf, symbol);
                        source.load(symbol, tf, series.into_iter().collect());
                    }
                    Err(e) => warn!("No cached {} data for {}: {}", tf, symbol, e),
                }
            }
        }
        source
    }

    /// Builds each missing timeframe of `symbol` by aggregating the finest
    /// loaded series below it. Returns the timeframes that were filled.
    pub fn fill_by_resampling(&mut self, symbol: &str, timeframes: &[Timeframe]) -> Vec<Timeframe> {
        let mut filled = Vec::new();
        for &target in timeframes {
            if !self.series(symbol, target).is_empty() {
                continue;
            }
            let Some(base) = Timeframe::ALL
                .into_iter()
                .filter(|tf| *tf < target)
                .find(|tf| !self.series(symbol, *tf).is_empty())
            else {
                continue;
            };
            let resampled = CandleSeries::new(self.series(symbol, base).to_vec()).resample(target);
            debug!(
                "Resampled {} {} candles into {} {} candles for {}",
                self.series(symbol, base).len(),
                base,
                resampled.len(),
                target,
                symbol
            );
            self.load(symbol, target, resampled.into_iter().collect());
            filled.push(target);
        }
        filled
    }

    pub fn series_count(&self) -> usize {
        self.data.len()
    }

    fn series(&self, symbol: &str, timeframe: Timeframe) -> &[Candle] {
        self.data
            .get(&(symbol.to_string(), timeframe))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[async_trait]
impl CandleSource for HistoricalCandles {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<CandleSeries> {
        let all = self.series(symbol, timeframe);
        let lo = start.map_or(0, |s| all.partition_point(|c| c.timestamp < s));
        let hi = end.map_or(all.len(), |e| all.partition_point(|c| c.timestamp <= e));
        if lo >= hi {
            return Ok(CandleSeries::default());
        }
        let lo = match limit {
            Some(n) => lo.max(hi.saturating_sub(n)),
            None => lo,
        };
        Ok(CandleSeries::new(all[lo..hi].to_vec()))
    }

    async fn latest_timestamp(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.series(symbol, timeframe).last().map(|c| c.timestamp))
    }
}
