use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::models::{Candle, CandleSeries, Timeframe};

/// `{data_dir}/{symbol}_{tf}.json`, with `/` in the symbol replaced by `-`.
pub fn cache_path(data_dir: impl AsRef<Path>, symbol: &str, timeframe: Timeframe) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.json", symbol.replace('/', "-"), timeframe))
}

pub fn load_cached(
    data_dir: impl AsRef<Path>,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<CandleSeries> {
    let path = cache_path(data_dir, symbol, timeframe);
    let content = fs::read_to_string(&path)?;
    let mut candles: Vec<Candle> = serde_json::from_str(&content)?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(CandleSeries::new(candles))
}

pub fn save_cached(
    data_dir: impl AsRef<Path>,
    symbol: &str,
    timeframe: Timeframe,
    candles: &CandleSeries,
) -> Result<PathBuf> {
    fs::create_dir_all(data_dir.as_ref())?;
    let path = cache_path(data_dir, symbol, timeframe);
    fs::write(&path, serde_json::to_string(candles.as_slice())?)?;
    info!("Cached {} {} candles to {}", candles.len(), timeframe, path.display());
    Ok(path)
}
