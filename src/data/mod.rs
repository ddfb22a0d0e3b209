pub mod cache;
pub mod historical;
pub mod store;

pub use cache::{cache_path, load_cached, save_cached};
pub use historical::HistoricalCandles;
pub use store::{MemoryStore, PatternQuery, PatternStore};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CandleSeries, Timeframe};

/// Read side of candle storage.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Candles for `symbol`/`timeframe` with `start <= timestamp <= end`,
    /// oldest first. With a `limit`, only the most recent `limit` matches
    /// are returned.
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<CandleSeries>;

    async fn latest_timestamp(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>>;
}
