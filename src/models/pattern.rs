use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GapDirection, Timeframe};

/// Identifier assigned by the pattern store.
pub type PatternId = u64;

/// A detected price-imbalance pattern with its trade levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(default)]
    pub id: Option<PatternId>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub pattern_type: String,
    pub direction: GapDirection,
    pub start_timestamp: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub gap_top: f64,
    pub gap_bottom: f64,
    pub gap_size_percent: f64,
    pub is_valid: bool,
    #[serde(default)]
    pub filled_timestamp: Option<DateTime<Utc>>,
    #[serde(default = "default_confluence")]
    pub confluence_count: usize,
    #[serde(default)]
    pub confluence_timeframes: Option<String>,
}

fn default_confluence() -> usize {
    1
}

impl Pattern {
    pub fn risk_distance(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn reward_distance(&self) -> f64 {
        (self.take_profit - self.entry_price).abs()
    }

    /// Marks the pattern filled. Invalidation is one-way.
    pub fn invalidate(&mut self, at: DateTime<Utc>) {
        if self.is_valid {
            self.is_valid = false;
            self.filled_timestamp = Some(at);
        }
    }
}
