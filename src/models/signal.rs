use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Direction, PatternId, SignalStatus, Timeframe};

pub type SignalId = u64;

/// A directional trade signal backed by gaps on several timeframes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default)]
    pub id: Option<SignalId>,
    pub symbol: String,
    pub direction: Direction,
    pub pattern_ids: Vec<PatternId>,
    pub primary_timeframe: Timeframe,
    pub confluence_count: usize,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
    pub position_size_percent: f64,
    pub risk_amount_percent: f64,
    pub status: SignalStatus,
    pub notified: bool,
    #[serde(default)]
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Same side and entry within `tolerance` (relative) of `other`.
    pub fn is_duplicate_of(&self, other: &Signal, tolerance: f64) -> bool {
        if self.direction != other.direction || self.entry_price == 0.0 {
            return false;
        }
        (other.entry_price - self.entry_price).abs() / self.entry_price < tolerance
    }
}
