use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::levels;
use crate::models::{Candle, Direction, ExitReason, Pattern};

/// One simulated position. Exit fields are filled when it closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: f64,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub pnl: Option<f64>,
}

impl SimulatedTrade {
    /// Opens at the pattern's entry, sized against `capital`.
    pub fn open(
        pattern: &Pattern,
        capital: f64,
        max_risk_percent: f64,
        position_size_percent: f64,
        at: DateTime<Utc>,
    ) -> Self {
        let position_size = levels::position_size(
            capital,
            max_risk_percent,
            position_size_percent,
            pattern.entry_price,
            pattern.stop_loss,
        );
        Self {
            direction: pattern.direction.to_direction(),
            entry_price: pattern.entry_price,
            stop_loss: pattern.stop_loss,
            take_profit: pattern.take_profit,
            position_size,
            entry_time: at,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.exit_reason.is_some()
    }

    /// Stop has priority when both levels trade on the same candle.
    pub fn exit_signal(&self, candle: &Candle) -> Option<(f64, ExitReason)> {
        match self.direction {
            Direction::Long => {
                if candle.low <= self.stop_loss {
                    Some((self.stop_loss, ExitReason::StopLoss))
                } else if candle.high >= self.take_profit {
                    Some((self.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
            Direction::Short => {
                if candle.high >= self.stop_loss {
                    Some((self.stop_loss, ExitReason::StopLoss))
                } else if candle.low <= self.take_profit {
                    Some((self.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
        }
    }

    /// P&L of the position if it were closed at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        self.direction.sign() * (price - self.entry_price) * self.position_size / self.entry_price
    }

    pub fn close(&mut self, price: f64, reason: ExitReason, at: DateTime<Utc>) -> f64 {
        let pnl = self.pnl_at(price);
        self.exit_price = Some(price);
        self.exit_time = Some(at);
        self.exit_reason = Some(reason);
        self.pnl = Some(pnl);
        pnl
    }
}
