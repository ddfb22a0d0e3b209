use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::backtesting::trade::SimulatedTrade;
use crate::error::Result;
use crate::models::Timeframe;

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub strategy_name: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    // Performance
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_pnl: f64,
    pub total_pnl_percent: f64,

    // Trades
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win_percent: f64,
    pub avg_loss_percent: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,

    // Risk
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,

    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub trades: Vec<SimulatedTrade>,
}

impl BacktestReport {
    #[allow(clippy::too_many_arguments)]
    pub fn from_ledger(
        strategy_name: &str,
        symbol: &str,
        timeframe: Timeframe,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: f64,
        final_capital: f64,
        trades: Vec<SimulatedTrade>,
        equity_curve: Vec<(DateTime<Utc>, f64)>,
    ) -> Self {
        let pnls: Vec<f64> = trades.iter().filter_map(|t| t.pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

        let total_trades = pnls.len();
        let win_rate = if total_trades > 0 {
            wins.len() as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let total_pnl: f64 = pnls.iter().sum();
        let pct_of_initial = |x: f64| {
            if initial_capital > 0.0 {
                x / initial_capital * 100.0
            } else {
                0.0
            }
        };

        let avg_win = mean(&wins);
        let avg_loss = mean(&losses);

        let gross_wins: f64 = wins.iter().sum();
        let gross_losses: f64 = losses.iter().sum::<f64>().abs();
        let profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else {
            0.0
        };

        let largest_win = pnls.iter().copied().fold(None, |m: Option<f64>, p| {
            Some(m.map_or(p, |m| m.max(p)))
        });
        let largest_loss = pnls.iter().copied().fold(None, |m: Option<f64>, p| {
            Some(m.map_or(p, |m| m.min(p)))
        });

        let equity: Vec<f64> = equity_curve.iter().map(|(_, e)| *e).collect();

        BacktestReport {
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            start_date,
            end_date,
            initial_capital,
            final_capital,
            total_pnl,
            total_pnl_percent: pct_of_initial(total_pnl),
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            avg_win_percent: pct_of_initial(avg_win),
            avg_loss_percent: pct_of_initial(avg_loss),
            largest_win: largest_win.unwrap_or(0.0),
            largest_loss: largest_loss.unwrap_or(0.0),
            profit_factor,
            max_drawdown: max_drawdown_pct(&equity),
            sharpe_ratio: compute_sharpe(&equity),
            equity_curve,
            trades,
        }
    }

    /// Console rendering of the report.
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let section = "  ───────────────────────────────────";
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(out, "  BACKTEST REPORT: {}", self.strategy_name);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "  Symbol:      {}", self.symbol);
        let _ = writeln!(out, "  Timeframe:   {}", self.timeframe);
        let _ = writeln!(out, "  Period:      {} to {}", self.start_date, self.end_date);
        let _ = writeln!(out);
        let _ = writeln!(out, "  TRADES");
        let _ = writeln!(out, "{}", section);
        let _ = writeln!(out, "  Total:       {}", self.total_trades);
        let _ = writeln!(
            out,
            "  Win/Loss:    {} / {} ({:.1}%)",
            self.winning_trades, self.losing_trades, self.win_rate
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "  P&L");
        let _ = writeln!(out, "{}", section);
        let _ = writeln!(
            out,
            "  Total:       ${:.2} ({:+.2}%)",
            self.total_pnl, self.total_pnl_percent
        );
        let _ = writeln!(out, "  Avg Win:     {:+.2}%", self.avg_win_percent);
        let _ = writeln!(out, "  Avg Loss:    {:+.2}%", self.avg_loss_percent);
        let _ = writeln!(out, "  Largest Win: ${:.2}", self.largest_win);
        let _ = writeln!(out, "  Largest Loss: ${:.2}", self.largest_loss);
        let _ = writeln!(out);
        let _ = writeln!(out, "  RISK");
        let _ = writeln!(out, "{}", section);
        let _ = writeln!(out, "  Max DD:      {:.2}%", self.max_drawdown);
        let _ = writeln!(out, "  Sharpe:      {:.2}", self.sharpe_ratio);
        let _ = writeln!(out, "  Profit Factor: {:.2}", self.profit_factor);
        let _ = writeln!(out);
        let _ = writeln!(out, "  Initial:     ${:.2}", self.initial_capital);
        let _ = writeln!(out, "  Final:       ${:.2}", self.final_capital);
        let _ = writeln!(out, "{}", rule);
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.render());
    }

    pub fn save_text(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Largest peak-to-trough drop as a percentage of the running peak.
fn max_drawdown_pct(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0f64;
    for &e in equity {
        peak = peak.max(e);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - e) / peak * 100.0);
        }
    }
    max_dd.clamp(0.0, 100.0)
}

/// Mean over sample std of per-step returns, annualised by √252.
fn compute_sharpe(equity: &[f64]) -> f64 {
    let returns: Vec<f64> = equity
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return 0.0;
    }

    mean / std_dev * 252.0_f64.sqrt()
}
