use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::core::detector::PatternDetector;
use crate::data::CandleSource;
use crate::error::ScanError;
use crate::models::{Candle, CandleSeries, GapDirection, Pattern, Timeframe};
use crate::params::{ParameterStore, TradingParameters};

use super::report::BacktestReport;
use super::trade::SimulatedTrade;

/// Trailing candles fed to the detector at each step. Also the minimum
/// series length the simulator accepts.
pub const WARMUP_WINDOW: usize = 100;

pub const STRATEGY_NAME: &str = "FVG";

#[derive(Debug, Clone, Default)]
enum PositionState {
    #[default]
    Flat,
    /// A candidate gap is waiting for price to reach its entry.
    EntryPending(Pattern),
    Open(SimulatedTrade),
}

/// Replays gap detection over a candle series, one position at a time.
///
/// All mutable state (capital, ledger, equity curve) belongs to a single run
/// and is reset at the start of every simulation.
pub struct Backtester {
    initial_capital: f64,
    capital: f64,
    state: PositionState,
    ledger: Vec<SimulatedTrade>,
    equity_curve: Vec<(DateTime<Utc>, f64)>,
    // gaps already traded, keyed by third-candle time and side
    consumed: HashSet<(DateTime<Utc>, GapDirection)>,
}

impl Backtester {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            capital: initial_capital,
            state: PositionState::Flat,
            ledger: Vec::new(),
            equity_curve: Vec::new(),
            consumed: HashSet::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn reset(&mut self) {
        self.capital = self.initial_capital;
        self.state = PositionState::Flat;
        self.ledger.clear();
        self.equity_curve.clear();
        self.consumed.clear();
    }

    /// Loads candles for the calendar range (UTC, end day inclusive) and
    /// simulates over them. `Ok(None)` when there is not enough data.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &mut self,
        source: &dyn CandleSource,
        params: &ParameterStore,
        detector: &dyn PatternDetector,
        symbol: &str,
        timeframe: Timeframe,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Option<BacktestReport>> {
        anyhow::ensure!(
            start_date <= end_date,
            "start date {} is after end date {}",
            start_date,
            end_date
        );
        let start = start_date.and_time(NaiveTime::MIN).and_utc();
        let end = end_date.and_time(NaiveTime::MIN).and_utc() + Duration::days(1)
            - Duration::seconds(1);

        info!("=== BACKTEST START ===");
        info!(
            "{} {} | Period: {} to {} | Initial capital: ${:.2}",
            symbol, timeframe, start_date, end_date, self.initial_capital
        );

        let candles = source
            .candles(symbol, timeframe, Some(start), Some(end), None)
            .await?;
        let effective = params.resolve(Some(symbol), Some(timeframe));

        let report = self
            .simulate(&candles, symbol, timeframe, &effective, detector)
            .map(|mut report| {
                report.start_date = start_date;
                report.end_date = end_date;
                report
            });

        if let Some(r) = &report {
            info!(
                "=== BACKTEST COMPLETE === {} trades | Win rate {:.1}% | P&L ${:.2} ({:+.2}%)",
                r.total_trades, r.win_rate, r.total_pnl, r.total_pnl_percent
            );
        }
        Ok(report)
    }

    /// Steps through `candles` from the warm-up index to the end. Returns
    /// `None` when the series is shorter than [`WARMUP_WINDOW`].
    pub fn simulate(
        &mut self,
        candles: &CandleSeries,
        symbol: &str,
        timeframe: Timeframe,
        params: &TradingParameters,
        detector: &dyn PatternDetector,
    ) -> Option<BacktestReport> {
        if candles.len() < WARMUP_WINDOW {
            let err = ScanError::InsufficientData {
                required: WARMUP_WINDOW,
                actual: candles.len(),
            };
            warn!("Backtest {} {}: {}", symbol, timeframe, err);
            return None;
        }

        self.reset();
        let total_steps = candles.len() - WARMUP_WINDOW;
        let log_interval = total_steps / 20;

        for i in WARMUP_WINDOW..candles.len() {
            let candle = &candles[i];
            let window = candles.window(i - WARMUP_WINDOW, i + 1);
            let candidate = detector
                .detect(window, symbol, timeframe, params)
                .pop()
                .filter(|p| !self.consumed.contains(&(p.start_timestamp, p.direction)));

            self.step(candle, candidate, params);

            let equity = self.equity_at(candle.close);
            self.equity_curve.push((candle.timestamp, equity));

            let step = i - WARMUP_WINDOW + 1;
            if log_interval > 0 && step % log_interval == 0 {
                debug!(
                    "  Progress: {:.0}% | {} | Equity: ${:.2} | Trades: {}",
                    step as f64 / total_steps as f64 * 100.0,
                    candle.timestamp.format("%Y-%m-%d %H:%M"),
                    equity,
                    self.ledger.len()
                );
            }
        }

        let start_date = candles
            .first()
            .map(|c| c.timestamp.date_naive())
            .unwrap_or_default();
        let end_date = candles
            .last()
            .map(|c| c.timestamp.date_naive())
            .unwrap_or_default();

        Some(BacktestReport::from_ledger(
            STRATEGY_NAME,
            symbol,
            timeframe,
            start_date,
            end_date,
            self.initial_capital,
            self.capital,
            self.ledger.clone(),
            self.equity_curve.clone(),
        ))
    }

    fn step(&mut self, candle: &Candle, candidate: Option<Pattern>, params: &TradingParameters) {
        let state = match std::mem::take(&mut self.state) {
            PositionState::Open(trade) => PositionState::Open(trade),
            waiting @ (PositionState::Flat | PositionState::EntryPending(_)) => match candidate {
                Some(pattern) if entry_touched(&pattern, candle) => {
                    let trade = SimulatedTrade::open(
                        &pattern,
                        self.capital,
                        params.risk.max_risk_percent,
                        params.risk.position_size_percent,
                        candle.timestamp,
                    );
                    debug!(
                        "Opened {} @ {:.4} (SL {:.4} TP {:.4} size {:.2})",
                        trade.direction,
                        trade.entry_price,
                        trade.stop_loss,
                        trade.take_profit,
                        trade.position_size
                    );
                    self.consumed
                        .insert((pattern.start_timestamp, pattern.direction));
                    PositionState::Open(trade)
                }
                Some(pattern) => {
                    let unchanged = matches!(
                        &waiting,
                        PositionState::EntryPending(prev)
                            if prev.start_timestamp == pattern.start_timestamp
                                && prev.direction == pattern.direction
                    );
                    if !unchanged {
                        debug!(
                            "Waiting for {} entry @ {:.4} (gap at {})",
                            pattern.direction,
                            pattern.entry_price,
                            pattern.start_timestamp.format("%Y-%m-%d %H:%M")
                        );
                    }
                    PositionState::EntryPending(pattern)
                }
                None => {
                    if let PositionState::EntryPending(prev) = &waiting {
                        debug!("Dropped pending {} entry @ {:.4}", prev.direction, prev.entry_price);
                    }
                    PositionState::Flat
                }
            },
        };

        self.state = match state {
            PositionState::Open(mut trade) => match trade.exit_signal(candle) {
                Some((price, reason)) => {
                    let pnl = trade.close(price, reason, candle.timestamp);
                    self.capital += pnl;
                    debug!(
                        "Closed {} @ {:.4} ({}) P&L ${:.2} | Capital ${:.2}",
                        trade.direction, price, reason, pnl, self.capital
                    );
                    self.ledger.push(trade);
                    PositionState::Flat
                }
                None => PositionState::Open(trade),
            },
            other => other,
        };
    }

    /// Realized capital plus the open position marked at `price`.
    fn equity_at(&self, price: f64) -> f64 {
        match &self.state {
            PositionState::Open(trade) => self.capital + trade.pnl_at(price),
            _ => self.capital,
        }
    }
}

fn entry_touched(pattern: &Pattern, candle: &Candle) -> bool {
    match pattern.direction {
        GapDirection::Bullish => candle.low <= pattern.entry_price,
        GapDirection::Bearish => candle.high >= pattern.entry_price,
    }
}

/// Backtests every symbol × timeframe with a fresh simulator each. Units
/// that fail or lack data are logged and left out.
#[allow(clippy::too_many_arguments)]
pub async fn backtest_many(
    source: &dyn CandleSource,
    params: &ParameterStore,
    detector: &dyn PatternDetector,
    symbols: &[String],
    timeframes: &[Timeframe],
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_capital: f64,
) -> Vec<BacktestReport> {
    let mut reports = Vec::new();
    for symbol in symbols {
        for &tf in timeframes {
            let mut backtester = Backtester::new(initial_capital);
            match backtester
                .run(source, params, detector, symbol, tf, start_date, end_date)
                .await
            {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => warn!("Skipping {} {}: not enough data", symbol, tf),
                Err(e) => error!("Backtest failed for {} {}: {:#}", symbol, tf, e),
            }
        }
    }
    info!("Completed {} backtests", reports.len());
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fvg::GapDetector;
    use crate::data::HistoricalCandles;
    use crate::models::ExitReason;
    use crate::test_helpers::{base_time, make_candles, make_candles_with_volume, make_flat, make_pattern};

    type Bar = (f64, f64, f64, f64, f64);

    /// 103 flat candles, a bullish gap (bottom 101, top 103, entry 102) on
    /// candles 103..=105, a pullback through the entry on 106, then `after`,
    /// then flat candles around `tail_price` up to 150 candles.
    fn one_gap_series(after: &[Bar], tail_price: f64) -> CandleSeries {
        let mut bars: Vec<Bar> = (0..103)
            .map(|i| {
                let close = if i % 2 == 0 { 100.2 } else { 99.8 };
                (100.0, 101.0, 99.0, close, 100.0)
            })
            .collect();
        bars.push((100.0, 101.0, 99.0, 100.5, 100.0));
        bars.push((101.0, 104.0, 100.5, 103.5, 100.0));
        bars.push((104.0, 106.0, 103.0, 105.5, 150.0));
        bars.push((105.0, 105.5, 101.5, 102.5, 100.0));
        bars.extend_from_slice(after);
        let mut i = 0;
        while bars.len() < 150 {
            let close = if i % 2 == 0 { tail_price + 0.2 } else { tail_price - 0.2 };
            bars.push((tail_price, tail_price + 1.0, tail_price - 1.0, close, 100.0));
            i += 1;
        }
        make_candles_with_volume(&bars)
    }

    fn run(series: &CandleSeries) -> Option<BacktestReport> {
        Backtester::new(10_000.0).simulate(
            series,
            "BTC/USDT",
            Timeframe::H1,
            &TradingParameters::default(),
            &GapDetector::new(),
        )
    }

    #[test]
    fn stop_out_records_single_losing_trade() {
        let series = one_gap_series(
            &[
                (102.5, 103.0, 100.0, 100.5, 100.0),
                (100.5, 101.0, 98.0, 98.5, 100.0),
                (98.5, 99.0, 96.0, 96.5, 100.0),
            ],
            96.5,
        );
        let report = run(&series).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(trade.exit_price, Some(trade.stop_loss));
        assert!((trade.entry_price - 102.0).abs() < 1e-9);
        assert!(trade.pnl.unwrap() < 0.0);
        assert!(report.final_capital < report.initial_capital);
        assert_eq!(report.losing_trades, 1);
        assert!(report.max_drawdown > 0.0);
    }

    #[test]
    fn target_hit_records_winning_trade() {
        let series = one_gap_series(
            &[
                (102.5, 106.0, 102.0, 105.5, 100.0),
                (105.5, 109.0, 105.0, 108.5, 100.0),
                (108.5, 112.0, 108.0, 111.5, 100.0),
            ],
            111.5,
        );
        let report = run(&series).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(trade.exit_price, Some(trade.take_profit));
        assert!(trade.pnl.unwrap() > 0.0);
        assert!((report.final_capital - (10_000.0 + trade.pnl.unwrap())).abs() < 1e-9);
        assert!((report.win_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn no_gap_means_no_trades() {
        let report = run(&make_flat(150, 100.0)).unwrap();
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.final_capital, report.initial_capital);
        assert_eq!(report.max_drawdown, 0.0);
        assert_eq!(report.equity_curve.len(), 50);
    }

    #[test]
    fn short_series_is_rejected() {
        assert!(run(&make_flat(WARMUP_WINDOW - 1, 100.0)).is_none());
    }

    #[test]
    fn equity_marks_open_position_to_market() {
        // entry on candle 106, then no exit before the series ends
        let series = one_gap_series(&[], 104.0);
        let report = run(&series).unwrap();
        assert_eq!(report.total_trades, 0);
        let (_, last_equity) = *report.equity_curve.last().unwrap();
        // still long from 102 with price around 104
        assert!(last_equity > report.initial_capital);
        assert_eq!(report.final_capital, report.initial_capital);
    }

    #[test]
    fn rerun_resets_state() {
        let series = one_gap_series(
            &[
                (102.5, 103.0, 100.0, 100.5, 100.0),
                (100.5, 101.0, 98.0, 98.5, 100.0),
                (98.5, 99.0, 96.0, 96.5, 100.0),
            ],
            96.5,
        );
        let mut bt = Backtester::new(10_000.0);
        let params = TradingParameters::default();
        let detector = GapDetector::new();
        let first = bt
            .simulate(&series, "BTC/USDT", Timeframe::H1, &params, &detector)
            .unwrap();
        let second = bt
            .simulate(&series, "BTC/USDT", Timeframe::H1, &params, &detector)
            .unwrap();
        assert_eq!(first.total_trades, second.total_trades);
        assert!((first.final_capital - second.final_capital).abs() < 1e-9);
    }

    #[test]
    fn pending_gap_waits_for_entry_then_opens() {
        let mut bt = Backtester::new(10_000.0);
        let params = TradingParameters::default();
        let gap = make_pattern("BTC/USDT", Timeframe::H1, GapDirection::Bullish, 102.0, base_time());
        let above = make_candles(&[(104.0, 105.0, 103.0, 104.5), (103.5, 104.0, 101.5, 102.5)]);

        bt.step(&above[0], Some(gap.clone()), &params);
        assert!(matches!(&bt.state, PositionState::EntryPending(p) if p.entry_price == 102.0));
        assert!(bt.consumed.is_empty());

        bt.step(&above[0], None, &params);
        assert!(matches!(bt.state, PositionState::Flat));

        bt.step(&above[0], Some(gap.clone()), &params);
        bt.step(&above[1], Some(gap), &params);
        assert!(matches!(&bt.state, PositionState::Open(t) if t.entry_price == 102.0));
        assert_eq!(bt.consumed.len(), 1);
    }

    #[tokio::test]
    async fn run_filters_by_calendar_dates() {
        let series = make_flat(150, 100.0);
        let mut source = HistoricalCandles::new();
        source.load("BTC/USDT", Timeframe::M1, series.iter().cloned().collect());
        let params = ParameterStore::new(TradingParameters::default());
        let detector = GapDetector::new();
        let day = series[0].timestamp.date_naive();

        let report = Backtester::new(5_000.0)
            .run(&source, &params, &detector, "BTC/USDT", Timeframe::M1, day, day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.start_date, day);
        assert_eq!(report.end_date, day);
        assert_eq!(report.initial_capital, 5_000.0);

        let earlier = day - Duration::days(3);
        let none = Backtester::new(5_000.0)
            .run(&source, &params, &detector, "BTC/USDT", Timeframe::M1, earlier, earlier)
            .await
            .unwrap();
        assert!(none.is_none());

        let bad = Backtester::new(5_000.0)
            .run(&source, &params, &detector, "BTC/USDT", Timeframe::M1, day, earlier)
            .await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn backtest_many_skips_units_without_data() {
        let mut source = HistoricalCandles::new();
        source.load("BTC/USDT", Timeframe::M1, make_flat(150, 100.0).into_iter().collect());
        let params = ParameterStore::new(TradingParameters::default());
        let day = crate::test_helpers::base_time().date_naive();

        let reports = backtest_many(
            &source,
            &params,
            &GapDetector::new(),
            &["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            &[Timeframe::M1, Timeframe::H1],
            day,
            day,
            10_000.0,
        )
        .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].symbol, "BTC/USDT");
    }
}
