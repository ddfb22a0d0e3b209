use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::core::fvg::FVG_PATTERN;
use crate::data::{PatternQuery, PatternStore};
use crate::models::{Direction, GapDirection, Pattern, Signal, SignalStatus, Timeframe};
use crate::params::ParameterStore;

/// Relative entry difference under which two same-side signals are the same.
pub const DUPLICATE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfluenceSummary {
    pub total_signals: usize,
    pub long_signals: usize,
    pub short_signals: usize,
    pub by_confluence: BTreeMap<usize, usize>,
    pub by_symbol: BTreeMap<String, usize>,
    pub high_confluence: Vec<Signal>,
}

/// Turns gaps that agree across timeframes into trade signals.
#[derive(Debug, Clone)]
pub struct ConfluenceEngine {
    min_confluence: usize,
    lookback: Duration,
}

impl ConfluenceEngine {
    pub fn new(min_confluence: usize, lookback: Duration) -> Self {
        Self {
            min_confluence,
            lookback,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let lookback = Duration::try_hours(cfg.confluence_lookback_hours)
            .filter(|d| *d > Duration::zero())
            .unwrap_or_else(|| Duration::hours(24));
        Self::new(cfg.min_timeframe_confluence, lookback)
    }

    pub fn min_confluence(&self) -> usize {
        self.min_confluence
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Signals for `symbol` from the valid patterns stored for `timeframes`
    /// that started within the lookback window. At most one per direction.
    ///
    /// Confluence tags are dropped; use [`Self::analyze_with_contributors`]
    /// to get the tagged patterns back.
    pub fn analyze(
        &self,
        store: &dyn PatternStore,
        params: &ParameterStore,
        symbol: &str,
        timeframes: &[Timeframe],
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>> {
        let (signals, _) = self.analyze_with_contributors(store, params, symbol, timeframes, now)?;
        Ok(signals)
    }

    /// Like [`Self::analyze`], also returning the patterns behind the signals
    /// with `confluence_count` and `confluence_timeframes` filled in.
    pub fn analyze_with_contributors(
        &self,
        store: &dyn PatternStore,
        params: &ParameterStore,
        symbol: &str,
        timeframes: &[Timeframe],
        now: DateTime<Utc>,
    ) -> Result<(Vec<Signal>, Vec<Pattern>)> {
        let cutoff = now
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut candidates = Vec::new();
        for &tf in timeframes {
            let query = PatternQuery::new()
                .symbol(symbol)
                .pattern_type(FVG_PATTERN)
                .timeframe(tf)
                .since(cutoff);
            candidates.extend(store.valid_patterns(&query)?);
        }

        let signals = self.signals_from_patterns(symbol, &mut candidates, params, now);
        candidates.retain(|p| p.confluence_timeframes.is_some());
        Ok((signals, candidates))
    }

    /// Bullish then bearish signal from an already-filtered candidate set.
    /// Contributing patterns are tagged with the confluence they took part in.
    pub fn signals_from_patterns(
        &self,
        symbol: &str,
        patterns: &mut [Pattern],
        params: &ParameterStore,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        [GapDirection::Bullish, GapDirection::Bearish]
            .into_iter()
            .filter_map(|d| self.find_signal(symbol, patterns, d, params, now))
            .collect()
    }

    fn find_signal(
        &self,
        symbol: &str,
        patterns: &mut [Pattern],
        direction: GapDirection,
        params: &ParameterStore,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        // most recent pattern per timeframe, keyed in canonical order
        let mut latest: BTreeMap<Timeframe, usize> = BTreeMap::new();
        for (i, p) in patterns.iter().enumerate() {
            if p.direction != direction || p.symbol != symbol {
                continue;
            }
            match latest.get(&p.timeframe) {
                Some(&j) if patterns[j].start_timestamp >= p.start_timestamp => {}
                _ => {
                    latest.insert(p.timeframe, i);
                }
            }
        }

        let confluence_count = latest.len();
        if confluence_count == 0 || confluence_count < self.min_confluence {
            return None;
        }

        let (&primary_timeframe, &primary_idx) = latest.iter().next_back()?;
        let primary = &patterns[primary_idx];
        let risk = primary.risk_distance();
        let reward = primary.reward_distance();

        let avg_entry = latest
            .values()
            .map(|&i| patterns[i].entry_price)
            .sum::<f64>()
            / confluence_count as f64;

        let (stop_loss, take_profit) = match direction {
            GapDirection::Bullish => (avg_entry - risk, avg_entry + reward),
            GapDirection::Bearish => (avg_entry + risk, avg_entry - reward),
        };
        let risk_reward_ratio = if risk > 0.0 { reward / risk } else { 0.0 };

        let resolved = params.resolve(Some(symbol), Some(primary_timeframe));
        let timeframes_tag = latest
            .keys()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut pattern_ids = Vec::with_capacity(confluence_count);
        for &i in latest.values() {
            let p = &mut patterns[i];
            p.confluence_count = confluence_count;
            p.confluence_timeframes = Some(timeframes_tag.clone());
            if let Some(id) = p.id {
                pattern_ids.push(id);
            }
        }

        debug!(
            "{} {} confluence on [{}], primary {}",
            symbol, direction, timeframes_tag, primary_timeframe
        );

        Some(Signal {
            id: None,
            symbol: symbol.to_string(),
            direction: direction.to_direction(),
            pattern_ids,
            primary_timeframe,
            confluence_count,
            entry_price: avg_entry,
            stop_loss,
            take_profit,
            risk_reward_ratio,
            position_size_percent: resolved.risk.position_size_percent,
            risk_amount_percent: resolved.risk.max_risk_percent,
            status: SignalStatus::Active,
            notified: false,
            notification_sent_at: None,
            created_at: now,
        })
    }

    /// Analyzes every symbol; new signals that do not duplicate an active one
    /// are saved when `save` is set. A failing symbol is logged and skipped.
    pub fn scan_all_symbols_for_confluence(
        &self,
        store: &mut dyn PatternStore,
        params: &ParameterStore,
        symbols: &[String],
        timeframes: &[Timeframe],
        save: bool,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, Vec<Signal>> {
        info!(
            "Scanning {} symbols for confluence (min {} timeframes)",
            symbols.len(),
            self.min_confluence
        );

        let mut results = BTreeMap::new();
        for symbol in symbols {
            match self.analyze_and_save(store, params, symbol, timeframes, save, now) {
                Ok(signals) => {
                    results.insert(symbol.clone(), signals);
                }
                Err(e) => error!("Error analyzing {}: {:#}", symbol, e),
            }
        }

        let total: usize = results.values().map(Vec::len).sum();
        info!("Confluence scan complete: {} signals", total);
        results
    }

    fn analyze_and_save(
        &self,
        store: &mut dyn PatternStore,
        params: &ParameterStore,
        symbol: &str,
        timeframes: &[Timeframe],
        save: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>> {
        let mut signals = self.analyze(&*store, params, symbol, timeframes, now)?;
        if !save {
            return Ok(signals);
        }

        for signal in signals.iter_mut() {
            let existing = store.active_signals(Some(symbol))?;
            if existing
                .iter()
                .any(|s| signal.is_duplicate_of(s, DUPLICATE_TOLERANCE))
            {
                debug!("{} {} signal duplicates an active one", symbol, signal.direction);
                continue;
            }
            signal.id = Some(store.save_signal(signal.clone())?);
            info!(
                "{}: {} signal (confluence: {})",
                symbol,
                signal.direction.as_str().to_uppercase(),
                signal.confluence_count
            );
        }
        Ok(signals)
    }

    pub fn summary(&self, store: &dyn PatternStore) -> Result<ConfluenceSummary> {
        let active = store.active_signals(None)?;
        let mut summary = ConfluenceSummary {
            total_signals: active.len(),
            ..Default::default()
        };
        for s in &active {
            match s.direction {
                Direction::Long => summary.long_signals += 1,
                Direction::Short => summary.short_signals += 1,
            }
            *summary.by_confluence.entry(s.confluence_count).or_insert(0) += 1;
            *summary.by_symbol.entry(s.symbol.clone()).or_insert(0) += 1;
        }
        summary.high_confluence = active
            .into_iter()
            .filter(|s| s.confluence_count >= self.min_confluence + 1)
            .collect();
        Ok(summary)
    }
}

pub fn format_signals(signals: &[Signal]) -> String {
    if signals.is_empty() {
        return "No signals found".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(80));
    let _ = writeln!(
        out,
        "{:<12} {:<8} {:<12} {:<12} {:<12} {:<6} {:<6}",
        "Symbol", "Side", "Entry", "SL", "TP", "R:R", "Conf"
    );
    let _ = writeln!(out, "{}", "=".repeat(80));
    for s in signals {
        let _ = writeln!(
            out,
            "{:<12} {:<8} {:<12.8} {:<12.8} {:<12.8} {:<6.2} {:<6}",
            s.symbol,
            s.direction.as_str().to_uppercase(),
            s.entry_price,
            s.stop_loss,
            s.take_profit,
            s.risk_reward_ratio,
            s.confluence_count
        );
    }
    let _ = write!(out, "{}", "=".repeat(80));
    out
}

pub fn display_signals(signals: &[Signal]) {
    println!("\n{}\n", format_signals(signals));
}
