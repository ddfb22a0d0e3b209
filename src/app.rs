use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use flow_scanner::analysis::confluence::display_signals;
use flow_scanner::analysis::ConfluenceEngine;
use flow_scanner::config::Config;
use flow_scanner::core::detector::DetectorRegistry;
use flow_scanner::core::scanner::{pattern_summary, PatternScanner};
use flow_scanner::data::{CandleSource, HistoricalCandles, MemoryStore};
use flow_scanner::params::ParameterStore;

const STORE_FILE: &str = "scanner_state.json";

/// Periodic scan loop: detect, sweep validity, find confluence, report.
pub struct ScannerApp {
    config: Config,
    registry: DetectorRegistry,
    params: ParameterStore,
    engine: ConfluenceEngine,
    store: MemoryStore,
    store_path: PathBuf,
}

impl ScannerApp {
    pub fn new(config: Config) -> Result<Self> {
        let params = ParameterStore::open(config.default_parameters(), &config.parameters_file)
            .with_context(|| {
                format!(
                    "loading parameter overrides from {}",
                    config.parameters_file.display()
                )
            })?;

        let store_path = config.data_dir.join(STORE_FILE);
        let store = if store_path.exists() {
            MemoryStore::load_snapshot(&store_path)
                .with_context(|| format!("loading {}", store_path.display()))?
        } else {
            MemoryStore::new()
        };

        let timeframes: Vec<String> = config.timeframes.iter().map(|tf| tf.to_string()).collect();
        info!("{}", "=".repeat(60));
        info!("Flow scanner starting up");
        info!("Symbols:    {}", config.symbols.join(", "));
        info!("Timeframes: {}", timeframes.join(", "));
        info!(
            "Confluence: min {} timeframes within {}h",
            config.min_timeframe_confluence, config.confluence_lookback_hours
        );
        info!("Parameters: {}", params.describe(None, None));
        info!("{}", "=".repeat(60));

        Ok(Self {
            engine: ConfluenceEngine::from_config(&config),
            registry: DetectorRegistry::with_defaults(),
            params,
            store,
            store_path,
            config,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Scanner is now running. Press Ctrl+C to stop.");
        let interval = Duration::from_secs(self.config.scan_interval_seconds.max(1));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown();
                    return Ok(());
                }
                _ = self.tick() => {}
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown();
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn tick(&mut self) {
        let now = Utc::now();
        let source = HistoricalCandles::from_cache_dir(
            &self.config.data_dir,
            &self.config.symbols,
            &self.config.timeframes,
        );
        if source.series_count() == 0 {
            warn!(
                "No cached candles under {}; nothing to scan",
                self.config.data_dir.display()
            );
            return;
        }

        let scanner = PatternScanner::new(&self.registry, &self.params);
        scanner
            .scan_all_symbols(
                &source,
                &mut self.store,
                &self.config.symbols,
                &self.config.timeframes,
                None,
            )
            .await;

        // Validity sweep against the latest close on the finest timeframe
        for symbol in &self.config.symbols {
            let Some(&finest) = self.config.timeframes.first() else {
                break;
            };
            let last = match source.candles(symbol, finest, None, None, Some(1)).await {
                Ok(series) => series.last().cloned(),
                Err(e) => {
                    warn!("No latest price for {}: {:#}", symbol, e);
                    None
                }
            };
            let Some(last) = last else {
                continue;
            };
            match scanner.update_pattern_validity(&mut self.store, symbol, last.close, now) {
                Ok(n) if n > 0 => info!("{}: {} patterns invalidated", symbol, n),
                Ok(_) => {}
                Err(e) => error!("Validity sweep failed for {}: {:#}", symbol, e),
            }
        }

        let results = self.engine.scan_all_symbols_for_confluence(
            &mut self.store,
            &self.params,
            &self.config.symbols,
            &self.config.timeframes,
            true,
            now,
        );
        let signals: Vec<_> = results.into_values().flatten().collect();
        if !signals.is_empty() {
            display_signals(&signals);
        }

        match pattern_summary(&self.store, None, None, None) {
            Ok(summary) => info!(
                "Valid patterns: {} ({} bullish, {} bearish)",
                summary.total, summary.bullish, summary.bearish
            ),
            Err(e) => error!("Pattern summary failed: {:#}", e),
        }

        if let Err(e) = self.store.save_snapshot(&self.store_path) {
            error!("Failed to save scanner state: {}", e);
        }
    }

    fn shutdown(&self) {
        info!("Shutting down...");
        if let Err(e) = self.store.save_snapshot(&self.store_path) {
            error!("Failed to save scanner state: {}", e);
        }
        match self.engine.summary(&self.store) {
            Ok(summary) => info!(
                "Active signals: {} ({} long, {} short, {} high confluence)",
                summary.total_signals,
                summary.long_signals,
                summary.short_signals,
                summary.high_confluence.len()
            ),
            Err(e) => error!("Signal summary failed: {:#}", e),
        }
        info!("Scanner stopped.");
    }
}
