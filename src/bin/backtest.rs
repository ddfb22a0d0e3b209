use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing_subscriber::{fmt, EnvFilter};

use flow_scanner::backtesting::backtest_many;
use flow_scanner::config::Config;
use flow_scanner::core::fvg::GapDetector;
use flow_scanner::data::HistoricalCandles;
use flow_scanner::models::Timeframe;
use flow_scanner::params::ParameterStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    // backtest [SYMBOL] [TIMEFRAME] [START] [END]
    let args: Vec<String> = std::env::args().collect();

    let symbols: Vec<String> = match args.get(1) {
        Some(s) => vec![s.clone()],
        None => cfg.symbols.clone(),
    };
    let timeframes: Vec<Timeframe> = match args.get(2) {
        Some(s) => vec![s.parse::<Timeframe>().map_err(anyhow::Error::msg)?],
        None => cfg.timeframes.clone(),
    };
    let start = match args.get(3) {
        Some(s) => parse_date(s)?,
        None => cfg.backtest_start_date,
    };
    let end = match args.get(4) {
        Some(s) => parse_date(s)?,
        None => cfg.backtest_end_date,
    };

    let tf_names: Vec<String> = timeframes.iter().map(|tf| tf.to_string()).collect();
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║              FAIR VALUE GAP BACKTESTER                   ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!("  Symbols:     {}", symbols.join(", "));
    println!("  Timeframes:  {}", tf_names.join(", "));
    println!("  Period:      {} to {}", start, end);
    println!("  Capital:     ${:.2}", cfg.backtest_initial_capital);
    println!();

    let mut source = HistoricalCandles::from_cache_dir(&cfg.data_dir, &symbols, &timeframes);
    for symbol in &symbols {
        let filled = source.fill_by_resampling(symbol, &timeframes);
        if !filled.is_empty() {
            let names: Vec<String> = filled.iter().map(|tf| tf.to_string()).collect();
            println!("  {}: resampled {}", symbol, names.join(", "));
        }
    }
    if source.series_count() == 0 {
        println!("ERROR: No cached candles under {}.", cfg.data_dir.display());
        println!("Expected files named like BTC-USDT_1h.json");
        return Ok(());
    }

    let params = ParameterStore::open(cfg.default_parameters(), &cfg.parameters_file)
        .with_context(|| format!("loading {}", cfg.parameters_file.display()))?;

    let reports = backtest_many(
        &source,
        &params,
        &GapDetector::new(),
        &symbols,
        &timeframes,
        start,
        end,
        cfg.backtest_initial_capital,
    )
    .await;

    if reports.is_empty() {
        println!("ERROR: Not enough data for backtesting");
        return Ok(());
    }

    let out_dir = cfg.data_dir.join("backtests");
    for report in &reports {
        report.print_summary();

        let stem = format!(
            "backtest_{}_{}_{}_{}",
            report.symbol.replace('/', "-"),
            report.timeframe,
            report.start_date.format("%Y%m%d"),
            report.end_date.format("%Y%m%d"),
        );
        let json_path = out_dir.join(format!("{}.json", stem));
        let text_path = out_dir.join(format!("{}.txt", stem));
        report
            .save_json(&json_path)
            .with_context(|| format!("writing {}", json_path.display()))?;
        report
            .save_text(&text_path)
            .with_context(|| format!("writing {}", text_path.display()))?;
        println!("\nReport saved to: {}", json_path.display());
    }

    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{}'", s))
}
