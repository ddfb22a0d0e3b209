pub mod report;
pub mod runner;
pub mod trade;

pub use report::BacktestReport;
pub use runner::{backtest_many, Backtester, WARMUP_WINDOW};
pub use trade::SimulatedTrade;
