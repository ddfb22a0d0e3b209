pub mod analysis;
pub mod backtesting;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod models;
pub mod params;
#[cfg(test)]
pub mod test_helpers;
