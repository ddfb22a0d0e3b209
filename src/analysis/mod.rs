pub mod confluence;

pub use confluence::{ConfluenceEngine, ConfluenceSummary};
