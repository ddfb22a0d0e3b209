pub mod detector;
pub mod fvg;
pub mod levels;
pub mod scanner;

pub use detector::{DetectorRegistry, PatternDetector, PatternInfo};
pub use fvg::GapDetector;
pub use scanner::PatternScanner;
