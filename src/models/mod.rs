pub mod candle;
pub mod direction;
pub mod pattern;
pub mod signal;
pub mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use direction::*;
pub use pattern::{Pattern, PatternId};
pub use signal::{Signal, SignalId};
pub use timeframe::Timeframe;
