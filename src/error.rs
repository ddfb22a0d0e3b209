use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("insufficient data: {actual} candles < minimum {required}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid parameter override: {0}")]
    InvalidOverride(String),

    #[error("unknown pattern type '{0}'")]
    UnknownPatternType(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
