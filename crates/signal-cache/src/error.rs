use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing symbol field")]
    MissingSymbol,

    #[error("invalid timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("invalid signal_time: {0}")]
    InvalidSignalTime(String),

    #[error("invalid side: {0}")]
    InvalidSide(String),
}

pub type NormalizeResult<T> = Result<T, NormalizeError>;
