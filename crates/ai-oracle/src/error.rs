use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("oracle response was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("oracle call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("oracle returned non-success status {0}")]
    Status(reqwest::StatusCode),
    #[error("oracle exhausted {0} retries")]
    RetriesExhausted(u32),
}

pub type OracleResult<T> = Result<T, OracleError>;
