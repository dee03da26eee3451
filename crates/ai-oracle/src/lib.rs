pub mod error;
pub mod oracle;
pub mod prompt;
pub mod stub;
pub mod types;

pub use error::{OracleError, OracleResult};
pub use oracle::{HttpOracle, HttpOracleConfig, Oracle};
pub use prompt::{build_prompt, CompactionConfig, SYSTEM_DIRECTIVE};
pub use stub::StubOracle;
pub use types::{CloseHoldDecision, EntryScore, OracleKind, OracleResponse, ParseError};
