pub mod cache;
pub mod error;
pub mod normalize;
pub mod qtrend;
pub mod types;

pub use cache::{CacheConfig, SignalCache};
pub use error::{NormalizeError, NormalizeResult};
pub use normalize::{normalize, sanitize_str};
pub use qtrend::{QTrendContext, QTrendStore};
pub use types::{Confirmed, Side, Signal, SignalType, Source, Strength};
