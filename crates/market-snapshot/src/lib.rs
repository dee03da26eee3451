pub mod provider;
pub mod timeseries;
pub mod types;

pub use provider::{MarketSnapshotProvider, ProviderConfig, Timeframe};
pub use types::{Bar, MarketSnapshot, SlopeDirection};
