pub mod confluence;
pub mod window;

pub use confluence::{build_confluence_stats, derived_counts, ConfluenceStats, DerivedCounts, DEFAULT_CONFLUENCE_WINDOW_SEC};
pub use window::{aggregate_window, WindowResult};
