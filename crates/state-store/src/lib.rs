pub mod atomic;
pub mod auto_tuner;
pub mod cache_store;
pub mod metrics;

pub use atomic::{atomic_write_json, atomic_write_text};
pub use auto_tuner::{compute_tuned_values, persist_env_values, tuned_values_as_env, AutoTunerConfig, TunedValues, TuningSample};
pub use cache_store::{load_signal_cache, CacheFlusher, CacheStoreConfig};
pub use metrics::{GuardStat, Metrics, MgmtMetrics, SymbolMetrics, DEFAULT_KEEP_DAYS, DEFAULT_MAX_EXAMPLES};
