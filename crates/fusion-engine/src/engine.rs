use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use ai_oracle::Oracle;
use chrono::{DateTime, Timelike, Utc};
use heartbeat_monitor::HeartbeatMonitor;
use market_snapshot::MarketSnapshotProvider;
use signal_cache::{QTrendStore, SignalCache};
use state_store::{CacheFlusher, Metrics};
use std::sync::Mutex;
use trade_bus::OutputBus;

use crate::config::EngineConfig;
use crate::state::SymbolRegistry;

/// Single owner of every component-typed field the engine needs (§9 "Global
/// mutable state"). Constructed once at startup; never duplicated.
pub struct Engine {
    pub config: EngineConfig,
    pub cache: SignalCache,
    pub qtrend: QTrendStore,
    pub market: MarketSnapshotProvider,
    pub heartbeat: HeartbeatMonitor,
    pub oracle: Arc<dyn Oracle>,
    pub bus: Arc<dyn OutputBus>,
    pub symbols: SymbolRegistry,
    pub metrics: Mutex<Metrics>,
    pub cache_flusher: CacheFlusher,
    pub last_tune_at: AtomicI64,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        cache: SignalCache,
        qtrend: QTrendStore,
        market: MarketSnapshotProvider,
        heartbeat: HeartbeatMonitor,
        oracle: Arc<dyn Oracle>,
        bus: Arc<dyn OutputBus>,
        metrics: Metrics,
        cache_flusher: CacheFlusher,
    ) -> Self {
        Self {
            config,
            cache,
            qtrend,
            market,
            heartbeat,
            oracle,
            bus,
            symbols: SymbolRegistry::new(),
            metrics: Mutex::new(metrics),
            cache_flusher,
            last_tune_at: AtomicI64::new(0),
        }
    }

    pub fn record_order_sent(&self, symbol: &str, now: i64) {
        let guard = self.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.broker.last_order_sent_at = now;
    }
}

/// Broker-time session guard windows (§4.7.2 gate 5): 23:50-23:59 and
/// 00:00-00:30. `now` is interpreted in UTC, matching the heartbeat bus's
/// `gmt_ts`/`server_gmt_offset_sec` fields which the caller is expected to
/// have already folded into `now` before calling this.
pub fn in_market_guard_window(now: i64) -> bool {
    let dt: DateTime<Utc> = DateTime::from_timestamp(now, 0).unwrap_or_default();
    let minutes = dt.hour() * 60 + dt.minute();
    let evening_start = 23 * 60 + 50;
    let evening_end = 24 * 60 - 1;
    let morning_end = 30;
    (evening_start..=evening_end).contains(&minutes) || minutes <= morning_end
}

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn atomic_i64_bump(counter: &AtomicI64, value: i64) {
    counter.store(value, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_guard_window_covers_evening_and_early_morning() {
        let evening = DateTime::parse_from_rfc3339("2026-01-01T23:55:00Z").unwrap().timestamp();
        let midnight = DateTime::parse_from_rfc3339("2026-01-02T00:05:00Z").unwrap().timestamp();
        let daytime = DateTime::parse_from_rfc3339("2026-01-02T12:00:00Z").unwrap().timestamp();
        assert!(in_market_guard_window(evening));
        assert!(in_market_guard_window(midnight));
        assert!(!in_market_guard_window(daytime));
    }
}
