use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::DashMap;

use crate::types::Signal;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dedupe_window_sec: i64,
    pub zone_lookback_sec: i64,
    pub zone_touch_lookback_sec: i64,
    pub fvg_lookback_sec: i64,
    pub signal_lookback_sec: i64,
    pub signal_max_age_sec: i64,
    pub bucket_sec: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dedupe_window_sec: 120,
            zone_lookback_sec: 1200,
            zone_touch_lookback_sec: 1200,
            fvg_lookback_sec: 1200,
            signal_lookback_sec: 1200,
            signal_max_age_sec: 1200,
            bucket_sec: 60,
        }
    }
}

/// Retention class a signal belongs to, per §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetentionClass {
    ZonePresence,
    ZoneTouch,
    Fvg,
    Other,
}

fn classify(signal: &Signal) -> RetentionClass {
    use crate::types::Source;
    if matches!(signal.source, Source::Zones) {
        if signal.is_zone_presence_event() {
            return RetentionClass::ZonePresence;
        }
        if signal.is_touch_event() {
            return RetentionClass::ZoneTouch;
        }
    }
    if signal.is_touch_event() {
        return RetentionClass::ZoneTouch;
    }
    if matches!(signal.source, Source::Fvg) {
        return RetentionClass::Fvg;
    }
    RetentionClass::Other
}

fn retention_secs(class: RetentionClass, cfg: &CacheConfig) -> i64 {
    match class {
        RetentionClass::ZonePresence => cfg.zone_lookback_sec,
        RetentionClass::ZoneTouch => cfg.zone_touch_lookback_sec,
        RetentionClass::Fvg => cfg.fvg_lookback_sec,
        RetentionClass::Other => cfg.signal_lookback_sec,
    }
}

/// Retention classes that age off `receive_time` rather than `signal_time`
/// (presence/touch events, per §4.2's `prune` rule).
fn ages_by_receive_time(class: RetentionClass) -> bool {
    matches!(class, RetentionClass::ZonePresence | RetentionClass::ZoneTouch | RetentionClass::Fvg)
}

struct SymbolCache {
    signals: Vec<Signal>,
    buckets: HashMap<i64, Vec<usize>>,
    bucket_sec: i64,
}

impl SymbolCache {
    fn new(bucket_sec: i64) -> Self {
        Self { signals: Vec::new(), buckets: HashMap::new(), bucket_sec }
    }

    fn rebuild_buckets(&mut self) {
        self.buckets.clear();
        for (idx, sig) in self.signals.iter().enumerate() {
            let bucket_id = sig.receive_time / self.bucket_sec.max(1);
            self.buckets.entry(bucket_id).or_default().push(idx);
        }
    }

    fn is_duplicate(&self, key: &(String, String, String, String, String, String, i64)) -> bool {
        self.signals.iter().any(|s| &s.dedupe_key() == key)
    }
}

/// Per-symbol time-indexed signal store with event-specific retention and
/// dedupe (§4.2). All reads/writes for a given symbol are serialized by
/// that symbol's mutex; cross-symbol work never contends.
pub struct SignalCache {
    config: CacheConfig,
    symbols: DashMap<String, Mutex<SymbolCache>>,
}

impl SignalCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config, symbols: DashMap::new() }
    }

    fn entry(&self, symbol: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<SymbolCache>> {
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| Mutex::new(SymbolCache::new(self.config.bucket_sec)));
        self.symbols.get(symbol).expect("just inserted")
    }

    /// Append a signal, deduping within the configured window (and beyond —
    /// any prior entry with the same key, at any age, is a duplicate).
    /// Returns `true` if appended, `false` if it was a duplicate.
    pub fn append(&self, signal: Signal) -> bool {
        let symbol = signal.symbol.clone();
        let guard = self.entry(&symbol);
        let mut cache = guard.lock().expect("cache mutex poisoned");
        let key = signal.dedupe_key();
        if cache.is_duplicate(&key) {
            return false;
        }
        cache.signals.push(signal);
        cache.rebuild_buckets();
        true
    }

    /// Remove signals past their retention window for `symbol`.
    pub fn prune(&self, symbol: &str, now: i64) {
        let guard = self.entry(symbol);
        let mut cache = guard.lock().expect("cache mutex poisoned");
        let cfg = &self.config;
        cache.signals.retain(|s| {
            let class = classify(s);
            let anchor = if ages_by_receive_time(class) { s.receive_time } else { s.receive_time };
            now - anchor < retention_secs(class, cfg)
        });
        cache.rebuild_buckets();
    }

    pub fn prune_all(&self, now: i64) {
        let symbols: Vec<String> = self.symbols.iter().map(|e| e.key().clone()).collect();
        for symbol in symbols {
            self.prune(&symbol, now);
        }
    }

    /// Signals still "fresh" for prompt building: within `signal_max_age`
    /// of their retention-class anchor time.
    pub fn filter_fresh(&self, symbol: &str, now: i64) -> Vec<Signal> {
        let guard = self.entry(symbol);
        let cache = guard.lock().expect("cache mutex poisoned");
        cache
            .signals
            .iter()
            .filter(|s| {
                let class = classify(s);
                let anchor = if ages_by_receive_time(class) { s.receive_time } else { s.signal_time };
                now - anchor < self.config.signal_max_age_sec
            })
            .cloned()
            .collect()
    }

    /// All signals in the window `[center-window, center+window]` via the
    /// bucket index, for O(windows) lookups instead of O(cache).
    pub fn in_window(&self, symbol: &str, center: i64, window_sec: i64) -> Vec<Signal> {
        let guard = self.entry(symbol);
        let cache = guard.lock().expect("cache mutex poisoned");
        let bucket_sec = cache.bucket_sec.max(1);
        let lo_bucket = (center - window_sec) / bucket_sec;
        let hi_bucket = (center + window_sec) / bucket_sec;
        let mut out = Vec::new();
        for bucket_id in lo_bucket..=hi_bucket {
            if let Some(indices) = cache.buckets.get(&bucket_id) {
                for &idx in indices {
                    let s = &cache.signals[idx];
                    if (s.signal_time - center).abs() <= window_sec {
                        out.push(s.clone());
                    }
                }
            }
        }
        out
    }

    /// Full snapshot for a symbol, copied out before prompt building so the
    /// lock is never held across an await point.
    pub fn snapshot(&self, symbol: &str) -> Vec<Signal> {
        let guard = self.entry(symbol);
        let cache = guard.lock().expect("cache mutex poisoned");
        cache.signals.clone()
    }

    /// All signals across all symbols, for persistence flush.
    pub fn all_signals(&self) -> Vec<Signal> {
        let mut out = Vec::new();
        for entry in self.symbols.iter() {
            let cache = entry.value().lock().expect("cache mutex poisoned");
            out.extend(cache.signals.iter().cloned());
        }
        out
    }

    /// Load signals recovered from disk. Each is re-appended through the
    /// normal dedupe path, then the whole cache is pruned — mirrors the
    /// startup recovery procedure in §4.12.
    pub fn restore(&self, signals: Vec<Signal>, now: i64) {
        for signal in signals {
            self.append(signal);
        }
        self.prune_all(now);
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, Source};

    fn sig(symbol: &str, source: Source, event: &str, t: i64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            source,
            side: Some(Side::Buy),
            signal_type: None,
            event: event.to_string(),
            confirmed: None,
            strength: None,
            tf: "m5".to_string(),
            price: Some(1.0),
            signal_time: t,
            receive_time: t,
        }
    }

    #[test]
    fn duplicate_within_window_is_rejected() {
        let cache = SignalCache::new(CacheConfig::default());
        let s1 = sig("XAUUSD", Source::Lorentzian, "trigger", 1000);
        let s2 = sig("XAUUSD", Source::Lorentzian, "trigger", 1000);
        assert!(cache.append(s1));
        assert!(!cache.append(s2));
    }

    #[test]
    fn duplicate_any_age_is_rejected() {
        let cache = SignalCache::new(CacheConfig::default());
        let s1 = sig("XAUUSD", Source::Lorentzian, "trigger", 1000);
        let s2 = sig("XAUUSD", Source::Lorentzian, "trigger", 1000);
        assert!(cache.append(s1));
        // Same key, far apart in wall time — still a duplicate per §4.2.
        assert!(!cache.append(s2));
    }

    #[test]
    fn prune_respects_retention_class() {
        let cfg = CacheConfig { zone_lookback_sec: 100, ..CacheConfig::default() };
        let cache = SignalCache::new(cfg);
        let s = sig("XAUUSD", Source::Zones, "new_zone_confirmed", 0);
        cache.append(s);
        cache.prune("XAUUSD", 50);
        assert_eq!(cache.snapshot("XAUUSD").len(), 1);
        cache.prune("XAUUSD", 200);
        assert_eq!(cache.snapshot("XAUUSD").len(), 0);
    }

    #[test]
    fn window_query_matches_linear_scan() {
        let cache = SignalCache::new(CacheConfig::default());
        for t in [0, 30, 90, 200] {
            cache.append(sig("XAUUSD", Source::QTrend, "trend_update", t));
        }
        let windowed = cache.in_window("XAUUSD", 0, 60);
        let mut times: Vec<i64> = windowed.iter().map(|s| s.signal_time).collect();
        times.sort();
        assert_eq!(times, vec![0, 30]);
    }
}
