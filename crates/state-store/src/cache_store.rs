use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use signal_cache::{sanitize_str, Signal, SignalCache};

use crate::atomic::atomic_write_json;

#[derive(Debug, Clone)]
pub struct CacheStoreConfig {
    pub path: PathBuf,
    pub flush_interval_sec: i64,
    pub flush_force_sec: i64,
}

impl CacheStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), flush_interval_sec: 5, flush_force_sec: 10 }
    }
}

/// Tracks when the signal cache was last flushed and whether it has
/// unflushed writes, so a periodic task can decide whether to flush now
/// (§4.12: cadence `CACHE_FLUSH_INTERVAL_SEC`, forced at `CACHE_FLUSH_FORCE_SEC`).
pub struct CacheFlusher {
    config: CacheStoreConfig,
    dirty: AtomicBool,
    last_flush_at: AtomicI64,
}

impl CacheFlusher {
    pub fn new(config: CacheStoreConfig, now: i64) -> Self {
        Self { config, dirty: AtomicBool::new(false), last_flush_at: AtomicI64::new(now) }
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// True if a flush should run now: either the normal cadence elapsed
    /// with pending writes, or the hard force interval elapsed regardless.
    pub fn should_flush(&self, now: i64) -> bool {
        let last = self.last_flush_at.load(Ordering::Relaxed);
        let dirty = self.dirty.load(Ordering::Relaxed);
        (dirty && now - last >= self.config.flush_interval_sec) || now - last >= self.config.flush_force_sec
    }

    /// Write the cache's full contents atomically and reset the dirty flag.
    pub fn flush(&self, cache: &SignalCache, now: i64) -> std::io::Result<()> {
        let signals = cache.all_signals();
        atomic_write_json(&self.config.path, &signals)?;
        self.dirty.store(false, Ordering::Relaxed);
        self.last_flush_at.store(now, Ordering::Relaxed);
        tracing::debug!(count = signals.len(), "signal cache flushed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

/// Load a previously-flushed signal cache file. Recovery renormalizes each
/// entry defensively (uppercase symbol, `receive_time` present) before
/// handing it to the caller for dedupe-checked restore (§4.12).
pub fn load_signal_cache(path: impl AsRef<Path>) -> std::io::Result<Vec<Signal>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let raw: Vec<Signal> = serde_json::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(raw
        .into_iter()
        .map(|mut s| {
            s.symbol = sanitize_str(&s.symbol).to_ascii_uppercase();
            if s.receive_time == 0 {
                s.receive_time = s.signal_time;
            }
            s
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_cache::{CacheConfig, Side, Source};

    fn sig(symbol: &str, t: i64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            source: Source::QTrend,
            side: Some(Side::Buy),
            signal_type: None,
            event: "trend_update".to_string(),
            confirmed: None,
            strength: None,
            tf: "m5".to_string(),
            price: Some(2000.0),
            signal_time: t,
            receive_time: t,
        }
    }

    #[test]
    fn flush_then_load_round_trips_signals() {
        let dir = std::env::temp_dir().join(format!("state-store-cache-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("signals.json");

        let cache = SignalCache::new(CacheConfig::default());
        cache.append(sig("XAUUSD", 100));
        let flusher = CacheFlusher::new(CacheStoreConfig::new(&path), 0);
        flusher.flush(&cache, 1).unwrap();

        let loaded = load_signal_cache(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "XAUUSD");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn should_flush_respects_cadence_and_force_interval() {
        let dir = std::env::temp_dir();
        let cfg = CacheStoreConfig { flush_interval_sec: 5, flush_force_sec: 10, ..CacheStoreConfig::new(dir.join("x.json")) };
        let flusher = CacheFlusher::new(cfg, 0);
        assert!(!flusher.should_flush(3));
        flusher.mark_dirty();
        assert!(!flusher.should_flush(3));
        assert!(flusher.should_flush(6));
        // Even without being marked dirty, the force interval still fires.
        let flusher2 = CacheFlusher::new(CacheStoreConfig { flush_interval_sec: 5, flush_force_sec: 10, ..CacheStoreConfig::new(dir.join("y.json")) }, 0);
        assert!(flusher2.should_flush(11));
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let loaded = load_signal_cache("/nonexistent/path/signals.json").unwrap();
        assert!(loaded.is_empty());
    }
}
