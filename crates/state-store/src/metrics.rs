use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::atomic_write_json;

pub const DEFAULT_MAX_EXAMPLES: usize = 80;
pub const DEFAULT_KEEP_DAYS: i64 = 14;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardStat {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl GuardStat {
    pub fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MgmtMetrics {
    pub decisions: u64,
    pub close: u64,
    pub hold: u64,
    pub phase_counts: HashMap<String, u64>,
    pub confidence_hist: HashMap<String, u64>,
    #[serde(default)]
    pub examples: VecDeque<serde_json::Value>,
}

/// Per-(day, symbol) metrics bucket (§3 Metrics). Lazily created on first
/// observation for that day/symbol pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolMetrics {
    pub webhooks: u64,
    pub duplicates: u64,
    pub entry_attempts: u64,
    pub entry_ok: u64,
    pub blocked: HashMap<String, u64>,
    pub ai_score_hist: HashMap<String, u64>,
    pub guard_stats: HashMap<String, GuardStat>,
    #[serde(default)]
    pub examples: VecDeque<serde_json::Value>,
    pub openai_calls: u64,
    pub openai_failures: u64,
    pub zmq_send_ok: u64,
    pub zmq_send_fail: u64,
    pub ai_validation_fail: u64,
    #[serde(default)]
    pub mgmt: MgmtMetrics,
}

impl SymbolMetrics {
    fn push_example(&mut self, example: serde_json::Value, max_examples: usize) {
        self.examples.push_back(example);
        while self.examples.len() > max_examples {
            self.examples.pop_front();
        }
    }
}

/// Rolling `by_day[date][symbol] -> SymbolMetrics` store (§3), pruned to
/// `keep_days` and flushed with the same atomic temp-then-rename pattern as
/// the signal cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub by_day: HashMap<String, HashMap<String, SymbolMetrics>>,
    #[serde(skip)]
    pub max_examples: usize,
    #[serde(skip)]
    pub keep_days: i64,
}

fn day_key(now: i64) -> String {
    DateTime::<Utc>::from_timestamp(now, 0).unwrap_or_default().format("%Y-%m-%d").to_string()
}

impl Metrics {
    pub fn new() -> Self {
        Self { max_examples: DEFAULT_MAX_EXAMPLES, keep_days: DEFAULT_KEEP_DAYS, ..Default::default() }
    }

    fn bucket(&mut self, now: i64, symbol: &str) -> &mut SymbolMetrics {
        self.by_day.entry(day_key(now)).or_default().entry(symbol.to_string()).or_default()
    }

    pub fn record_webhook(&mut self, now: i64, symbol: &str) {
        self.bucket(now, symbol).webhooks += 1;
    }

    pub fn record_duplicate(&mut self, now: i64, symbol: &str) {
        self.bucket(now, symbol).duplicates += 1;
    }

    pub fn record_entry_attempt(&mut self, now: i64, symbol: &str) {
        self.bucket(now, symbol).entry_attempts += 1;
    }

    pub fn record_entry_ok(&mut self, now: i64, symbol: &str) {
        self.bucket(now, symbol).entry_ok += 1;
    }

    pub fn record_blocked(&mut self, now: i64, symbol: &str, reason: &str) {
        *self.bucket(now, symbol).blocked.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn record_ai_score(&mut self, now: i64, symbol: &str, score_bucket: &str) {
        *self.bucket(now, symbol).ai_score_hist.entry(score_bucket.to_string()).or_insert(0) += 1;
    }

    pub fn observe_guard(&mut self, now: i64, symbol: &str, name: &str, value: f64) {
        self.bucket(now, symbol).guard_stats.entry(name.to_string()).or_default().observe(value);
    }

    pub fn push_example(&mut self, now: i64, symbol: &str, example: serde_json::Value) {
        let max_examples = self.max_examples.max(1);
        self.bucket(now, symbol).push_example(example, max_examples);
    }

    pub fn record_ai_validation_fail(&mut self, now: i64, symbol: &str) {
        self.bucket(now, symbol).ai_validation_fail += 1;
    }

    pub fn record_mgmt_decision(&mut self, now: i64, symbol: &str, closed: bool) {
        let mgmt = &mut self.bucket(now, symbol).mgmt;
        mgmt.decisions += 1;
        if closed {
            mgmt.close += 1;
        } else {
            mgmt.hold += 1;
        }
    }

    /// Drop days older than `keep_days` relative to `now` (§4.12).
    pub fn prune(&mut self, now: i64) {
        let keep_days = if self.keep_days <= 0 { DEFAULT_KEEP_DAYS } else { self.keep_days };
        let cutoff = DateTime::<Utc>::from_timestamp(now, 0).unwrap_or_default().date_naive()
            - chrono::Duration::days(keep_days);
        self.by_day.retain(|day, _| {
            chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").map(|d| d > cutoff).unwrap_or(true)
        });
    }

    pub fn flush(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        atomic_write_json(path, self)
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let mut metrics: Self = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        metrics.max_examples = DEFAULT_MAX_EXAMPLES;
        metrics.keep_days = DEFAULT_KEEP_DAYS;
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_created_lazily_per_day_and_symbol() {
        let mut metrics = Metrics::new();
        metrics.record_webhook(0, "XAUUSD");
        assert_eq!(metrics.by_day.len(), 1);
        let day = metrics.by_day.values().next().unwrap();
        assert_eq!(day.get("XAUUSD").unwrap().webhooks, 1);
    }

    #[test]
    fn examples_ring_is_bounded() {
        let mut metrics = Metrics::new();
        metrics.max_examples = 3;
        for i in 0..5 {
            metrics.push_example(0, "XAUUSD", serde_json::json!({"i": i}));
        }
        let day = metrics.by_day.values().next().unwrap();
        let examples = &day.get("XAUUSD").unwrap().examples;
        assert_eq!(examples.len(), 3);
        assert_eq!(examples[0]["i"], 2);
    }

    #[test]
    fn prune_drops_days_older_than_keep_days() {
        let mut metrics = Metrics::new();
        metrics.keep_days = 1;
        let old_day = 0i64;
        let now = 10 * 86_400;
        metrics.record_webhook(old_day, "XAUUSD");
        metrics.record_webhook(now, "XAUUSD");
        metrics.prune(now);
        assert_eq!(metrics.by_day.len(), 1);
    }

    #[test]
    fn guard_stat_tracks_min_max_mean() {
        let mut stat = GuardStat::default();
        stat.observe(1.0);
        stat.observe(3.0);
        stat.observe(2.0);
        assert_eq!(stat.min, 1.0);
        assert_eq!(stat.max, 3.0);
        assert_eq!(stat.mean(), 2.0);
    }

    #[test]
    fn flush_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("state-store-metrics-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("metrics.json");
        let mut metrics = Metrics::new();
        metrics.record_webhook(0, "XAUUSD");
        metrics.flush(&path).unwrap();
        let loaded = Metrics::load(&path).unwrap();
        assert_eq!(loaded.by_day.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
