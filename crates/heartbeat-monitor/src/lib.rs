use std::sync::RwLock;

use serde_json::Value;

/// Keys kept from a heartbeat payload (§6.3). Freshness is the only
/// semantic the core relies on; everything else is retained purely for
/// `/status` reporting.
const ALLOWED_KEYS: &[&str] = &[
    "type",
    "ts",
    "trade_server_ts",
    "gmt_ts",
    "server_gmt_offset_sec",
    "symbol",
    "login",
    "equity",
    "balance",
    "positions",
    "net_side",
    "halt",
    "magic",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleMode {
    /// Stale heartbeats are reported but do not block the pipeline.
    Ignore,
    /// Stale heartbeats cause C7/C8 to short-circuit to "Frozen by heartbeat".
    Freeze,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub timeout_sec: i64,
    pub stale_mode: StaleMode,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { enabled: true, timeout_sec: 90, stale_mode: StaleMode::Freeze }
    }
}

#[derive(Default)]
struct State {
    last_heartbeat_at: Option<i64>,
    last_payload: Value,
}

/// Tracks heartbeat freshness and the last allowlisted payload. Ingestion
/// and freshness checks are cheap enough to share a single `RwLock`
/// (reads vastly outnumber writes — one heartbeat every few seconds against
/// a freshness check on every gated request).
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: RwLock<State>,
}

fn sanitize_payload(payload: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Value::Object(map) = payload {
        for key in ALLOWED_KEYS {
            if let Some(v) = map.get(*key) {
                out.insert((*key).to_string(), v.clone());
            }
        }
    }
    Value::Object(out)
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config, state: RwLock::new(State::default()) }
    }

    /// Record an inbound heartbeat. `now` is the receive time.
    pub fn ingest(&self, payload: &Value, now: i64) {
        let sanitized = sanitize_payload(payload);
        let mut state = self.state.write().expect("heartbeat state lock poisoned");
        state.last_heartbeat_at = Some(now);
        state.last_payload = sanitized;
        tracing::debug!(now, "heartbeat ingested");
    }

    /// `¬enabled ∨ (now − last ≤ timeout)` (§4.11).
    pub fn is_fresh(&self, now: i64) -> bool {
        if !self.config.enabled {
            return true;
        }
        let state = self.state.read().expect("heartbeat state lock poisoned");
        match state.last_heartbeat_at {
            Some(last) => now - last <= self.config.timeout_sec,
            None => false,
        }
    }

    pub fn should_freeze(&self, now: i64) -> bool {
        self.config.stale_mode == StaleMode::Freeze && !self.is_fresh(now)
    }

    pub fn last_heartbeat_at(&self) -> Option<i64> {
        self.state.read().expect("heartbeat state lock poisoned").last_heartbeat_at
    }

    pub fn last_payload(&self) -> Value {
        self.state.read().expect("heartbeat state lock poisoned").last_payload.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disabled_monitor_is_always_fresh() {
        let monitor = HeartbeatMonitor::new(HeartbeatConfig { enabled: false, ..HeartbeatConfig::default() });
        assert!(monitor.is_fresh(1_000_000));
    }

    #[test]
    fn no_heartbeat_ever_received_is_not_fresh() {
        let monitor = HeartbeatMonitor::new(HeartbeatConfig::default());
        assert!(!monitor.is_fresh(100));
    }

    #[test]
    fn heartbeat_within_timeout_is_fresh() {
        let monitor = HeartbeatMonitor::new(HeartbeatConfig { timeout_sec: 90, ..HeartbeatConfig::default() });
        monitor.ingest(&json!({"type": "HEARTBEAT", "ts": 0}), 0);
        assert!(monitor.is_fresh(80));
        assert!(!monitor.is_fresh(200));
    }

    #[test]
    fn freeze_mode_reports_freeze_only_when_stale() {
        let monitor = HeartbeatMonitor::new(HeartbeatConfig {
            timeout_sec: 10,
            stale_mode: StaleMode::Freeze,
            ..HeartbeatConfig::default()
        });
        monitor.ingest(&json!({"ts": 0}), 0);
        assert!(!monitor.should_freeze(5));
        assert!(monitor.should_freeze(50));
    }

    #[test]
    fn ignore_mode_never_freezes() {
        let monitor = HeartbeatMonitor::new(HeartbeatConfig {
            timeout_sec: 10,
            stale_mode: StaleMode::Ignore,
            ..HeartbeatConfig::default()
        });
        assert!(!monitor.should_freeze(1_000));
    }

    #[test]
    fn payload_sanitization_drops_unlisted_keys() {
        let monitor = HeartbeatMonitor::new(HeartbeatConfig::default());
        monitor.ingest(&json!({"ts": 0, "secret_token": "abc", "equity": 1000.0}), 0);
        let payload = monitor.last_payload();
        assert!(payload.get("equity").is_some());
        assert!(payload.get("secret_token").is_none());
    }
}
