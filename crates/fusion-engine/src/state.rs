use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use dashmap::DashMap;
use signal_cache::{Side, Signal};

/// Per-symbol record of a not-yet-placed entry (§3 Pending Entry).
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub trigger: Signal,
    pub created_at: i64,
    pub expires_at: i64,
    pub attempts: u32,
    pub last_attempt_at: i64,
    pub last_retry_signal: Option<Signal>,
    pub is_addon: bool,
    pub is_pyramid: bool,
}

impl PendingEntry {
    pub fn new(trigger: Signal, now: i64, hard_ttl_sec: i64) -> Self {
        Self {
            trigger,
            created_at: now,
            expires_at: now + hard_ttl_sec,
            attempts: 0,
            last_attempt_at: now,
            last_retry_signal: None,
            is_addon: false,
            is_pyramid: false,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Per-symbol entry aggregation window (§3 Entry Aggregation State).
#[derive(Debug, Clone)]
pub struct AggregationState {
    pub created_at: i64,
    pub due_at: i64,
    pub max_due_at: i64,
    pub trigger: Signal,
    pub trigger_count: u32,
}

impl AggregationState {
    pub fn new(trigger: Signal, now: i64, wait_sec: i64, max_wait_sec: i64) -> Self {
        let max_due_at = now + max_wait_sec;
        Self {
            created_at: now,
            due_at: (now + wait_sec).min(max_due_at),
            max_due_at,
            trigger,
            trigger_count: 1,
        }
    }

    /// Slide `due_at` forward without exceeding `max_due_at` (monotone
    /// aggregation-due law, §8).
    pub fn extend(&mut self, now: i64, wait_sec: i64) {
        let candidate = (now + wait_sec).min(self.max_due_at);
        if candidate > self.due_at {
            self.due_at = candidate;
        }
        self.trigger_count += 1;
    }
}

/// Per-symbol management settle window (§3 Pending Management State).
#[derive(Debug, Clone)]
pub struct ManagementState {
    pub created_at: i64,
    pub due_at: i64,
    pub max_due_at: i64,
    pub last_signal: Signal,
    pub last_signals: VecDeque<Signal>,
}

impl ManagementState {
    pub fn new(signal: Signal, now: i64, wait_sec: i64, max_wait_sec: i64, ring_cap: usize) -> Self {
        let max_due_at = now + max_wait_sec;
        let mut ring = VecDeque::with_capacity(ring_cap.max(1));
        ring.push_back(signal.clone());
        Self {
            created_at: now,
            due_at: (now + wait_sec).min(max_due_at),
            max_due_at,
            last_signal: signal,
            last_signals: ring,
        }
    }

    pub fn extend(&mut self, signal: Signal, now: i64, wait_sec: i64, ring_cap: usize) {
        let candidate = (now + wait_sec).min(self.max_due_at);
        if candidate > self.due_at {
            self.due_at = candidate;
        }
        self.last_signal = signal.clone();
        self.last_signals.push_back(signal);
        while self.last_signals.len() > ring_cap.max(1) {
            self.last_signals.pop_front();
        }
    }
}

/// Per-symbol processing lock (§3 Entry Processing Lock). Auto-unlocked
/// after `max_hold_sec` so a stuck evaluator never wedges a symbol shut.
#[derive(Debug, Clone)]
pub struct EntryLock {
    pub acquired_at: i64,
    pub context: String,
}

/// Per-symbol add-on counters, reset on position close or side flip
/// (§3 Add-on Session).
#[derive(Debug, Clone, Default)]
pub struct AddOnSession {
    pub side: Option<Side>,
    pub count: u32,
    pub updated_at: i64,
}

/// Last-seen broker state derived from heartbeat payloads (§6.3): how many
/// positions are open and which side they net to, plus the last order/close
/// timestamps the gates need for cooldown math.
#[derive(Debug, Clone, Default)]
pub struct BrokerState {
    pub positions_open: i64,
    pub net_side: Option<Side>,
    pub last_order_sent_at: i64,
    pub holding_since: Option<i64>,
}

pub fn broker_state_from_payload(payload: &serde_json::Value, now: i64, previous: &BrokerState) -> BrokerState {
    let positions_open = payload.get("positions").and_then(|v| v.as_i64()).unwrap_or(previous.positions_open);
    let net_side = payload
        .get("net_side")
        .and_then(|v| v.as_str())
        .and_then(Side::parse)
        .or(previous.net_side);
    let holding_since = if positions_open > 0 {
        previous.holding_since.or(Some(now))
    } else {
        None
    };
    BrokerState { positions_open, net_side, last_order_sent_at: previous.last_order_sent_at, holding_since }
}

/// Per-symbol processed-trigger dedupe set, TTL-pruned on access (§3
/// Processed-Trigger Set).
#[derive(Default)]
pub struct ProcessedTriggerSet {
    processed_at: HashMap<String, i64>,
}

impl ProcessedTriggerSet {
    pub fn is_processed(&mut self, key: &str, now: i64, ttl_sec: i64) -> bool {
        self.prune(now, ttl_sec);
        self.processed_at.contains_key(key)
    }

    pub fn mark_processed(&mut self, key: String, now: i64) {
        self.processed_at.insert(key, now);
    }

    pub fn processed_at_contains(&self, key: &str) -> bool {
        self.processed_at.contains_key(key)
    }

    fn prune(&mut self, now: i64, ttl_sec: i64) {
        self.processed_at.retain(|_, at| now - *at < ttl_sec);
    }
}

/// All per-symbol mutable engine state, one entry per symbol, each
/// serialized by its own mutex — the same per-symbol-isolation shape used
/// throughout the rest of the crate family.
#[derive(Default)]
pub struct SymbolState {
    pub pending_entry: Option<PendingEntry>,
    pub aggregation: Option<AggregationState>,
    pub management: Option<ManagementState>,
    pub entry_lock: Option<EntryLock>,
    pub addon: AddOnSession,
    pub broker: BrokerState,
    pub processed: ProcessedTriggerSet,
    pub ai_throttle: HashMap<String, i64>,
    pub last_mgmt_ai_call_at: i64,
    pub recent_entry_events: VecDeque<serde_json::Value>,
    pub recent_mgmt_events: VecDeque<serde_json::Value>,
}

const STATUS_RING_CAP: usize = 20;

impl SymbolState {
    pub fn push_entry_event(&mut self, event: serde_json::Value) {
        self.recent_entry_events.push_back(event);
        while self.recent_entry_events.len() > STATUS_RING_CAP {
            self.recent_entry_events.pop_front();
        }
    }

    pub fn push_mgmt_event(&mut self, event: serde_json::Value) {
        self.recent_mgmt_events.push_back(event);
        while self.recent_mgmt_events.len() > STATUS_RING_CAP {
            self.recent_mgmt_events.pop_front();
        }
    }
}

/// Registry of per-symbol state, lazily created on first touch.
#[derive(Default)]
pub struct SymbolRegistry {
    symbols: DashMap<String, Mutex<SymbolState>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, symbol: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<SymbolState>> {
        self.symbols.entry(symbol.to_string()).or_insert_with(|| Mutex::new(SymbolState::default()));
        self.symbols.get(symbol).expect("just inserted")
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_cache::{Confirmed, SignalType, Source, Strength};

    fn trigger(t: i64) -> Signal {
        Signal {
            symbol: "XAUUSD".to_string(),
            source: Source::Lorentzian,
            side: Some(Side::Buy),
            signal_type: Some(SignalType::EntryTrigger),
            event: "entry".to_string(),
            confirmed: Some(Confirmed::BarClose),
            strength: Some(Strength::Normal),
            tf: "m5".to_string(),
            price: Some(2650.0),
            signal_time: t,
            receive_time: t,
        }
    }

    #[test]
    fn aggregation_due_is_monotone_and_capped() {
        let mut agg = AggregationState::new(trigger(0), 0, 3, 15);
        assert_eq!(agg.due_at, 3);
        agg.extend(10, 3);
        assert_eq!(agg.due_at, 13);
        agg.extend(100, 3);
        assert_eq!(agg.due_at, 15);
        assert!(agg.due_at <= agg.max_due_at);
    }

    #[test]
    fn pending_entry_hard_ttl_expires() {
        let pending = PendingEntry::new(trigger(0), 0, 600);
        assert!(!pending.is_expired(599));
        assert!(pending.is_expired(600));
    }

    #[test]
    fn processed_trigger_set_dedupes_then_ttl_prunes() {
        let mut set = ProcessedTriggerSet::default();
        assert!(!set.is_processed("k1", 0, 120));
        set.mark_processed("k1".to_string(), 0);
        assert!(set.is_processed("k1", 50, 120));
        assert!(!set.is_processed("k1", 200, 120));
    }

    #[test]
    fn management_ring_is_bounded() {
        let mut mgmt = ManagementState::new(trigger(0), 0, 3, 15, 2);
        mgmt.extend(trigger(1), 1, 3, 2);
        mgmt.extend(trigger(2), 2, 3, 2);
        assert_eq!(mgmt.last_signals.len(), 2);
        assert_eq!(mgmt.last_signals[0].signal_time, 1);
    }
}
