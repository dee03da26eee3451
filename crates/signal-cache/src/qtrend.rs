use dashmap::DashMap;

use crate::types::{Confirmed, Side, Signal, Source, Strength};

#[derive(Debug, Clone)]
pub struct QTrendContext {
    pub side: Side,
    pub strength: Strength,
    pub updated_at: i64,
    pub price: Option<f64>,
    pub confirmed: Option<Confirmed>,
    pub event: String,
    pub source: Source,
}

const UNKNOWN_TF: &str = "unknown";

/// Latest per-(symbol, tf) Q-Trend state (§4.3). One entry per key,
/// replaced on every newer Q-Trend signal; never written by non-Q-Trend
/// sources.
pub struct QTrendStore {
    max_age_sec: i64,
    entries: DashMap<(String, String), QTrendContext>,
}

impl QTrendStore {
    pub fn new(max_age_sec: i64) -> Self {
        Self { max_age_sec, entries: DashMap::new() }
    }

    /// Update from a signal iff it's Q-Trend family with a directional
    /// side. Returns `true` if the store was updated.
    pub fn update_from_signal(&self, signal: &Signal) -> bool {
        if !signal.source.is_qtrend_family() {
            return false;
        }
        let Some(side) = signal.side else { return false };
        let strength = if matches!(signal.source, Source::QTrendStrong) {
            Strength::Strong
        } else {
            signal.strength.unwrap_or(Strength::Normal)
        };
        let tf_key = if signal.tf.is_empty() { UNKNOWN_TF.to_string() } else { signal.tf.clone() };
        let key = (signal.symbol.clone(), tf_key);
        self.entries.insert(
            key,
            QTrendContext {
                side,
                strength,
                updated_at: signal.signal_time,
                price: signal.price,
                confirmed: signal.confirmed,
                event: signal.event.clone(),
                source: signal.source.clone(),
            },
        );
        true
    }

    fn fresh(&self, ctx: &QTrendContext, now: i64) -> bool {
        now - ctx.updated_at <= self.max_age_sec
    }

    /// Exact-tf match; else the "unknown"-tf entry if present; else (when
    /// `tf_fallback` is enabled) the freshest entry across all tfs for the
    /// symbol. Entries older than `max_age` are treated as absent.
    pub fn get(&self, symbol: &str, tf: Option<&str>, now: i64, tf_fallback: bool) -> Option<QTrendContext> {
        if let Some(tf) = tf {
            if let Some(ctx) = self.entries.get(&(symbol.to_string(), tf.to_string())) {
                if self.fresh(&ctx, now) {
                    return Some(ctx.clone());
                }
            }
        }
        if let Some(ctx) = self.entries.get(&(symbol.to_string(), UNKNOWN_TF.to_string())) {
            if self.fresh(&ctx, now) {
                return Some(ctx.clone());
            }
        }
        if !tf_fallback {
            return None;
        }
        self.entries
            .iter()
            .filter(|e| e.key().0 == symbol && self.fresh(e.value(), now))
            .max_by_key(|e| e.value().updated_at)
            .map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalType;

    fn qtrend_signal(symbol: &str, tf: &str, side: Side, t: i64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            source: Source::QTrend,
            side: Some(side),
            signal_type: Some(SignalType::Context),
            event: "trend_update".to_string(),
            confirmed: Some(Confirmed::BarClose),
            strength: Some(Strength::Normal),
            tf: tf.to_string(),
            price: Some(2650.0),
            signal_time: t,
            receive_time: t,
        }
    }

    #[test]
    fn only_qtrend_family_updates_the_store() {
        let store = QTrendStore::new(300);
        let mut non_qtrend = qtrend_signal("XAUUSD", "m5", Side::Buy, 0);
        non_qtrend.source = Source::Zones;
        assert!(!store.update_from_signal(&non_qtrend));
        assert!(store.get("XAUUSD", Some("m5"), 0, false).is_none());
    }

    #[test]
    fn exact_tf_match_wins_over_fallback() {
        let store = QTrendStore::new(300);
        store.update_from_signal(&qtrend_signal("XAUUSD", "m5", Side::Buy, 0));
        store.update_from_signal(&qtrend_signal("XAUUSD", "h1", Side::Sell, 0));
        let ctx = store.get("XAUUSD", Some("m5"), 10, true).unwrap();
        assert_eq!(ctx.side, Side::Buy);
    }

    #[test]
    fn stale_entries_are_treated_as_absent() {
        let store = QTrendStore::new(300);
        store.update_from_signal(&qtrend_signal("XAUUSD", "m5", Side::Buy, 0));
        assert!(store.get("XAUUSD", Some("m5"), 301, false).is_none());
        assert!(store.get("XAUUSD", Some("m5"), 300, false).is_some());
    }
}
