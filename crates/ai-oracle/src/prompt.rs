use serde_json::Value;

use crate::types::OracleKind;

pub const SYSTEM_DIRECTIVE: &str = "You are a strict trading engine. Output ONLY JSON.";

/// Optional token-control compaction (§4.9), off by default.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub max_list_items: usize,
    pub max_string_len: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self { max_list_items: 20, max_string_len: 600 }
    }
}

fn compact_value(value: &Value, cfg: &CompactionConfig) -> Value {
    match value {
        Value::Array(items) => {
            let truncated: Vec<Value> =
                items.iter().take(cfg.max_list_items).map(|v| compact_value(v, cfg)).collect();
            Value::Array(truncated)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), compact_value(v, cfg));
            }
            Value::Object(out)
        }
        Value::String(s) if s.len() > cfg.max_string_len => {
            Value::String(s.chars().take(cfg.max_string_len).collect())
        }
        other => other.clone(),
    }
}

/// Build a deterministic prompt: a leading "strict JSON only" directive
/// followed by the (optionally compacted) JSON payload (§4.9). The payload
/// must already carry the kind-specific fields the caller assembled
/// (trigger/latest_signal, Q-Trend context, window/recent signals,
/// SMA/volatility/spread/session/zones contexts, price_drift, freshness_sec,
/// local heuristic points).
pub fn build_prompt(kind: OracleKind, payload: &Value, compaction: Option<&CompactionConfig>) -> String {
    let body = match compaction {
        Some(cfg) => compact_value(payload, cfg),
        None => payload.clone(),
    };
    format!(
        "{SYSTEM_DIRECTIVE}\nRespond with a single JSON object only, no prose, no markdown fences.\nTask: {}\nPayload:\n{}",
        kind.as_str(),
        serde_json::to_string(&body).unwrap_or_default(),
    )
}
