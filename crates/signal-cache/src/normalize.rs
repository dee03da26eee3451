use serde_json::Value;

use crate::error::{NormalizeError, NormalizeResult};
use crate::types::{Confirmed, Side, Signal, SignalType, Source, Strength};

/// Maximum length (bytes) retained for any string field that ends up in
/// logs or LLM prompts. Longer values are truncated at a char boundary.
const MAX_FIELD_LEN: usize = 256;

/// `OANDA:XAUUSD` → take the suffix after `:`. A handful of broker-specific
/// aliases are folded to the canonical symbol the rest of the engine uses.
fn symbol_aliases() -> &'static [(&'static str, &'static str)] {
    &[("XAUUSD.a", "XAUUSD"), ("GOLD", "XAUUSD"), ("XAUUSDm", "XAUUSD")]
}

fn source_aliases() -> &'static [(&'static str, Source)] {
    // NB: "strong" matching is handled separately in `normalize_source`
    // before this table is consulted, since it depends on two input
    // fields (source text and the `strength` field).
    &[]
}

/// Strip control bytes and bound length. Defends log lines and LLM prompts
/// from injected escape sequences or unbounded payloads.
pub fn sanitize_str(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    if cleaned.len() <= MAX_FIELD_LEN {
        cleaned
    } else {
        cleaned.chars().take(MAX_FIELD_LEN).collect()
    }
}

fn normalize_symbol(raw: &str) -> String {
    let suffix = raw.rsplit(':').next().unwrap_or(raw);
    let upper = suffix.trim().to_ascii_uppercase();
    for (alias, canonical) in symbol_aliases() {
        if upper.eq_ignore_ascii_case(alias) {
            return canonical.to_string();
        }
    }
    upper
}

fn normalize_source(raw: &str, strength_hint: Option<&str>) -> Source {
    let lower = raw.trim().to_ascii_lowercase();
    let strength_says_strong = strength_hint
        .map(|s| s.eq_ignore_ascii_case("strong"))
        .unwrap_or(false);
    let source_says_strong = lower.contains("strong");

    if lower.contains("qtrend") || lower.contains("q-trend") || lower == "q_trend" {
        return if source_says_strong || strength_says_strong {
            Source::QTrendStrong
        } else {
            Source::QTrend
        };
    }
    match lower.as_str() {
        "luxalgo_fvg" | "fvg" => Source::Fvg,
        "zonesdetector" | "zones" => Source::Zones,
        "osgfc" => Source::Osgfc,
        "lorentzian" => Source::Lorentzian,
        _ => {
            for (alias, canonical) in source_aliases() {
                if lower == *alias {
                    return canonical.clone();
                }
            }
            Source::Other(sanitize_str(raw))
        }
    }
}

/// `60 → "h1"`, `240 → "h4"`, `1440 → "d1"`, integer minutes → `"m<n>"`.
/// Strings like `"h1"`/`"m5"` pass through lowercased; missing → `""`.
fn normalize_tf(raw: &Value) -> String {
    match raw {
        Value::Number(n) => {
            if let Some(minutes) = n.as_i64() {
                return minutes_to_tf(minutes);
            }
            String::new()
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            if let Ok(minutes) = trimmed.parse::<i64>() {
                return minutes_to_tf(minutes);
            }
            trimmed.to_ascii_lowercase()
        }
        _ => String::new(),
    }
}

fn minutes_to_tf(minutes: i64) -> String {
    match minutes {
        60 => "h1".to_string(),
        240 => "h4".to_string(),
        1440 => "d1".to_string(),
        m if m > 0 => format!("m{m}"),
        _ => String::new(),
    }
}

/// Parse order (§4.1): explicit number (ms if ≥1e12 else s) → ISO-8601
/// (assume UTC when naive) → fallback `receive_time`.
fn parse_signal_time(raw: Option<&Value>, receive_time: i64) -> i64 {
    match raw {
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_f64() {
                if v >= 1e12 {
                    return (v / 1000.0) as i64;
                }
                return v as i64;
            }
            receive_time
        }
        Some(Value::String(s)) => {
            if let Ok(v) = s.parse::<f64>() {
                if v >= 1e12 {
                    return (v / 1000.0) as i64;
                }
                return v as i64;
            }
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return dt.timestamp();
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return naive.and_utc().timestamp();
            }
            receive_time
        }
        _ => receive_time,
    }
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(k).and_then(Value::as_str))
}

fn first_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        value.get(k).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        })
    })
}

/// Normalize a raw webhook JSON body into a canonical [`Signal`].
///
/// `now` is the receive time (epoch seconds), supplied by the caller so the
/// normalizer stays a pure function of its inputs.
pub fn normalize(body: &Value, now: i64) -> NormalizeResult<Signal> {
    let symbol_raw = first_str(body, &["symbol", "ticker", "instrument", "market", "pair"])
        .ok_or(NormalizeError::MissingSymbol)?;
    let symbol = normalize_symbol(symbol_raw);
    if symbol.is_empty() {
        return Err(NormalizeError::MissingSymbol);
    }

    let strength_raw = first_str(body, &["strength"]);
    let source_raw = first_str(body, &["source"]).unwrap_or("unknown");
    let source = normalize_source(source_raw, strength_raw);

    let side_raw = first_str(body, &["side"]).or_else(|| first_str(body, &["action"]));
    let side = side_raw.and_then(Side::parse);

    let signal_type = first_str(body, &["signal_type"]).and_then(SignalType::parse);
    let confirmed = first_str(body, &["confirmed"]).and_then(Confirmed::parse);
    let strength = strength_raw.and_then(Strength::parse);

    let tf_value = body
        .get("tf")
        .or_else(|| body.get("timeframe"))
        .or_else(|| body.get("interval"))
        .cloned()
        .unwrap_or(Value::Null);
    let tf = normalize_tf(&tf_value);

    let event = first_str(body, &["event"]).map(sanitize_str).unwrap_or_default().to_ascii_lowercase();

    let price = first_f64(body, &["price", "close", "c"]);

    let time_value = body.get("time").or_else(|| body.get("timenow")).or_else(|| body.get("timestamp"));
    let signal_time = parse_signal_time(time_value, now);

    Ok(Signal {
        symbol,
        source,
        side,
        signal_type,
        event,
        confirmed,
        strength,
        tf,
        price,
        signal_time,
        receive_time: now,
    })
}
