use std::collections::HashMap;

use signal_cache::{Side, Signal, Source};

const ZONE_ALLOWED_EVENTS: &[&str] =
    &["zone_retrace_touch", "zone_touch", "new_zone_confirmed", "zone_confirmed"];
const FVG_ALLOWED_EVENTS: &[&str] = &["fvg_touch"];

const ALIGNED_CAP: usize = 30;
const OPPOSED_CAP: usize = 30;
const NEUTRAL_CAP: usize = 20;

fn is_allowed(signal: &Signal) -> bool {
    match &signal.source {
        Source::QTrend | Source::QTrendStrong => true,
        Source::Zones => ZONE_ALLOWED_EVENTS.contains(&signal.event.as_str()),
        Source::Fvg => FVG_ALLOWED_EVENTS.contains(&signal.event.as_str()),
        Source::Osgfc | Source::Lorentzian | Source::Other(_) => false,
    }
}

/// Output of a window aggregation (§4.5): signals near a trigger, deduped
/// and split by alignment with the trigger's side.
#[derive(Debug, Clone)]
pub struct WindowResult {
    pub center_ts: i64,
    pub window_sec: i64,
    pub aligned: Vec<Signal>,
    pub opposed: Vec<Signal>,
    pub neutral: Vec<Signal>,
    pub aligned_total: usize,
    pub opposed_total: usize,
    pub neutral_total: usize,
}

fn dedupe_key(signal: &Signal) -> (String, String, Option<Side>) {
    (signal.source.as_str().to_string(), signal.event.clone(), signal.side)
}

/// Aggregate signals from `symbol` around `center_ts`, within `window_sec`
/// either side, restricted to the allowlisted sources/events and split by
/// side relative to `trigger_side`.
pub fn aggregate_window(
    signals: &[Signal],
    symbol: &str,
    center_ts: i64,
    trigger_side: Side,
    window_sec: i64,
) -> WindowResult {
    let mut latest: HashMap<(String, String, Option<Side>), Signal> = HashMap::new();

    for signal in signals {
        if signal.symbol != symbol {
            continue;
        }
        if (signal.signal_time - center_ts).abs() > window_sec {
            continue;
        }
        if !is_allowed(signal) {
            continue;
        }
        let key = dedupe_key(signal);
        match latest.get(&key) {
            Some(existing) if existing.signal_time >= signal.signal_time => {}
            _ => {
                latest.insert(key, signal.clone());
            }
        }
    }

    let mut aligned = Vec::new();
    let mut opposed = Vec::new();
    let mut neutral = Vec::new();

    for signal in latest.into_values() {
        match signal.side {
            Some(side) if side == trigger_side => aligned.push(signal),
            Some(_) => opposed.push(signal),
            None => neutral.push(signal),
        }
    }

    aligned.sort_by_key(|s| std::cmp::Reverse(s.signal_time));
    opposed.sort_by_key(|s| std::cmp::Reverse(s.signal_time));
    neutral.sort_by_key(|s| std::cmp::Reverse(s.signal_time));

    let aligned_total = aligned.len();
    let opposed_total = opposed.len();
    let neutral_total = neutral.len();

    aligned.truncate(ALIGNED_CAP);
    opposed.truncate(OPPOSED_CAP);
    neutral.truncate(NEUTRAL_CAP);

    WindowResult {
        center_ts,
        window_sec,
        aligned,
        opposed,
        neutral,
        aligned_total,
        opposed_total,
        neutral_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_cache::{Confirmed, SignalType};

    fn sig(source: Source, event: &str, side: Option<Side>, t: i64) -> Signal {
        Signal {
            symbol: "XAUUSD".to_string(),
            source,
            side,
            signal_type: Some(SignalType::Context),
            event: event.to_string(),
            confirmed: Some(Confirmed::BarClose),
            strength: None,
            tf: "m5".to_string(),
            price: Some(2000.0),
            signal_time: t,
            receive_time: t,
        }
    }

    #[test]
    fn disallowed_sources_are_excluded() {
        let signals = vec![sig(Source::Lorentzian, "entry_trigger", Some(Side::Buy), 0)];
        let result = aggregate_window(&signals, "XAUUSD", 0, Side::Buy, 600);
        assert_eq!(result.aligned_total + result.opposed_total + result.neutral_total, 0);
    }

    #[test]
    fn zone_events_outside_allowlist_are_excluded() {
        let signals = vec![sig(Source::Zones, "zone_created", Some(Side::Buy), 0)];
        let result = aggregate_window(&signals, "XAUUSD", 0, Side::Buy, 600);
        assert_eq!(result.aligned_total, 0);
    }

    #[test]
    fn dedupe_keeps_latest_by_source_event_side() {
        let signals = vec![
            sig(Source::QTrend, "trend_update", Some(Side::Buy), 10),
            sig(Source::QTrend, "trend_update", Some(Side::Buy), 50),
        ];
        let result = aggregate_window(&signals, "XAUUSD", 50, Side::Buy, 600);
        assert_eq!(result.aligned.len(), 1);
        assert_eq!(result.aligned[0].signal_time, 50);
    }

    #[test]
    fn splits_by_alignment_with_trigger_side() {
        let signals = vec![
            sig(Source::QTrend, "trend_update", Some(Side::Buy), 0),
            sig(Source::QTrendStrong, "trend_update", Some(Side::Sell), 0),
            sig(Source::Fvg, "fvg_touch", None, 0),
        ];
        let result = aggregate_window(&signals, "XAUUSD", 0, Side::Buy, 600);
        assert_eq!(result.aligned_total, 1);
        assert_eq!(result.opposed_total, 1);
        assert_eq!(result.neutral_total, 1);
    }

    #[test]
    fn hard_caps_are_enforced() {
        // Dedupe is keyed on (source, event, side); vary price-irrelevant
        // fields aren't part of the key, so use distinct events to produce
        // 40 surviving entries and exercise the cap.
        let signals: Vec<Signal> = (0..40)
            .map(|i| sig(Source::QTrend, &format!("event_{i}"), Some(Side::Buy), i))
            .collect();
        let result = aggregate_window(&signals, "XAUUSD", 39, Side::Buy, 600);
        assert_eq!(result.aligned.len(), 30);
        assert_eq!(result.aligned_total, 40);
    }
}
