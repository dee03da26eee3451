use std::collections::{HashMap, HashSet};

use signal_cache::{Confirmed, Side, Signal, Source};

pub const DEFAULT_CONFLUENCE_WINDOW_SEC: i64 = 600;

fn confirmed_weight(confirmed: Option<Confirmed>) -> f64 {
    match confirmed {
        Some(Confirmed::BarClose) => 1.0,
        Some(Confirmed::Intrabar) => 0.6,
        None => 0.8,
    }
}

fn event_weight(signal: &Signal) -> f64 {
    if signal.is_touch_event() {
        0.7
    } else {
        1.0
    }
}

fn weight(signal: &Signal) -> f64 {
    confirmed_weight(signal.confirmed) * event_weight(signal)
}

fn is_entry_trigger_or_structure(signal: &Signal) -> bool {
    use signal_cache::SignalType;
    matches!(signal.signal_type, Some(SignalType::EntryTrigger) | Some(SignalType::Structure))
}

/// Confluence stats anchored on the newest Q-Trend signal (§4.6).
#[derive(Debug, Clone)]
pub struct ConfluenceStats {
    pub anchor_source: Source,
    pub anchor_side: Side,
    pub anchor_time: i64,
    pub confirm_sources: usize,
    pub oppose_sources: usize,
    pub confirm_weight: f64,
    pub oppose_weight: f64,
    pub cancelled: bool,
}

/// Lightweight derived counts used when no Q-Trend anchor is available.
#[derive(Debug, Clone, Default)]
pub struct DerivedCounts {
    pub confirm_sources: usize,
    pub oppose_sources: usize,
}

fn pick_anchor(signals: &[Signal]) -> Option<&Signal> {
    signals
        .iter()
        .filter(|s| matches!(s.source, Source::QTrend | Source::QTrendStrong) && s.side.is_some())
        .max_by_key(|s| {
            let strong = matches!(s.source, Source::QTrendStrong) as i64;
            (s.signal_time, strong)
        })
}

/// Build confluence stats from a symbol's fresh signals. Returns `None` if
/// no Q-Trend anchor exists, in which case callers should fall back to
/// [`derived_counts`].
pub fn build_confluence_stats(
    signals: &[Signal],
    window_sec: i64,
) -> Option<ConfluenceStats> {
    let anchor = pick_anchor(signals)?;
    let anchor_side = anchor.side?;
    let anchor_time = anchor.signal_time;
    let anchor_source = anchor.source.clone();

    let mut confirm_sources: HashSet<String> = HashSet::new();
    let mut oppose_sources: HashSet<String> = HashSet::new();
    let mut confirm_weight = 0.0;
    let mut oppose_weight = 0.0;
    let mut cancelled = false;

    for signal in signals {
        if matches!(signal.source, Source::QTrend | Source::QTrendStrong) {
            // Q-Trend itself is never counted as confluence for its own anchor.
            continue;
        }
        if (signal.signal_time - anchor_time).abs() > window_sec {
            continue;
        }
        let Some(side) = signal.side else { continue };

        if side != anchor_side
            && signal.signal_time > anchor_time
            && matches!(signal.confirmed, Some(Confirmed::BarClose))
            && is_entry_trigger_or_structure(signal)
        {
            cancelled = true;
        }

        let w = weight(signal);
        if side == anchor_side {
            confirm_sources.insert(signal.source.as_str().to_string());
            confirm_weight += w;
        } else {
            oppose_sources.insert(signal.source.as_str().to_string());
            oppose_weight += w;
        }
    }

    Some(ConfluenceStats {
        anchor_source,
        anchor_side,
        anchor_time,
        confirm_sources: confirm_sources.len(),
        oppose_sources: oppose_sources.len(),
        confirm_weight,
        oppose_weight,
        cancelled,
    })
}

/// Fallback used when no Q-Trend anchor is present: unweighted unique
/// confirm/oppose source counts relative to `trigger_side`.
pub fn derived_counts(signals: &[Signal], trigger_side: Side) -> DerivedCounts {
    let mut confirm: HashMap<String, ()> = HashMap::new();
    let mut oppose: HashMap<String, ()> = HashMap::new();
    for signal in signals {
        let Some(side) = signal.side else { continue };
        if matches!(signal.source, Source::QTrend | Source::QTrendStrong) {
            continue;
        }
        if side == trigger_side {
            confirm.insert(signal.source.as_str().to_string(), ());
        } else {
            oppose.insert(signal.source.as_str().to_string(), ());
        }
    }
    DerivedCounts { confirm_sources: confirm.len(), oppose_sources: oppose.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_cache::SignalType;

    fn sig(
        source: Source,
        side: Option<Side>,
        signal_type: Option<SignalType>,
        confirmed: Option<Confirmed>,
        t: i64,
    ) -> Signal {
        Signal {
            symbol: "XAUUSD".to_string(),
            source,
            side,
            signal_type,
            event: "e".to_string(),
            confirmed,
            strength: None,
            tf: "m5".to_string(),
            price: Some(2000.0),
            signal_time: t,
            receive_time: t,
        }
    }

    #[test]
    fn no_anchor_returns_none() {
        let signals = vec![sig(Source::Fvg, Some(Side::Buy), None, None, 0)];
        assert!(build_confluence_stats(&signals, 600).is_none());
    }

    #[test]
    fn prefers_strong_qtrend_over_same_time_normal() {
        let signals = vec![
            sig(Source::QTrend, Some(Side::Buy), None, None, 100),
            sig(Source::QTrendStrong, Some(Side::Buy), None, None, 100),
        ];
        let stats = build_confluence_stats(&signals, 600).unwrap();
        assert_eq!(stats.anchor_source, Source::QTrendStrong);
    }

    #[test]
    fn qtrend_itself_never_counts_as_confluence() {
        let signals = vec![
            sig(Source::QTrend, Some(Side::Buy), None, None, 100),
            sig(Source::QTrendStrong, Some(Side::Buy), None, None, 110),
        ];
        let stats = build_confluence_stats(&signals, 600).unwrap();
        assert_eq!(stats.confirm_sources, 0);
    }

    #[test]
    fn opposite_bar_close_entry_trigger_after_anchor_cancels() {
        let signals = vec![
            sig(Source::QTrend, Some(Side::Buy), None, None, 100),
            sig(
                Source::Lorentzian,
                Some(Side::Sell),
                Some(SignalType::EntryTrigger),
                Some(Confirmed::BarClose),
                150,
            ),
        ];
        let stats = build_confluence_stats(&signals, 600).unwrap();
        assert!(stats.cancelled);
    }

    #[test]
    fn touch_events_are_weighted_down() {
        let mut touch = sig(Source::Fvg, Some(Side::Buy), None, Some(Confirmed::BarClose), 10);
        touch.event = "fvg_touch".to_string();
        let mut non_touch = touch.clone();
        non_touch.event = "fvg_formed".to_string();

        let anchor = sig(Source::QTrend, Some(Side::Buy), None, None, 0);
        let touch_stats =
            build_confluence_stats(&[anchor.clone(), touch], 600).unwrap();
        let non_touch_stats = build_confluence_stats(&[anchor, non_touch], 600).unwrap();
        assert!(touch_stats.confirm_weight < non_touch_stats.confirm_weight);
    }
}
