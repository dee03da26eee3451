use std::sync::Arc;

use ai_oracle::{build_prompt, EntryScore, OracleKind};
use confluence_window::{aggregate_window, build_confluence_stats, derived_counts};
use serde_json::json;
use signal_cache::{Side, Signal, Source};
use tracing::{info, warn};
use trade_bus::{BusMessage, OrderAction};

use crate::engine::{in_market_guard_window, Engine};
use crate::outcome::Outcome;
use crate::state::{AggregationState, PendingEntry};

/// Dedupe key for gate 1 (§4.7.2): symbol, side, tf, source, event,
/// signal_time, price — `receive_time` is deliberately excluded so two
/// near-simultaneous webhooks for the same underlying event collide.
pub fn trigger_dedupe_key(signal: &Signal) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{:.3}",
        signal.symbol,
        signal.side.map(|s| s.as_str()).unwrap_or(""),
        signal.tf,
        signal.source.as_str(),
        signal.event,
        signal.signal_time,
        signal.price.unwrap_or(0.0),
    )
}

/// Throttle key for the AI entry gate (§4.7.4): symbol+action+source+event+
/// signal_time at millisecond resolution.
fn ai_throttle_key(signal: &Signal, action: &str) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        signal.symbol,
        action,
        signal.source.as_str(),
        signal.event,
        signal.signal_time * 1000,
    )
}

/// Entry point for a fresh Lorentzian trigger (§4.7.1 IDLE transition /
/// AGGREGATING extension). Upserts pending state and ensures exactly one
/// worker task is running for this symbol.
pub async fn schedule_entry(engine: Arc<Engine>, symbol: String, trigger: Signal, now: i64) -> Outcome {
    let should_spawn = {
        let guard = engine.symbols.entry(&symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");

        if state.pending_entry.is_none() {
            state.pending_entry =
                Some(PendingEntry::new(trigger.clone(), now, engine.config.delayed_entry_hard_ttl_sec));
        }

        match state.aggregation.as_mut() {
            Some(agg) => {
                agg.extend(now, engine.config.entry_post_signal_wait_sec);
                false
            }
            None => {
                state.aggregation = Some(AggregationState::new(
                    trigger,
                    now,
                    engine.config.entry_post_signal_wait_sec,
                    engine.config.entry_max_wait_sec,
                ));
                true
            }
        }
    };

    if should_spawn {
        let engine = engine.clone();
        let symbol_for_worker = symbol.clone();
        tokio::spawn(async move {
            run_aggregation_worker(engine, symbol_for_worker).await;
        });
    }

    Outcome::Ok
}

/// One-shot worker task per (symbol, "entry") — sleeps until `due_at`,
/// re-checking in case a later trigger slid it forward, then evaluates
/// exactly once (§4.7.1, §5 "one worker per symbol").
async fn run_aggregation_worker(engine: Arc<Engine>, symbol: String) {
    loop {
        let due_at = {
            let guard = engine.symbols.entry(&symbol);
            let mut state = guard.lock().expect("symbol state mutex poisoned");
            match state.aggregation.as_ref() {
                Some(agg) => agg.due_at,
                None => return,
            }
        };
        let now = crate::engine::now_secs();
        if due_at <= now {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs((due_at - now) as u64)).await;
    }

    let trigger = {
        let guard = engine.symbols.entry(&symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.aggregation.take().map(|agg| agg.trigger)
    };

    let Some(trigger) = trigger else { return };
    let now = crate::engine::now_secs();
    let outcome = evaluate_entry(&engine, &symbol, &trigger, false, now).await;
    info!(symbol, outcome = outcome.code(), "entry evaluation complete");
}

fn acquire_lock(engine: &Engine, symbol: &str, now: i64, context: &str) -> bool {
    let guard = engine.symbols.entry(symbol);
    let mut state = guard.lock().expect("symbol state mutex poisoned");
    if let Some(lock) = &state.entry_lock {
        if now - lock.acquired_at < engine.config.entry_lock_max_hold_sec {
            return false;
        }
    }
    state.entry_lock = Some(crate::state::EntryLock { acquired_at: now, context: context.to_string() });
    true
}

fn release_lock(engine: &Engine, symbol: &str) {
    let guard = engine.symbols.entry(symbol);
    let mut state = guard.lock().expect("symbol state mutex poisoned");
    state.entry_lock = None;
}

/// Run the full gate pipeline (§4.7.2) plus evidence assembly, AI gate, and
/// order publication for one trigger. `is_delayed` bypasses the AI throttle
/// per §4.7.5.
pub async fn evaluate_entry(
    engine: &Engine,
    symbol: &str,
    trigger: &Signal,
    is_delayed: bool,
    now: i64,
) -> Outcome {
    let dedupe_key = trigger_dedupe_key(trigger);

    // Gate 1: dedupe.
    {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        if state.processed.is_processed(&dedupe_key, now, engine.config.dedupe_window_sec.max(3600)) {
            return record(engine, symbol, now, Outcome::TriggerAlreadyProcessed);
        }
    }

    // Gate 2: processing lock.
    if !acquire_lock(engine, symbol, now, "entry_evaluation") {
        return record(engine, symbol, now, Outcome::EntryLocked);
    }

    let outcome = evaluate_entry_locked(engine, symbol, trigger, is_delayed, &dedupe_key, now).await;
    release_lock(engine, symbol);
    record(engine, symbol, now, outcome)
}

async fn evaluate_entry_locked(
    engine: &Engine,
    symbol: &str,
    trigger: &Signal,
    is_delayed: bool,
    dedupe_key: &str,
    now: i64,
) -> Outcome {
    // Gate 3: invalid side.
    let Some(trigger_side) = trigger.side else { return Outcome::InvalidTrigger };

    // Gate 4: heartbeat.
    if !engine.heartbeat.is_fresh(now) {
        return Outcome::BlockedHeartbeat;
    }

    // Gate 5: market guard.
    if in_market_guard_window(now) {
        return Outcome::BlockedMarketGuard;
    }

    // Gate 6: positions-open / add-on policy.
    let is_addon = {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");

        if state.broker.positions_open == 0 && state.addon.count > 0 {
            state.addon = Default::default();
        }

        if state.broker.positions_open > 0 {
            let Some(net_side) = state.broker.net_side else {
                return Outcome::SkipNetSideUnknown;
            };
            if net_side != trigger_side {
                return Outcome::SkipPositionOpen;
            }
            if state.addon.count >= engine.config.addon_session_cap {
                return Outcome::SkipAddonLimit;
            }
            true
        } else {
            false
        }
    };

    let market = engine.market.get_market(symbol);

    // Gate 7: market-data sanity.
    if market.spread <= 0.0 {
        return Outcome::BlockedNoSpread;
    }
    let spread_points = market.spread_points();
    if spread_points >= engine.config.spread_hard_cap_points {
        return Outcome::BlockedSpread;
    }

    let atr_eff = market.atr_effective(engine.config.atr_floor_mult, engine.config.atr_spike_cap_mult);
    let atr_points = market.atr_points(atr_eff);
    let atr_to_spread = if spread_points > 0.0 { atr_points / spread_points } else { 0.0 };

    // Gate 8: spread vs ATR.
    if atr_points > 0.0 {
        let ratio = spread_points / atr_points;
        if ratio > engine.config.spread_max_atr_ratio && atr_to_spread < engine.config.spread_vs_atr_soft_min {
            return Outcome::BlockedSpreadVsAtr;
        }
    }

    // Gate 9: LRR hard guards.
    if atr_to_spread < engine.config.lrr_ev_hard_min {
        return Outcome::LrrBlockedEv;
    }
    if market.spread > market.spread_median * engine.config.lrr_spread_spike_median_mult {
        return Outcome::LrrBlockedSpreadSpike;
    }
    let mid_price = (market.bid + market.ask) / 2.0;
    if let Some(sma) = market.sma_m15_20 {
        if atr_eff > 0.0 && (mid_price - sma).abs() / atr_eff >= engine.config.lrr_dist_hard_reject {
            return Outcome::LrrBlockedDist;
        }
    }
    if market.atr_24h_avg > 0.0 && market.atr_m5 / market.atr_24h_avg >= engine.config.lrr_vol_panic_ratio {
        return Outcome::LrrBlockedPanicVol;
    }

    // Gate 10: cooldown.
    {
        let guard = engine.symbols.entry(symbol);
        let state = guard.lock().expect("symbol state mutex poisoned");
        if now - state.broker.last_order_sent_at < engine.config.entry_cooldown_sec {
            return Outcome::BlockedCooldown;
        }
    }

    // Gate 11: dynamic drift guard.
    let drift_point = if market.point <= 0.01 { 0.10 } else { market.point };
    if let Some(trigger_price) = trigger.price {
        let drift_points = (mid_price - trigger_price).abs() / drift_point;
        let limit_points = (atr_eff * engine.config.drift_limit_atr_mult / drift_point)
            .clamp(engine.config.drift_min_points, engine.config.drift_max_points);
        if engine.config.drift_hard_block && drift_points > limit_points {
            return Outcome::BlockedPriceDrift;
        }
    }

    let drift_points = trigger.price.map(|p| (mid_price - p).abs() / drift_point).unwrap_or(0.0);
    {
        let mut metrics = engine.metrics.lock().expect("metrics mutex poisoned");
        metrics.observe_guard(now, symbol, "atr_to_spread", atr_to_spread);
        metrics.observe_guard(now, symbol, "drift_points", drift_points);
        metrics.push_example(
            now,
            symbol,
            json!({ "atr_to_spread": atr_to_spread, "drift_points": drift_points, "atr_points": atr_points }),
        );
    }

    // Evidence assembly (§4.7.3).
    let fresh_signals = engine.cache.filter_fresh(symbol, now);
    let window_sec = engine.config.confluence_window_sec;
    let window = aggregate_window(&fresh_signals, symbol, trigger.signal_time, trigger_side, window_sec);
    let qtrend_ctx = engine.qtrend.get(symbol, Some(&trigger.tf), now, true);
    let confluence = build_confluence_stats(&fresh_signals, window_sec);
    let derived = derived_counts(&fresh_signals, trigger_side);

    let strong_aligned = qtrend_ctx
        .as_ref()
        .map(|c| matches!(c.strength, signal_cache::Strength::Strong) && c.side == trigger_side)
        .unwrap_or(false);
    let min_score = if is_addon {
        engine.config.addon_min_ai_score
    } else if strong_aligned {
        engine.config.ai_entry_min_score_strong_aligned
    } else {
        engine.config.ai_entry_min_score
    };

    let payload = json!({
        "trigger": {
            "symbol": trigger.symbol,
            "side": trigger_side.as_str(),
            "source": trigger.source.as_str(),
            "event": trigger.event,
            "price": trigger.price,
            "signal_time": trigger.signal_time,
            "is_addon": is_addon,
        },
        "qtrend": qtrend_ctx.as_ref().map(|c| json!({
            "side": c.side.as_str(),
            "strength": c.strength.as_str(),
            "updated_at": c.updated_at,
        })),
        "window": {
            "aligned": window.aligned.len(),
            "opposed": window.opposed.len(),
            "neutral": window.neutral.len(),
            "aligned_total": window.aligned_total,
            "opposed_total": window.opposed_total,
        },
        "confluence": confluence.as_ref().map(|c| json!({
            "confirm_sources": c.confirm_sources,
            "oppose_sources": c.oppose_sources,
            "confirm_weight": c.confirm_weight,
            "oppose_weight": c.oppose_weight,
            "cancelled": c.cancelled,
        })),
        "derived_counts": { "confirm": derived.confirm_sources, "oppose": derived.oppose_sources },
        "market": {
            "bid": market.bid, "ask": market.ask, "spread_points": spread_points,
            "atr_effective": atr_eff, "atr_to_spread": atr_to_spread,
            "sma_m15_20": market.sma_m15_20, "sma_slope": format!("{:?}", market.sma_slope),
        },
        "price_drift_points": drift_points,
        "freshness_sec": engine.heartbeat.last_heartbeat_at().map(|t| now - t),
    });

    // AI gate (§4.7.4).
    let action = if trigger_side == Side::Buy { "buy" } else { "sell" };
    let throttle_key = ai_throttle_key(trigger, action);
    if !is_delayed {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        if let Some(last) = state.ai_throttle.get(&throttle_key) {
            if now - last < engine.config.ai_entry_throttle_sec {
                return Outcome::AiThrottled;
            }
        }
        state.ai_throttle.insert(throttle_key, now);
    }

    let prompt = build_prompt(OracleKind::EntryScore, &payload, None);
    let response = engine.oracle.call_json(&prompt, OracleKind::EntryScore, symbol).await;
    let Some(response) = response else {
        return Outcome::BlockedAiNoScore;
    };
    let score = match EntryScore::from_value(&response.value) {
        Ok(score) => score,
        Err(err) => {
            warn!(symbol, error = %err.0, "entry score failed schema validation");
            return Outcome::BlockedAiNoScore;
        }
    };
    if score.confluence_score < min_score {
        return if is_addon { Outcome::BlockedAddonAi } else { Outcome::BlockedAiScore };
    }

    // Order publication (§4.7.7).
    if !engine.heartbeat.is_fresh(crate::engine::now_secs()) {
        return Outcome::BlockedHeartbeat;
    }

    let sweep_extreme = match trigger_side {
        Side::Buy => market.swing_low.unwrap_or(mid_price),
        Side::Sell => market.swing_high.unwrap_or(mid_price),
    };
    let reason =
        response.value.get("reason").and_then(|v| v.as_str()).unwrap_or("confluence_score").to_string();
    let message = BusMessage::Order {
        action: if trigger_side == Side::Buy { OrderAction::Buy } else { OrderAction::Sell },
        symbol: symbol.to_string(),
        atr: atr_eff,
        sweep_extreme,
        multiplier: score.lot_multiplier.clamp(0.5, 2.0),
        reason,
        ai_confidence: score.confluence_score as i64,
        ai_reason: response.value.get("reason").and_then(|v| v.as_str()).unwrap_or("").to_string(),
    };
    engine.bus.publish(message).await;

    {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.processed.mark_processed(dedupe_key.to_string(), now);
        state.broker.last_order_sent_at = now;
        if is_addon {
            state.addon.count += 1;
            state.addon.side = Some(trigger_side);
            state.addon.updated_at = now;
        }
        state.pending_entry = None;
    }

    Outcome::Ok
}

fn record(engine: &Engine, symbol: &str, now: i64, outcome: Outcome) -> Outcome {
    let mut metrics = engine.metrics.lock().expect("metrics mutex poisoned");
    if outcome == Outcome::Ok {
        metrics.record_entry_ok(now, symbol);
    } else {
        metrics.record_blocked(now, symbol, outcome.code());
    }
    drop(metrics);
    let guard = engine.symbols.entry(symbol);
    let mut state = guard.lock().expect("symbol state mutex poisoned");
    state.push_entry_event(json!({ "ts": now, "outcome": outcome.code() }));
    outcome
}

/// Delayed re-evaluation entry point (§4.7.5): called by the dispatcher for
/// any signal that is not itself a fresh Lorentzian trigger.
pub async fn try_delayed_reeval(engine: &Engine, symbol: &str, signal: &Signal, now: i64) -> Option<Outcome> {
    if !engine.config.delayed_entry_enabled {
        return None;
    }

    let pending_trigger = {
        let guard = engine.symbols.entry(symbol);
        let state = guard.lock().expect("symbol state mutex poisoned");
        let pending = state.pending_entry.as_ref()?;
        let key = trigger_dedupe_key(&pending.trigger);
        if state.processed.processed_at_contains(&key) {
            return None;
        }
        pending.trigger.clone()
    };

    // (b) source/signal_type gate.
    let source_eligible = matches!(
        signal.source,
        Source::QTrend | Source::QTrendStrong | Source::Zones | Source::Fvg | Source::Osgfc
    ) || matches!(
        signal.signal_type,
        Some(signal_cache::SignalType::Context)
            | Some(signal_cache::SignalType::Structure)
            | Some(signal_cache::SignalType::TrendFilter)
    );
    if !source_eligible {
        return None;
    }

    // (c) directional signals must match pending side.
    let Some(pending_side) = pending_trigger.side else { return None };
    if let Some(side) = signal.side {
        if side != pending_side {
            return None;
        }
    }

    // (d) touch/trend-filter confirmation requirement.
    let needs_confirmation = signal.is_touch_event()
        || matches!(signal.signal_type, Some(signal_cache::SignalType::TrendFilter));
    if needs_confirmation {
        let confirmed_ok = matches!(signal.confirmed, Some(signal_cache::Confirmed::BarClose))
            || matches!(signal.strength, Some(signal_cache::Strength::Strong));
        if !confirmed_ok {
            return None;
        }
    }

    // (e) positions flat unless pyramid.
    let positions_open = {
        let guard = engine.symbols.entry(symbol);
        let state = guard.lock().expect("symbol state mutex poisoned");
        state.broker.positions_open
    };
    let is_pyramid = {
        let guard = engine.symbols.entry(symbol);
        let state = guard.lock().expect("symbol state mutex poisoned");
        state.pending_entry.as_ref().map(|p| p.is_pyramid).unwrap_or(false)
    };
    if positions_open > 0 && !is_pyramid {
        return None;
    }

    // (f) throttle + attempts cap, reserved atomically.
    let reserved = {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        let Some(pending) = state.pending_entry.as_mut() else { return None };
        if now - pending.last_attempt_at < engine.config.delayed_entry_min_retry_interval_sec {
            return None;
        }
        if pending.attempts >= engine.config.delayed_entry_max_attempts {
            return None;
        }
        if pending.is_expired(now) {
            state.pending_entry = None;
            return None;
        }
        pending.attempts += 1;
        pending.last_attempt_at = now;
        pending.last_retry_signal = Some(signal.clone());
        true
    };
    if !reserved {
        return None;
    }

    Some(evaluate_entry(engine, symbol, &pending_trigger, true, now).await)
}
