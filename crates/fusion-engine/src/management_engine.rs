use std::sync::Arc;

use ai_oracle::{build_prompt, CloseHoldDecision, OracleKind};
use serde_json::json;
use signal_cache::Signal;
use tracing::info;
use trade_bus::{BusMessage, TrailMode, REASON_AI_FALLBACK_CLOSE, REASON_AI_FALLBACK_HOLD};

use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::state::ManagementState;

/// Schedule (or extend) the settle-window batch for a symbol with open
/// positions (§4.8.1). Any signal, regardless of type, participates. A
/// signal arriving against the held side while a window is already open is
/// reversal-like and gets its own immediate, throttle-checked decision
/// (§4.8.2) rather than waiting for the batch to settle.
pub async fn schedule_management(engine: Arc<Engine>, symbol: String, signal: Signal, now: i64) -> Outcome {
    let (should_spawn, reversal_like) = {
        let guard = engine.symbols.entry(&symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        let reversal_like = match (signal.side, state.broker.net_side) {
            (Some(side), Some(net_side)) => side != net_side,
            _ => false,
        };
        match state.management.as_mut() {
            Some(mgmt) => {
                mgmt.extend(
                    signal.clone(),
                    now,
                    engine.config.mgmt_settle_wait_sec,
                    engine.config.mgmt_last_signals_cap,
                );
                (false, reversal_like)
            }
            None => {
                state.management = Some(ManagementState::new(
                    signal.clone(),
                    now,
                    engine.config.mgmt_settle_wait_sec,
                    engine.config.entry_max_wait_sec,
                    engine.config.mgmt_last_signals_cap,
                ));
                (true, reversal_like)
            }
        }
    };

    if should_spawn {
        let engine = engine.clone();
        let symbol_for_worker = symbol.clone();
        tokio::spawn(async move {
            run_settle_worker(engine, symbol_for_worker).await;
        });
    } else if reversal_like {
        let engine = engine.clone();
        let symbol_for_call = symbol.clone();
        tokio::spawn(async move {
            let now = crate::engine::now_secs();
            let outcome = evaluate_management(&engine, &symbol_for_call, &[signal], now, false).await;
            info!(symbol = %symbol_for_call, outcome = outcome.code(), "reversal-like late signal evaluated");
        });
    }

    Outcome::Ok
}

async fn run_settle_worker(engine: Arc<Engine>, symbol: String) {
    loop {
        let due_at = {
            let guard = engine.symbols.entry(&symbol);
            let state = guard.lock().expect("symbol state mutex poisoned");
            match state.management.as_ref() {
                Some(mgmt) => mgmt.due_at,
                None => return,
            }
        };
        let now = crate::engine::now_secs();
        if due_at <= now {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs((due_at - now) as u64)).await;
    }

    let batch = {
        let guard = engine.symbols.entry(&symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.management.take()
    };
    let Some(batch) = batch else { return };
    let now = crate::engine::now_secs();
    let last_signals: Vec<_> = batch.last_signals.into();
    let outcome = evaluate_management(&engine, &symbol, &last_signals, now, true).await;
    info!(symbol, outcome = outcome.code(), "management evaluation complete");
}

enum Phase {
    Development,
    ProfitProtect,
}

/// Compute the phase hint (§4.8.2) from spread/ATR and how long the
/// position has been held.
fn compute_phase(
    spread_points: f64,
    atr_points: f64,
    breakeven_band_spread_mult: f64,
    breakeven_band_atr_mult: f64,
    profit_protect_spread_mult: f64,
    profit_protect_atr_mult: f64,
    holding_sec: i64,
    max_development_sec: i64,
    open_pnl_points: f64,
) -> (Phase, f64, f64) {
    let breakeven_band_points =
        (spread_points * breakeven_band_spread_mult).max(atr_points * breakeven_band_atr_mult);
    let profit_protect_threshold_points =
        (spread_points * profit_protect_spread_mult).max(atr_points * profit_protect_atr_mult);

    let in_profit_protect = open_pnl_points >= profit_protect_threshold_points;
    let phase = if in_profit_protect || holding_sec >= max_development_sec {
        Phase::ProfitProtect
    } else {
        Phase::Development
    };
    (phase, breakeven_band_points, profit_protect_threshold_points)
}

/// Run one CLOSE/HOLD decision over a batch of signals (§4.8.2).
/// `bypass_throttle` is set for settle-window batches, which always bypass
/// per spec; individual late signals instead check the throttle and a
/// reversal-like bypass.
pub async fn evaluate_management(
    engine: &Engine,
    symbol: &str,
    batch: &[Signal],
    now: i64,
    bypass_throttle: bool,
) -> Outcome {
    if engine.heartbeat.should_freeze(now) {
        return Outcome::BlockedHeartbeat;
    }

    let (net_side, holding_since) = {
        let guard = engine.symbols.entry(symbol);
        let state = guard.lock().expect("symbol state mutex poisoned");
        (state.broker.net_side, state.broker.holding_since)
    };
    let Some(net_side) = net_side else { return Outcome::SkipNetSideUnknown };

    if crate::engine::in_market_guard_window(now) && engine.heartbeat.is_fresh(now) {
        let message = BusMessage::Close {
            symbol: symbol.to_string(),
            reason: trade_bus::REASON_MARKET_GUARD_CLOSE.to_string(),
            trail_mode: TrailMode::Tight,
            tp_mode: TrailMode::Tight,
        };
        engine.bus.publish(message).await;
        return Outcome::BlockedMarketGuard;
    }

    let reversal_like = batch.iter().any(|s| s.side.map(|side| side != net_side).unwrap_or(false));

    if !bypass_throttle && !reversal_like {
        let guard = engine.symbols.entry(symbol);
        let state = guard.lock().expect("symbol state mutex poisoned");
        if now - state.last_mgmt_ai_call_at < engine.config.ai_close_throttle_sec {
            return Outcome::AiThrottled;
        }
    }

    let market = engine.market.get_market(symbol);
    let spread_points = market.spread_points();
    let atr_points = market.atr_points(market.atr_m5);
    let holding_sec = holding_since.map(|t| now - t).unwrap_or(0);
    // Open P&L in points is not modeled by this engine (broker-owned);
    // approximate from the heartbeat-reported side only, biasing toward
    // the conservative (not-yet-in-profit-protect) branch when unknown.
    let open_pnl_points = 0.0;

    let (phase, breakeven_band_points, profit_protect_threshold_points) = compute_phase(
        spread_points,
        atr_points,
        engine.config.breakeven_band_spread_mult,
        engine.config.breakeven_band_atr_mult,
        engine.config.profit_protect_spread_mult,
        engine.config.profit_protect_atr_mult,
        holding_sec,
        engine.config.max_development_sec,
        open_pnl_points,
    );
    let phase_name = match phase {
        Phase::Development => "development",
        Phase::ProfitProtect => "profit_protect",
    };

    let payload = json!({
        "net_side": net_side.as_str(),
        "recent_signals": batch.iter().map(|s| json!({
            "source": s.source.as_str(), "side": s.side.map(|x| x.as_str()),
            "event": s.event, "confirmed": s.confirmed.map(|c| c.as_str()),
            "signal_time": s.signal_time,
        })).collect::<Vec<_>>(),
        "phase": phase_name,
        "breakeven_band_points": breakeven_band_points,
        "profit_protect_threshold_points": profit_protect_threshold_points,
        "holding_sec": holding_sec,
        "spread_points": spread_points,
        "atr_points": atr_points,
        "freshness_sec": engine.heartbeat.last_heartbeat_at().map(|t| now - t),
    });

    {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.last_mgmt_ai_call_at = now;
    }

    let prompt = build_prompt(OracleKind::CloseHold, &payload, None);
    let response = engine.oracle.call_json(&prompt, OracleKind::CloseHold, symbol).await;

    let (decision, trail_mode, tp_mode) = match response {
        Some(response) => {
            let trail_mode = parse_trail_mode(response.value.get("trail_mode"));
            let tp_mode = parse_trail_mode(response.value.get("tp_mode"));
            match CloseHoldDecision::from_value(&response.value) {
                Ok(d) => (Some(d), trail_mode, tp_mode),
                Err(_) => {
                    let mut metrics = engine.metrics.lock().expect("metrics mutex poisoned");
                    metrics.record_ai_validation_fail(now, symbol);
                    (None, trail_mode, tp_mode)
                }
            }
        }
        None => (None, TrailMode::Normal, TrailMode::Normal),
    };

    let closed = match &decision {
        Some(d) => d.confidence >= engine.config.ai_close_min_confidence,
        None => engine.config.ai_close_fallback == "default_close",
    };

    let reason = decision
        .as_ref()
        .map(|d| d.reason.clone())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| if closed { REASON_AI_FALLBACK_CLOSE.to_string() } else { REASON_AI_FALLBACK_HOLD.to_string() });

    let message = if closed {
        BusMessage::Close { symbol: symbol.to_string(), reason, trail_mode, tp_mode }
    } else {
        BusMessage::Hold { symbol: symbol.to_string(), reason, trail_mode, tp_mode }
    };
    engine.bus.publish(message).await;

    {
        let mut metrics = engine.metrics.lock().expect("metrics mutex poisoned");
        metrics.record_mgmt_decision(now, symbol, closed);
    }
    {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.push_mgmt_event(json!({ "ts": now, "closed": closed, "phase": phase_name }));
    }

    Outcome::Ok
}

fn parse_trail_mode(value: Option<&serde_json::Value>) -> TrailMode {
    match value.and_then(|v| v.as_str()).map(|s| s.to_ascii_uppercase()) {
        Some(s) if s == "WIDE" => TrailMode::Wide,
        Some(s) if s == "TIGHT" => TrailMode::Tight,
        _ => TrailMode::Normal,
    }
}

/// Pyramid policy (§4.7.6): while management is deferred and a same-
/// direction Lorentzian trigger arrives, allow a pyramid entry if open P&L
/// is already at least half the profit-protect threshold.
pub fn pyramid_eligible(open_pnl_points: f64, profit_protect_threshold_points: f64) -> bool {
    open_pnl_points >= 0.5 * profit_protect_threshold_points
}
