use std::sync::Arc;

use signal_cache::{Signal, SignalType, Source};

use crate::engine::Engine;
use crate::entry_engine;
use crate::management_engine;
use crate::outcome::Outcome;

/// The HTTP-facing response to a webhook: either a literal routing message
/// ("Entry deferred", "Mgmt deferred", "Stored", ...) or a blocked/outcome
/// code's own status and message (§6.1, §7).
pub struct DispatchResponse {
    pub status: u16,
    pub message: String,
}

impl DispatchResponse {
    fn text(status: u16, message: &str) -> Self {
        Self { status, message: message.to_string() }
    }

    fn outcome(outcome: Outcome) -> Self {
        Self { status: outcome.http_status(), message: outcome.message().to_string() }
    }
}

fn is_lorentzian_trigger(signal: &Signal) -> bool {
    matches!(signal.signal_type, Some(SignalType::EntryTrigger)) && matches!(signal.source, Source::Lorentzian)
}

/// Route a normalized, already-cached signal (§4.14). Runs after C2/C3 have
/// already been updated by the caller.
pub async fn dispatch(engine: Arc<Engine>, signal: Signal, now: i64) -> DispatchResponse {
    // Step 1: heartbeat freeze short-circuit. This is routine operation
    // under a stale feed, not a pipeline error, so it answers 200 rather
    // than the 503 a mid-evaluation heartbeat gate returns.
    if engine.heartbeat.should_freeze(now) {
        return DispatchResponse::text(200, "Frozen by heartbeat");
    }

    let (positions_open, has_unprocessed_trigger) = {
        let guard = engine.symbols.entry(&signal.symbol);
        let state = guard.lock().expect("symbol state mutex poisoned");
        let unprocessed = is_lorentzian_trigger(&signal)
            && !state.processed.processed_at_contains(&entry_engine::trigger_dedupe_key(&signal));
        (state.broker.positions_open, unprocessed)
    };

    // Step 2: positions open — defer management, consider pyramid.
    if positions_open > 0 {
        management_engine::schedule_management(engine.clone(), signal.symbol.clone(), signal.clone(), now)
            .await;
        if has_unprocessed_trigger {
            maybe_schedule_pyramid(&engine, &signal, now).await;
        }
        return DispatchResponse::text(200, "Mgmt deferred");
    }

    // Step 3: flat positions, fresh Lorentzian trigger — start the entry pipeline.
    if is_lorentzian_trigger(&signal) {
        let key = entry_engine::trigger_dedupe_key(&signal);
        let already_processed = {
            let guard = engine.symbols.entry(&signal.symbol);
            let mut state = guard.lock().expect("symbol state mutex poisoned");
            state.processed.is_processed(&key, now, engine.config.dedupe_window_sec.max(3600))
        };
        if already_processed {
            return DispatchResponse::outcome(Outcome::TriggerAlreadyProcessed);
        }

        let locked = {
            let guard = engine.symbols.entry(&signal.symbol);
            let state = guard.lock().expect("symbol state mutex poisoned");
            state
                .entry_lock
                .as_ref()
                .map(|lock| now - lock.acquired_at < engine.config.entry_lock_max_hold_sec)
                .unwrap_or(false)
        };
        if locked {
            return DispatchResponse::outcome(Outcome::EntryLocked);
        }

        entry_engine::schedule_entry(engine, signal.symbol.clone(), signal, now).await;
        return DispatchResponse::text(200, "Entry deferred");
    }

    // Step 4: delayed re-evaluation for everything else.
    if engine.config.delayed_entry_enabled {
        if let Some(outcome) = entry_engine::try_delayed_reeval(&engine, &signal.symbol, &signal, now).await {
            return DispatchResponse::outcome(outcome);
        }
    }

    // Step 5: no pipeline applies.
    let message = match signal.signal_type {
        Some(SignalType::Context) => "Context stored",
        _ => "Stored",
    };
    DispatchResponse::text(200, message)
}

/// Pyramid consideration (§4.7.6). Open P&L in points is broker-owned state
/// not surfaced over the heartbeat bus (§6.3 only carries `positions` and
/// `net_side`), so this conservatively treats P&L as unknown/zero until the
/// execution process is extended to report it — meaning pyramiding never
/// fires today, but the gate is wired so it activates the moment that field
/// exists.
async fn maybe_schedule_pyramid(engine: &Arc<Engine>, signal: &Signal, now: i64) {
    let market = engine.market.get_market(&signal.symbol);
    let atr_points = market.atr_points(market.atr_m5);
    let spread_points = market.spread_points();
    let profit_protect_threshold_points =
        (spread_points * engine.config.profit_protect_spread_mult).max(atr_points * engine.config.profit_protect_atr_mult);

    let open_pnl_points = 0.0;
    if !management_engine::pyramid_eligible(open_pnl_points, profit_protect_threshold_points) {
        return;
    }

    let mut pyramid_trigger = signal.clone();
    let engine = engine.clone();
    let symbol = signal.symbol.clone();
    let guard = engine.symbols.entry(&symbol);
    {
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        if state.pending_entry.is_none() {
            let mut pending = crate::state::PendingEntry::new(
                pyramid_trigger.clone(),
                now,
                engine.config.delayed_entry_hard_ttl_sec,
            );
            pending.is_pyramid = true;
            state.pending_entry = Some(pending);
        }
    }
    drop(guard);
    pyramid_trigger.signal_type = Some(SignalType::EntryTrigger);
    entry_engine::schedule_entry(engine, symbol, pyramid_trigger, now).await;
}
