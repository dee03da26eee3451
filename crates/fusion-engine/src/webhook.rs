use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatcher::dispatch;
use crate::engine::{now_secs, Engine};
use crate::outcome::Outcome;
use crate::state::broker_state_from_payload;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/heartbeat", post(heartbeat_handler))
        .route("/ping", get(ping_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

fn token_from_header(headers: &HeaderMap) -> Option<String> {
    headers.get("X-Webhook-Token").and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Shared-secret check (§6.1): header token, or body `token` field when
/// `body_token_auth` is on. Returns `true` if the request is authorized.
fn check_token(engine: &Engine, headers: &HeaderMap, body: &Value) -> bool {
    let Some(expected) = engine.config.webhook_token.as_deref() else { return true };
    if token_from_header(headers).as_deref() == Some(expected) {
        return true;
    }
    if engine.config.body_token_auth {
        if let Some(token) = body.get("token").and_then(Value::as_str) {
            return token == expected;
        }
    }
    false
}

fn outcome_response(outcome: Outcome) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(outcome.http_status()).unwrap_or(StatusCode::OK);
    (status, Json(json!({ "message": outcome.message(), "outcome": outcome.code() })))
}

async fn webhook_handler(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if !check_token(&engine, &headers, &body) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized", "outcome": "unauthorized" })),
        );
    }

    let now = now_secs();
    let symbol_hint = body
        .get("symbol")
        .or_else(|| body.get("ticker"))
        .or_else(|| body.get("instrument"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();

    {
        let mut metrics = engine.metrics.lock().expect("metrics mutex poisoned");
        metrics.record_webhook(now, &symbol_hint);
    }

    let signal = match signal_cache::normalize(&body, now) {
        Ok(signal) => signal,
        Err(err) => {
            warn!(error = %err, "webhook normalization failed");
            return outcome_response(Outcome::InvalidData);
        }
    };

    if !engine.cache.append(signal.clone()) {
        let mut metrics = engine.metrics.lock().expect("metrics mutex poisoned");
        metrics.record_duplicate(now, &signal.symbol);
        return (StatusCode::OK, Json(json!({ "message": "Duplicate", "outcome": "duplicate" })));
    }
    engine.cache_flusher.mark_dirty();
    engine.qtrend.update_from_signal(&signal);

    let response = dispatch(engine, signal, now).await;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    (status, Json(json!({ "message": response.message })))
}

async fn heartbeat_handler(State(engine): State<Arc<Engine>>, Json(body): Json<Value>) -> impl IntoResponse {
    let now = now_secs();
    engine.heartbeat.ingest(&body, now);

    if let Some(symbol) = body.get("symbol").and_then(Value::as_str) {
        let guard = engine.symbols.entry(symbol);
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.broker = broker_state_from_payload(&body, now, &state.broker);
    } else {
        for symbol in engine.symbols.symbols() {
            let guard = engine.symbols.entry(&symbol);
            let mut state = guard.lock().expect("symbol state mutex poisoned");
            state.broker = broker_state_from_payload(&body, now, &state.broker);
        }
    }

    (StatusCode::OK, Json(json!({ "ok": true, "ts": now })))
}

async fn ping_handler() -> impl IntoResponse {
    Json(json!({ "ok": true, "ts": now_secs() }))
}

async fn status_handler(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let now = now_secs();
    let symbols: Vec<Value> = engine
        .symbols
        .symbols()
        .into_iter()
        .map(|symbol| {
            let guard = engine.symbols.entry(&symbol);
            let state = guard.lock().expect("symbol state mutex poisoned");
            json!({
                "symbol": symbol,
                "positions_open": state.broker.positions_open,
                "net_side": state.broker.net_side.map(|s| s.as_str()),
                "pending_entry": state.pending_entry.is_some(),
                "aggregation_due_at": state.aggregation.as_ref().map(|a| a.due_at),
                "management_due_at": state.management.as_ref().map(|m| m.due_at),
                "entry_locked": state.entry_lock.is_some(),
                "recent_entry_events": state.recent_entry_events,
                "recent_mgmt_events": state.recent_mgmt_events,
            })
        })
        .collect();

    Json(json!({
        "ok": true,
        "ts": now,
        "heartbeat_fresh": engine.heartbeat.is_fresh(now),
        "last_heartbeat_at": engine.heartbeat.last_heartbeat_at(),
        "symbols": symbols,
    }))
}

async fn metrics_handler(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(expected) = engine.config.webhook_token.as_deref() {
        if token_from_header(&headers).as_deref() != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Unauthorized" })),
            );
        }
    }
    let metrics = engine.metrics.lock().expect("metrics mutex poisoned");
    (
        StatusCode::OK,
        Json(json!({
            "metrics": &*metrics,
            "config": {
                "ai_entry_min_score": engine.config.ai_entry_min_score,
                "spread_hard_cap_points": engine.config.spread_hard_cap_points,
                "drift_limit_atr_mult": engine.config.drift_limit_atr_mult,
                "heartbeat_timeout_sec": engine.config.heartbeat_timeout_sec,
            },
        })),
    )
}

async fn health_handler() -> impl IntoResponse {
    info!("health check");
    (StatusCode::OK, Json(json!({ "ok": true })))
}
