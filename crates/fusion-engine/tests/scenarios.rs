//! End-to-end scenario tests driving the dispatcher and gate pipeline
//! directly against in-memory doubles, matching the six scenarios the
//! outcome taxonomy and dispatcher are built around.

use std::sync::Arc;

use ai_oracle::{Oracle, StubOracle};
use heartbeat_monitor::{HeartbeatConfig, HeartbeatMonitor, StaleMode};
use market_snapshot::{MarketSnapshotProvider, ProviderConfig};
use serde_json::json;
use signal_cache::{CacheConfig, QTrendStore, Side, SignalCache};
use state_store::cache_store::{CacheFlusher, CacheStoreConfig};
use state_store::Metrics;
use trade_bus::{BusMessage, ChannelOutputBus, OutputBus};

use fusion_engine::config::EngineConfig;
use fusion_engine::dispatcher::dispatch;
use fusion_engine::engine::Engine;
use fusion_engine::entry_engine::evaluate_entry;
use fusion_engine::management_engine::evaluate_management;
use fusion_engine::outcome::Outcome;

const NOW: i64 = 1_700_000_000; // 2023-11-14T22:13:20Z, outside the market guard window.

fn test_config() -> EngineConfig {
    EngineConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        webhook_token: None,
        body_token_auth: false,

        signal_cache_path: "/tmp/unused-signal-cache.json".to_string(),
        metrics_path: "/tmp/unused-metrics.json".to_string(),
        env_file_path: "/tmp/unused.env".to_string(),
        cache_flush_interval_sec: 5,
        cache_flush_force_sec: 10,

        dedupe_window_sec: 120,

        entry_post_signal_wait_sec: 3,
        entry_max_wait_sec: 15,
        post_trigger_wait_sec: 30,
        entry_cooldown_sec: 20,
        addon_session_cap: 5,
        entry_lock_max_hold_sec: 60,

        confluence_window_sec: 600,

        spread_hard_cap_points: 90.0,
        spread_max_atr_ratio: 0.10,
        spread_vs_atr_soft_min: 10.0,
        lrr_ev_hard_min: 10.0,
        lrr_dist_hard_reject: 5.0,
        lrr_vol_panic_ratio: 2.0,
        lrr_spread_spike_median_mult: 2.5,

        drift_hard_block: true,
        drift_limit_atr_mult: 1.5,
        drift_min_points: 15.0,
        drift_max_points: 400.0,

        atr_floor_mult: 0.7,
        atr_spike_cap_mult: 1.6,

        ai_entry_throttle_sec: 15,
        ai_entry_min_score: 75.0,
        ai_entry_min_score_strong_aligned: 65.0,
        addon_min_ai_score: 75.0,

        delayed_entry_enabled: true,
        delayed_entry_min_retry_interval_sec: 20,
        delayed_entry_max_attempts: 3,
        delayed_entry_hard_ttl_sec: 600,

        mgmt_settle_wait_sec: 3,
        mgmt_last_signals_cap: 12,
        ai_close_throttle_sec: 20,
        ai_close_min_confidence: 70.0,
        ai_close_fallback: "hold".to_string(),
        breakeven_band_spread_mult: 1.5,
        breakeven_band_atr_mult: 0.10,
        profit_protect_spread_mult: 4.0,
        profit_protect_atr_mult: 0.9,
        max_development_sec: 1800,

        heartbeat_enabled: true,
        heartbeat_timeout_sec: 90,
        heartbeat_stale_mode_freeze: true,

        api_timeout_sec: 20,
        api_retry_count: 3,
        api_retry_wait_sec: 2,

        oracle_base_url: String::new(),
        oracle_api_key: None,
        oracle_model: "test".to_string(),
        output_bus_endpoint: String::new(),
        qtrend_max_age_sec: 300,

        auto_tune_interval_sec: 86400,
        auto_tune_min_samples: 80,
        auto_tune_enabled: false,

        assume_action_is_qtrend: false,
    }
}

/// Builds an engine wired to a [`StubOracle`] and a [`ChannelOutputBus`],
/// with a fresh heartbeat and a tradeable market already seeded for
/// `symbol`. Returns the engine plus a receiver draining published bus
/// messages and a handle to the stub for inspecting call counts.
fn build_engine(
    config: EngineConfig,
    symbol: &str,
    oracle_responses: Vec<Option<serde_json::Value>>,
) -> (Arc<Engine>, tokio::sync::mpsc::UnboundedReceiver<BusMessage>, Arc<StubOracle>) {
    let cache = SignalCache::new(CacheConfig { dedupe_window_sec: config.dedupe_window_sec, ..Default::default() });
    let qtrend = QTrendStore::new(config.qtrend_max_age_sec);
    let market = MarketSnapshotProvider::new(ProviderConfig::default());

    // Seed a clean, tradeable market: tight spread, healthy ATR, no drift.
    for i in 0..30 {
        market.ingest_bar(
            symbol,
            market_snapshot::Timeframe::M5,
            market_snapshot::Bar {
                timestamp: NOW - (30 - i) * 300,
                open: 2650.0,
                high: 2652.0,
                low: 2648.0,
                close: 2650.0,
            },
        );
    }
    for i in 0..30 {
        market.ingest_bar(
            symbol,
            market_snapshot::Timeframe::M24h,
            market_snapshot::Bar {
                timestamp: NOW - (30 - i) * 900,
                open: 2650.0,
                high: 2653.0,
                low: 2647.0,
                close: 2650.0,
            },
        );
    }
    for _ in 0..20 {
        market.ingest_tick(symbol, 2649.9, 2650.1, 0.01);
    }

    let heartbeat = HeartbeatMonitor::new(HeartbeatConfig {
        enabled: config.heartbeat_enabled,
        timeout_sec: config.heartbeat_timeout_sec,
        stale_mode: if config.heartbeat_stale_mode_freeze { StaleMode::Freeze } else { StaleMode::Ignore },
    });
    heartbeat.ingest(&json!({ "type": "heartbeat", "symbol": symbol }), NOW);

    let stub = Arc::new(StubOracle::new(oracle_responses));
    let oracle: Arc<dyn Oracle> = stub.clone();
    let (channel_bus, receiver) = ChannelOutputBus::new();
    let bus: Arc<dyn OutputBus> = Arc::new(channel_bus);

    let metrics = Metrics::new();
    let cache_flusher = CacheFlusher::new(CacheStoreConfig::new("/tmp/unused-flusher.json"), NOW);

    let engine = Arc::new(Engine::new(config, cache, qtrend, market, heartbeat, oracle, bus, metrics, cache_flusher));
    (engine, receiver, stub)
}

fn lorentzian_trigger(symbol: &str, side: &str, price: f64, t: i64) -> serde_json::Value {
    json!({
        "symbol": symbol,
        "source": "Lorentzian",
        "side": side,
        "signal_type": "entry_trigger",
        "event": "entry",
        "confirmed": "bar_close",
        "tf": "m5",
        "price": price,
        "time": t,
    })
}

#[tokio::test]
async fn happy_entry_publishes_one_order() {
    let (engine, mut receiver, stub) =
        build_engine(test_config(), "XAUUSD", vec![Some(json!({ "confluence_score": 82, "lot_multiplier": 1.0 }))]);

    let body = lorentzian_trigger("XAUUSD", "buy", 2650.0, NOW);
    let signal = signal_cache::normalize(&body, NOW).unwrap();

    let outcome = evaluate_entry(&engine, "XAUUSD", &signal, false, NOW).await;
    assert_eq!(outcome, Outcome::Ok);
    assert_eq!(stub.calls().len(), 1);

    let published = receiver.try_recv().expect("one order should have been published");
    assert!(matches!(published, BusMessage::Order { .. }));
    assert!(receiver.try_recv().is_err(), "exactly one order, nothing else queued");
}

#[tokio::test]
async fn duplicate_webhook_is_rejected_by_cache_before_evaluation() {
    let (engine, _receiver, _stub) = build_engine(test_config(), "XAUUSD", vec![]);

    let body = lorentzian_trigger("XAUUSD", "buy", 2650.0, NOW);
    let first = signal_cache::normalize(&body, NOW).unwrap();
    let second = signal_cache::normalize(&body, NOW + 1).unwrap();

    assert!(engine.cache.append(first), "first webhook is new");
    assert!(!engine.cache.append(second), "identical signal is a duplicate regardless of receive_time");
}

#[tokio::test]
async fn wide_spread_blocks_entry_before_any_ai_call() {
    let (engine, _receiver, stub) = build_engine(test_config(), "XAUUSD", vec![]);

    // A spread far past the hard cap trips gate 7 outright.
    engine.market.ingest_tick("XAUUSD", 2600.0, 2605.0, 0.01);

    let body = lorentzian_trigger("XAUUSD", "buy", 2650.0, NOW);
    let signal = signal_cache::normalize(&body, NOW).unwrap();

    let outcome = evaluate_entry(&engine, "XAUUSD", &signal, false, NOW).await;
    assert_eq!(outcome, Outcome::BlockedSpread);
    assert!(stub.calls().is_empty(), "a guard rejection must never reach the oracle");
}

#[tokio::test]
async fn delayed_reevaluation_retries_after_a_later_qualifying_signal() {
    let config = test_config();
    let (engine, mut receiver, stub) = build_engine(
        config,
        "XAUUSD",
        vec![None, Some(json!({ "confluence_score": 80, "lot_multiplier": 1.0 }))],
    );

    let trigger_body = lorentzian_trigger("XAUUSD", "buy", 2650.0, NOW);
    let trigger = signal_cache::normalize(&trigger_body, NOW).unwrap();
    let first = evaluate_entry(&engine, "XAUUSD", &trigger, false, NOW).await;
    assert_eq!(first, Outcome::BlockedAiNoScore);
    assert!(receiver.try_recv().is_err());

    // Park a pending entry the way the dispatcher would have, then let a
    // later qualifying signal retry it.
    {
        let guard = engine.symbols.entry("XAUUSD");
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.pending_entry = Some(fusion_engine::state::PendingEntry::new(
            trigger.clone(),
            NOW,
            engine.config.delayed_entry_hard_ttl_sec,
        ));
    }

    let zones_body = json!({
        "symbol": "XAUUSD", "source": "Zones", "side": "buy", "event": "confirm",
        "tf": "m5", "price": 2650.5, "time": NOW + 25,
    });
    let retry_signal = signal_cache::normalize(&zones_body, NOW + 25).unwrap();

    let retried = fusion_engine::entry_engine::try_delayed_reeval(&engine, "XAUUSD", &retry_signal, NOW + 25)
        .await
        .expect("a pending entry past the retry interval should re-evaluate");
    assert_eq!(retried, Outcome::Ok);
    assert_eq!(stub.calls().len(), 2);
    assert!(matches!(receiver.try_recv().unwrap(), BusMessage::Order { .. }));
}

#[tokio::test]
async fn management_settle_batch_issues_a_single_ai_call_and_closes() {
    let (engine, mut receiver, stub) =
        build_engine(test_config(), "XAUUSD", vec![Some(json!({ "reason": "target hit", "confidence": 90 }))]);

    {
        let guard = engine.symbols.entry("XAUUSD");
        let mut state = guard.lock().expect("symbol state mutex poisoned");
        state.broker.positions_open = 1;
        state.broker.net_side = Some(Side::Buy);
        state.broker.holding_since = Some(NOW - 600);
    }

    let s1 = signal_cache::normalize(&json!({"symbol": "XAUUSD", "source": "Zones", "event": "touch", "time": NOW}), NOW).unwrap();
    let s2 = signal_cache::normalize(&json!({"symbol": "XAUUSD", "source": "FVG", "event": "fill", "time": NOW + 1}), NOW + 1).unwrap();
    let s3 = signal_cache::normalize(&json!({"symbol": "XAUUSD", "source": "OSGFC", "event": "confirm", "time": NOW + 2}), NOW + 2).unwrap();

    let outcome = evaluate_management(&engine, "XAUUSD", &[s1, s2, s3], NOW + 2, true).await;
    assert_eq!(outcome, Outcome::Ok);
    assert_eq!(stub.calls().len(), 1, "one AI call covers the whole settled batch");
    assert!(matches!(receiver.try_recv().unwrap(), BusMessage::Close { .. }));
}

#[tokio::test]
async fn heartbeat_freeze_short_circuits_the_dispatcher_at_200() {
    let (engine, mut receiver, stub) = build_engine(test_config(), "XAUUSD", vec![]);

    // Push the heartbeat far enough into the past to exceed the timeout.
    engine.heartbeat.ingest(&json!({ "type": "heartbeat", "symbol": "XAUUSD" }), NOW - 1000);

    let body = lorentzian_trigger("XAUUSD", "buy", 2650.0, NOW);
    let signal = signal_cache::normalize(&body, NOW).unwrap();

    let response = dispatch(engine, signal, NOW).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.message, "Frozen by heartbeat");
    assert!(stub.calls().is_empty());
    assert!(receiver.try_recv().is_err(), "no order should ever be published while frozen");
}
