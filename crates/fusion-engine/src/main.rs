use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ai_oracle::{HttpOracle, HttpOracleConfig, Oracle};
use anyhow::Result;
use heartbeat_monitor::{HeartbeatConfig, HeartbeatMonitor, StaleMode};
use market_snapshot::{MarketSnapshotProvider, ProviderConfig};
use signal_cache::{CacheConfig, QTrendStore, SignalCache};
use state_store::auto_tuner::{self, AutoTunerConfig, TuningSample};
use state_store::cache_store::{load_signal_cache, CacheFlusher, CacheStoreConfig};
use state_store::Metrics;
use tokio::signal::unix::SignalKind;
use tokio::time;
use trade_bus::{HttpOutputBus, OutputBus};

use fusion_engine::config::EngineConfig;
use fusion_engine::engine::{now_secs, Engine};
use fusion_engine::webhook;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging =
        std::env::var("RUST_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter()).init();
    }

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("starting signal fusion and decision engine");

    let config = EngineConfig::from_env()?;
    let now = now_secs();

    let cache = SignalCache::new(CacheConfig { dedupe_window_sec: config.dedupe_window_sec, ..Default::default() });
    let restored = load_signal_cache(&config.signal_cache_path).unwrap_or_default();
    let restored_count = restored.len();
    cache.restore(restored, now);
    cache.prune_all(now);
    tracing::info!(restored_count, "signal cache recovered from disk");

    let qtrend = QTrendStore::new(config.qtrend_max_age_sec);
    let market = MarketSnapshotProvider::new(ProviderConfig::default());

    let heartbeat = HeartbeatMonitor::new(HeartbeatConfig {
        enabled: config.heartbeat_enabled,
        timeout_sec: config.heartbeat_timeout_sec,
        stale_mode: if config.heartbeat_stale_mode_freeze { StaleMode::Freeze } else { StaleMode::Ignore },
    });

    let oracle: Arc<dyn Oracle> = Arc::new(HttpOracle::new(HttpOracleConfig {
        base_url: config.oracle_base_url.clone(),
        api_key: config.oracle_api_key.clone(),
        model: config.oracle_model.clone(),
        timeout: config.api_timeout(),
        retry_count: config.api_retry_count,
        retry_wait: config.api_retry_wait(),
    }));
    let bus: Arc<dyn OutputBus> = Arc::new(HttpOutputBus::new(config.output_bus_endpoint.clone()));

    let metrics = Metrics::load(&config.metrics_path).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "failed to load metrics from disk, starting fresh");
        Metrics::new()
    });

    let cache_flusher = CacheFlusher::new(
        CacheStoreConfig {
            path: config.signal_cache_path.clone().into(),
            flush_interval_sec: config.cache_flush_interval_sec,
            flush_force_sec: config.cache_flush_force_sec,
        },
        now,
    );

    let bind_addr = config.bind_addr.clone();
    let metrics_path = config.metrics_path.clone();
    let env_file_path = config.env_file_path.clone();
    let auto_tune_interval_sec = config.auto_tune_interval_sec;
    let auto_tune_min_samples = config.auto_tune_min_samples;
    let auto_tune_enabled = config.auto_tune_enabled;

    let engine =
        Arc::new(Engine::new(config, cache, qtrend, market, heartbeat, oracle, bus, metrics, cache_flusher));

    let persistence_handle = tokio::spawn(run_persistence_loop(engine.clone(), metrics_path.clone()));
    let auto_tune_handle = tokio::spawn(run_auto_tune_loop(
        engine.clone(),
        env_file_path,
        auto_tune_interval_sec,
        auto_tune_min_samples,
        auto_tune_enabled,
    ));

    let app = webhook::router(engine.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind_addr, "listening for webhooks");

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    persistence_handle.abort();
    auto_tune_handle.abort();

    tracing::info!("flushing signal cache and metrics before exit");
    let now = now_secs();
    if let Err(err) = engine.cache_flusher.flush(&engine.cache, now) {
        tracing::error!(error = %err, "final cache flush failed");
    }
    let metrics = engine.metrics.lock().expect("metrics mutex poisoned");
    if let Err(err) = metrics.flush(&metrics_path) {
        tracing::error!(error = %err, "final metrics flush failed");
    }

    Ok(())
}

/// C12: one timer task drives both the signal cache flush (cadence/force
/// interval via [`CacheFlusher`]) and the metrics flush/prune at the same
/// cadence.
async fn run_persistence_loop(engine: Arc<Engine>, metrics_path: String) {
    let mut ticker = time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let now = now_secs();

        engine.cache.prune_all(now);
        if engine.cache_flusher.should_flush(now) {
            if let Err(err) = engine.cache_flusher.flush(&engine.cache, now) {
                tracing::error!(error = %err, "signal cache flush failed");
            }
        }

        let mut metrics = engine.metrics.lock().expect("metrics mutex poisoned");
        metrics.prune(now);
        if let Err(err) = metrics.flush(&metrics_path) {
            tracing::error!(error = %err, "metrics flush failed");
        }
    }
}

/// C13: recompute `SPREAD_MAX_ATR_RATIO`/`DRIFT_LIMIT_ATR_MULT` from recent
/// examples every `interval_sec`, and once at startup.
async fn run_auto_tune_loop(
    engine: Arc<Engine>,
    env_file_path: String,
    interval_sec: i64,
    min_samples: usize,
    enabled: bool,
) {
    if !enabled {
        return;
    }
    let tuner_config = AutoTunerConfig { min_samples, ..Default::default() };

    run_auto_tune_once(&engine, &env_file_path, &tuner_config);

    let mut ticker = time::interval(Duration::from_secs(interval_sec.max(1) as u64));
    ticker.tick().await; // first tick fires immediately; the startup run above already covered it
    loop {
        ticker.tick().await;
        run_auto_tune_once(&engine, &env_file_path, &tuner_config);
    }
}

fn run_auto_tune_once(engine: &Engine, env_file_path: &str, tuner_config: &AutoTunerConfig) {
    let now = now_secs();
    let samples = {
        let metrics = engine.metrics.lock().expect("metrics mutex poisoned");
        collect_tuning_samples(&metrics)
    };
    let Some(tuned) = auto_tuner::compute_tuned_values(&samples, tuner_config) else {
        tracing::debug!(count = samples.len(), min_samples = tuner_config.min_samples, "auto-tune skipped, not enough samples");
        return;
    };

    let updates = auto_tuner::tuned_values_as_env(&tuned);
    if let Err(err) = auto_tuner::persist_env_values(env_file_path, &updates) {
        tracing::error!(error = %err, "failed to persist auto-tuned env values");
        return;
    }

    engine.last_tune_at.store(now, Ordering::SeqCst);
    tracing::info!(
        spread_max_atr_ratio = tuned.spread_max_atr_ratio,
        drift_limit_atr_mult = tuned.drift_limit_atr_mult,
        "auto-tuner updated guard parameters"
    );
}

fn collect_tuning_samples(metrics: &Metrics) -> Vec<TuningSample> {
    metrics
        .by_day
        .values()
        .flat_map(|by_symbol| by_symbol.values())
        .flat_map(|symbol_metrics| symbol_metrics.examples.iter())
        .filter_map(|example| {
            let atr_to_spread = example.get("atr_to_spread")?.as_f64()?;
            let drift_points = example.get("drift_points")?.as_f64()?;
            let atr_points = example.get("atr_points")?.as_f64()?;
            Some(TuningSample { atr_to_spread, drift_points, atr_points })
        })
        .collect()
}
