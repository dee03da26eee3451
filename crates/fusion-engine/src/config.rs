use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>().map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}"))
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Every tunable named in the spec's gates and timers, loaded from the
/// environment the way `trading-agent::config::AgentConfig::from_env` loads
/// its settings: parse-with-default per field, fail fast on a malformed
/// value rather than silently falling back.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: String,
    pub webhook_token: Option<String>,
    pub body_token_auth: bool,

    pub signal_cache_path: String,
    pub metrics_path: String,
    pub env_file_path: String,
    pub cache_flush_interval_sec: i64,
    pub cache_flush_force_sec: i64,

    pub dedupe_window_sec: i64,

    pub entry_post_signal_wait_sec: i64,
    pub entry_max_wait_sec: i64,
    pub post_trigger_wait_sec: i64,
    pub entry_cooldown_sec: i64,
    pub addon_session_cap: u32,
    pub entry_lock_max_hold_sec: i64,

    pub confluence_window_sec: i64,

    pub spread_hard_cap_points: f64,
    pub spread_max_atr_ratio: f64,
    pub spread_vs_atr_soft_min: f64,
    pub lrr_ev_hard_min: f64,
    pub lrr_dist_hard_reject: f64,
    pub lrr_vol_panic_ratio: f64,
    pub lrr_spread_spike_median_mult: f64,

    pub drift_hard_block: bool,
    pub drift_limit_atr_mult: f64,
    pub drift_min_points: f64,
    pub drift_max_points: f64,

    pub atr_floor_mult: f64,
    pub atr_spike_cap_mult: f64,

    pub ai_entry_throttle_sec: i64,
    pub ai_entry_min_score: f64,
    pub ai_entry_min_score_strong_aligned: f64,
    pub addon_min_ai_score: f64,

    pub delayed_entry_enabled: bool,
    pub delayed_entry_min_retry_interval_sec: i64,
    pub delayed_entry_max_attempts: u32,
    pub delayed_entry_hard_ttl_sec: i64,

    pub mgmt_settle_wait_sec: i64,
    pub mgmt_last_signals_cap: usize,
    pub ai_close_throttle_sec: i64,
    pub ai_close_min_confidence: f64,
    pub ai_close_fallback: String,
    pub breakeven_band_spread_mult: f64,
    pub breakeven_band_atr_mult: f64,
    pub profit_protect_spread_mult: f64,
    pub profit_protect_atr_mult: f64,
    pub max_development_sec: i64,

    pub heartbeat_enabled: bool,
    pub heartbeat_timeout_sec: i64,
    pub heartbeat_stale_mode_freeze: bool,

    pub api_timeout_sec: u64,
    pub api_retry_count: u32,
    pub api_retry_wait_sec: u64,

    pub oracle_base_url: String,
    pub oracle_api_key: Option<String>,
    pub oracle_model: String,
    pub output_bus_endpoint: String,
    pub qtrend_max_age_sec: i64,

    pub auto_tune_interval_sec: i64,
    pub auto_tune_min_samples: usize,
    pub auto_tune_enabled: bool,

    pub assume_action_is_qtrend: bool,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            webhook_token: env::var("WEBHOOK_TOKEN").ok().filter(|s| !s.is_empty()),
            body_token_auth: env_bool("BODY_TOKEN_AUTH", true),

            signal_cache_path: env::var("SIGNAL_CACHE_PATH")
                .unwrap_or_else(|_| "data/signal_cache.json".to_string()),
            metrics_path: env::var("METRICS_PATH").unwrap_or_else(|_| "data/metrics.json".to_string()),
            env_file_path: env::var("ENV_FILE_PATH").unwrap_or_else(|_| ".env".to_string()),
            cache_flush_interval_sec: env_parse("CACHE_FLUSH_INTERVAL_SEC", "5")
                .context("CACHE_FLUSH_INTERVAL_SEC")?,
            cache_flush_force_sec: env_parse("CACHE_FLUSH_FORCE_SEC", "10")
                .context("CACHE_FLUSH_FORCE_SEC")?,

            dedupe_window_sec: env_parse("DEDUPE_WINDOW_SEC", "120").context("DEDUPE_WINDOW_SEC")?,

            entry_post_signal_wait_sec: env_parse("ENTRY_POST_SIGNAL_WAIT_SEC", "3")
                .context("ENTRY_POST_SIGNAL_WAIT_SEC")?,
            entry_max_wait_sec: env_parse("ENTRY_MAX_WAIT_SEC", "15").context("ENTRY_MAX_WAIT_SEC")?,
            post_trigger_wait_sec: env_parse("POST_TRIGGER_WAIT_SEC", "30")
                .context("POST_TRIGGER_WAIT_SEC")?,
            entry_cooldown_sec: env_parse("ENTRY_COOLDOWN_SEC", "20").context("ENTRY_COOLDOWN_SEC")?,
            addon_session_cap: env_parse("ADDON_SESSION_CAP", "5").context("ADDON_SESSION_CAP")?,
            entry_lock_max_hold_sec: env_parse("ENTRY_LOCK_MAX_HOLD_SEC", "60")
                .context("ENTRY_LOCK_MAX_HOLD_SEC")?,

            confluence_window_sec: env_parse("CONFLUENCE_WINDOW_SEC", "600")
                .context("CONFLUENCE_WINDOW_SEC")?,

            spread_hard_cap_points: env_parse("SPREAD_HARD_CAP_POINTS", "90")
                .context("SPREAD_HARD_CAP_POINTS")?,
            spread_max_atr_ratio: env_parse("SPREAD_MAX_ATR_RATIO", "0.10")
                .context("SPREAD_MAX_ATR_RATIO")?,
            spread_vs_atr_soft_min: env_parse("SPREAD_VS_ATR_SOFT_MIN", "10")
                .context("SPREAD_VS_ATR_SOFT_MIN")?,
            lrr_ev_hard_min: env_parse("LRR_EV_HARD_MIN", "10").context("LRR_EV_HARD_MIN")?,
            lrr_dist_hard_reject: env_parse("LRR_DIST_HARD_REJECT", "5")
                .context("LRR_DIST_HARD_REJECT")?,
            lrr_vol_panic_ratio: env_parse("LRR_VOL_PANIC_RATIO", "2.0")
                .context("LRR_VOL_PANIC_RATIO")?,
            lrr_spread_spike_median_mult: env_parse("LRR_SPREAD_SPIKE_MEDIAN_MULT", "2.5")
                .context("LRR_SPREAD_SPIKE_MEDIAN_MULT")?,

            drift_hard_block: env_bool("DRIFT_HARD_BLOCK", true),
            drift_limit_atr_mult: env_parse("DRIFT_LIMIT_ATR_MULT", "1.5")
                .context("DRIFT_LIMIT_ATR_MULT")?,
            drift_min_points: env_parse("DRIFT_MIN_POINTS", "15").context("DRIFT_MIN_POINTS")?,
            drift_max_points: env_parse("DRIFT_MAX_POINTS", "400").context("DRIFT_MAX_POINTS")?,

            atr_floor_mult: env_parse("ATR_FLOOR_MULT", "0.7").context("ATR_FLOOR_MULT")?,
            atr_spike_cap_mult: env_parse("ATR_SPIKE_CAP_MULT", "1.6").context("ATR_SPIKE_CAP_MULT")?,

            ai_entry_throttle_sec: env_parse("AI_ENTRY_THROTTLE_SEC", "15")
                .context("AI_ENTRY_THROTTLE_SEC")?,
            ai_entry_min_score: env_parse("AI_ENTRY_MIN_SCORE", "75").context("AI_ENTRY_MIN_SCORE")?,
            ai_entry_min_score_strong_aligned: env_parse("AI_ENTRY_MIN_SCORE_STRONG_ALIGNED", "65")
                .context("AI_ENTRY_MIN_SCORE_STRONG_ALIGNED")?,
            addon_min_ai_score: env_parse("ADDON_MIN_AI_SCORE", "75").context("ADDON_MIN_AI_SCORE")?,

            delayed_entry_enabled: env_bool("DELAYED_ENTRY_ENABLED", true),
            delayed_entry_min_retry_interval_sec: env_parse(
                "DELAYED_ENTRY_MIN_RETRY_INTERVAL_SEC",
                "20",
            )
            .context("DELAYED_ENTRY_MIN_RETRY_INTERVAL_SEC")?,
            delayed_entry_max_attempts: env_parse("DELAYED_ENTRY_MAX_ATTEMPTS", "3")
                .context("DELAYED_ENTRY_MAX_ATTEMPTS")?,
            delayed_entry_hard_ttl_sec: env_parse("DELAYED_ENTRY_HARD_TTL_SEC", "600")
                .context("DELAYED_ENTRY_HARD_TTL_SEC")?,

            mgmt_settle_wait_sec: env_parse("MGMT_SETTLE_WAIT_SEC", "3")
                .context("MGMT_SETTLE_WAIT_SEC")?,
            mgmt_last_signals_cap: env_parse("MGMT_LAST_SIGNALS_CAP", "12")
                .context("MGMT_LAST_SIGNALS_CAP")?,
            ai_close_throttle_sec: env_parse("AI_CLOSE_THROTTLE_SEC", "20")
                .context("AI_CLOSE_THROTTLE_SEC")?,
            ai_close_min_confidence: env_parse("AI_CLOSE_MIN_CONFIDENCE", "70")
                .context("AI_CLOSE_MIN_CONFIDENCE")?,
            ai_close_fallback: env::var("AI_CLOSE_FALLBACK").unwrap_or_else(|_| "hold".to_string()),
            breakeven_band_spread_mult: env_parse("BREAKEVEN_BAND_SPREAD_MULT", "1.5")
                .context("BREAKEVEN_BAND_SPREAD_MULT")?,
            breakeven_band_atr_mult: env_parse("BREAKEVEN_BAND_ATR_MULT", "0.10")
                .context("BREAKEVEN_BAND_ATR_MULT")?,
            profit_protect_spread_mult: env_parse("PROFIT_PROTECT_SPREAD_MULT", "4.0")
                .context("PROFIT_PROTECT_SPREAD_MULT")?,
            profit_protect_atr_mult: env_parse("PROFIT_PROTECT_ATR_MULT", "0.9")
                .context("PROFIT_PROTECT_ATR_MULT")?,
            max_development_sec: env_parse("MAX_DEVELOPMENT_SEC", "1800")
                .context("MAX_DEVELOPMENT_SEC")?,

            heartbeat_enabled: env_bool("HEARTBEAT_ENABLED", true),
            heartbeat_timeout_sec: env_parse("HEARTBEAT_TIMEOUT_SEC", "90")
                .context("HEARTBEAT_TIMEOUT_SEC")?,
            heartbeat_stale_mode_freeze: env::var("HEARTBEAT_STALE_MODE")
                .map(|v| v.eq_ignore_ascii_case("freeze"))
                .unwrap_or(true),

            api_timeout_sec: env_parse("API_TIMEOUT_SEC", "20").context("API_TIMEOUT_SEC")?,
            api_retry_count: env_parse("API_RETRY_COUNT", "3").context("API_RETRY_COUNT")?,
            api_retry_wait_sec: env_parse("API_RETRY_WAIT_SEC", "2").context("API_RETRY_WAIT_SEC")?,

            oracle_base_url: env::var("ORACLE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8787/v1/chat/completions".to_string()),
            oracle_api_key: env::var("ORACLE_API_KEY").ok().filter(|s| !s.is_empty()),
            oracle_model: env::var("ORACLE_MODEL").unwrap_or_else(|_| "oracle-default".to_string()),
            output_bus_endpoint: env::var("OUTPUT_BUS_ENDPOINT").unwrap_or_default(),
            qtrend_max_age_sec: env_parse("QTREND_MAX_AGE_SEC", "300").context("QTREND_MAX_AGE_SEC")?,

            auto_tune_interval_sec: env_parse("AUTO_TUNE_INTERVAL_SEC", "86400")
                .context("AUTO_TUNE_INTERVAL_SEC")?,
            auto_tune_min_samples: env_parse("AUTO_TUNE_MIN_SAMPLES", "80")
                .context("AUTO_TUNE_MIN_SAMPLES")?,
            auto_tune_enabled: env_bool("AUTO_TUNE_ENABLED", true),

            // Legacy compatibility knob (§9 open question b): default off.
            assume_action_is_qtrend: env_bool("ASSUME_ACTION_IS_QTREND", false),
        })
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_sec)
    }

    pub fn api_retry_wait(&self) -> Duration {
        Duration::from_secs(self.api_retry_wait_sec)
    }
}
