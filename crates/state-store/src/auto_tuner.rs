use std::collections::HashMap;
use std::path::Path;

use crate::atomic::atomic_write_text;

#[derive(Debug, Clone)]
pub struct AutoTunerConfig {
    pub percentile: f64,
    pub min_samples: usize,
    pub spread_max_atr_ratio_min: f64,
    pub spread_max_atr_ratio_max: f64,
    pub drift_limit_atr_mult_min: f64,
    pub drift_limit_atr_mult_max: f64,
}

impl Default for AutoTunerConfig {
    fn default() -> Self {
        Self {
            percentile: 0.98,
            min_samples: 80,
            spread_max_atr_ratio_min: 0.05,
            spread_max_atr_ratio_max: 0.30,
            drift_limit_atr_mult_min: 0.5,
            drift_limit_atr_mult_max: 4.0,
        }
    }
}

/// One example log entry's inputs to the tuner (§4.13).
#[derive(Debug, Clone, Copy)]
pub struct TuningSample {
    pub atr_to_spread: f64,
    pub drift_points: f64,
    pub atr_points: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunedValues {
    pub spread_max_atr_ratio: f64,
    pub drift_limit_atr_mult: f64,
}

fn percentile(mut values: Vec<f64>, p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = (p.clamp(0.0, 1.0) * (values.len() - 1) as f64).round() as usize;
    values.get(rank).copied()
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Compute the two tuned guard parameters from recent example samples.
/// Returns `None` when fewer than `min_samples` are available (§4.13).
pub fn compute_tuned_values(samples: &[TuningSample], cfg: &AutoTunerConfig) -> Option<TunedValues> {
    if samples.len() < cfg.min_samples {
        return None;
    }

    let spread_to_atr: Vec<f64> = samples
        .iter()
        .filter(|s| s.atr_to_spread > 0.0)
        .map(|s| 1.0 / s.atr_to_spread)
        .collect();
    let drift_ratio: Vec<f64> = samples
        .iter()
        .filter(|s| s.atr_points > 0.0)
        .map(|s| s.drift_points.abs() / s.atr_points)
        .collect();

    let spread_p = percentile(spread_to_atr, cfg.percentile)?;
    let drift_p = percentile(drift_ratio, cfg.percentile)?;

    Some(TunedValues {
        spread_max_atr_ratio: clamp(spread_p, cfg.spread_max_atr_ratio_min, cfg.spread_max_atr_ratio_max),
        drift_limit_atr_mult: clamp(drift_p, cfg.drift_limit_atr_mult_min, cfg.drift_limit_atr_mult_max),
    })
}

/// Rewrite an `.env`-style file, replacing existing `KEY=value` lines for
/// the given keys in place and appending any that weren't present —
/// preserving the rest of the file's order (§6.4).
pub fn persist_env_values(path: impl AsRef<Path>, updates: &HashMap<String, String>) -> std::io::Result<()> {
    let path = path.as_ref();
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let mut seen: HashMap<String, bool> = updates.keys().map(|k| (k.clone(), false)).collect();

    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            let Some((key, _)) = line.split_once('=') else { return line.to_string() };
            let key = key.trim();
            if let Some(value) = updates.get(key) {
                seen.insert(key.to_string(), true);
                format!("{key}={value}")
            } else {
                line.to_string()
            }
        })
        .collect();

    for (key, value) in updates {
        if !seen.get(key).copied().unwrap_or(false) {
            lines.push(format!("{key}={value}"));
        }
    }

    let content = lines.join("\n") + "\n";
    atomic_write_text(path, &content)
}

/// Apply tuned values to a freshly-read set of env key/value pairs for
/// immediate in-memory use, returning the updates that should also be
/// persisted.
pub fn tuned_values_as_env(tuned: &TunedValues) -> HashMap<String, String> {
    let mut out = HashMap::new();
    out.insert("SPREAD_MAX_ATR_RATIO".to_string(), format!("{:.4}", tuned.spread_max_atr_ratio));
    out.insert("DRIFT_LIMIT_ATR_MULT".to_string(), format!("{:.4}", tuned.drift_limit_atr_mult));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(atr_to_spread: f64, drift_points: f64, atr_points: f64) -> TuningSample {
        TuningSample { atr_to_spread, drift_points, atr_points }
    }

    #[test]
    fn below_min_samples_returns_none() {
        let samples = vec![sample(10.0, 1.0, 10.0); 10];
        assert!(compute_tuned_values(&samples, &AutoTunerConfig::default()).is_none());
    }

    #[test]
    fn tuned_values_always_within_configured_clamp_bounds() {
        let cfg = AutoTunerConfig::default();
        let mut samples = Vec::new();
        for i in 0..100 {
            samples.push(sample(1.0 + i as f64 * 10.0, 100.0 + i as f64, 1.0));
        }
        let tuned = compute_tuned_values(&samples, &cfg).unwrap();
        assert!(tuned.spread_max_atr_ratio >= cfg.spread_max_atr_ratio_min);
        assert!(tuned.spread_max_atr_ratio <= cfg.spread_max_atr_ratio_max);
        assert!(tuned.drift_limit_atr_mult >= cfg.drift_limit_atr_mult_min);
        assert!(tuned.drift_limit_atr_mult <= cfg.drift_limit_atr_mult_max);
    }

    #[test]
    fn env_rewrite_preserves_order_and_replaces_in_place() {
        let dir = std::env::temp_dir().join(format!("state-store-env-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        std::fs::write(&path, "FOO=1\nSPREAD_MAX_ATR_RATIO=0.10\nBAR=2\n").unwrap();

        let mut updates = HashMap::new();
        updates.insert("SPREAD_MAX_ATR_RATIO".to_string(), "0.17".to_string());
        updates.insert("DRIFT_LIMIT_ATR_MULT".to_string(), "1.25".to_string());
        persist_env_values(&path, &updates).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "FOO=1");
        assert_eq!(lines[1], "SPREAD_MAX_ATR_RATIO=0.17");
        assert_eq!(lines[2], "BAR=2");
        assert_eq!(lines[3], "DRIFT_LIMIT_ATR_MULT=1.25");
        std::fs::remove_dir_all(&dir).ok();
    }
}
