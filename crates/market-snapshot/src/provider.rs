use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::debug;

use crate::timeseries::{atr, sma, swing_high, swing_low, Timeseries};
use crate::types::{Bar, MarketSnapshot, SlopeDirection};

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub atr_period: usize,
    pub m5_capacity: usize,
    pub h1_capacity: usize,
    pub m24h_capacity: usize,
    pub m24h_period: usize,
    pub sma_period: usize,
    pub swing_lookback: usize,
    pub spread_median_lr: f64,
    pub spread_window_count: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            m5_capacity: 300,
            h1_capacity: 100,
            m24h_capacity: 300,
            m24h_period: 96,
            sma_period: 20,
            swing_lookback: 20,
            spread_median_lr: 0.03,
            spread_window_count: 200,
        }
    }
}

struct SymbolState {
    bars_m5: Timeseries,
    bars_h1: Timeseries,
    bars_m24h: Timeseries,
    bars_m15: Timeseries,
    spread_samples: VecDeque<f64>,
    spread_median: Option<f64>,
    bid: f64,
    ask: f64,
    point: f64,
    last_atr_m5: f64,
    last_atr_h1: f64,
    last_atr_24h: f64,
}

impl SymbolState {
    fn new(cfg: &ProviderConfig) -> Self {
        Self {
            bars_m5: Timeseries::new(cfg.m5_capacity),
            bars_h1: Timeseries::new(cfg.h1_capacity),
            bars_m24h: Timeseries::new(cfg.m24h_capacity),
            bars_m15: Timeseries::new(cfg.m5_capacity),
            spread_samples: VecDeque::with_capacity(cfg.spread_window_count),
            spread_median: None,
            bid: 0.0,
            ask: 0.0,
            point: 0.0,
            last_atr_m5: 0.0,
            last_atr_h1: 0.0,
            last_atr_24h: 0.0,
        }
    }
}

/// Bar timeframe tag for `ingest_bar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    M5,
    M15,
    H1,
    M24h,
}

/// Per-symbol rolling market state assembled into an on-demand
/// [`MarketSnapshot`] (§4.4). Bars feed ATR/SMA/slope/swing; ticks feed
/// bid/ask/spread. Each symbol's state is serialized by its own mutex, the
/// same shape `signal-cache::SignalCache` uses for per-symbol isolation.
pub struct MarketSnapshotProvider {
    config: ProviderConfig,
    symbols: DashMap<String, Mutex<SymbolState>>,
}

impl MarketSnapshotProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config, symbols: DashMap::new() }
    }

    fn entry(&self, symbol: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<SymbolState>> {
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| Mutex::new(SymbolState::new(&self.config)));
        self.symbols.get(symbol).expect("just inserted")
    }

    pub fn ingest_bar(&self, symbol: &str, tf: Timeframe, bar: Bar) {
        let guard = self.entry(symbol);
        let mut state = guard.lock().expect("market state mutex poisoned");
        match tf {
            Timeframe::M5 => state.bars_m5.push(bar),
            Timeframe::M15 => state.bars_m15.push(bar),
            Timeframe::H1 => state.bars_h1.push(bar),
            Timeframe::M24h => state.bars_m24h.push(bar),
        }
    }

    /// Feed a tick (bid/ask/point). Updates the rolling spread sample window
    /// and the Robbins-Monro spread median.
    pub fn ingest_tick(&self, symbol: &str, bid: f64, ask: f64, point: f64) {
        let guard = self.entry(symbol);
        let mut state = guard.lock().expect("market state mutex poisoned");
        state.bid = bid;
        state.ask = ask;
        state.point = point;
        let spread = (ask - bid).max(0.0);

        state.spread_samples.push_back(spread);
        while state.spread_samples.len() > self.config.spread_window_count {
            state.spread_samples.pop_front();
        }

        let lr = self.config.spread_median_lr;
        let median = state.spread_median.get_or_insert(spread);
        if spread > *median {
            *median += lr;
        } else if spread < *median {
            *median -= lr;
        }
    }

    /// Assemble the on-demand market bundle for a symbol. ATR/SMA/swing are
    /// recomputed from closed bars on every call; ticks use the latest
    /// ingested bid/ask. Falls back to the last computed ATR if a timeframe
    /// doesn't yet have enough closed bars.
    pub fn get_market(&self, symbol: &str) -> MarketSnapshot {
        let guard = self.entry(symbol);
        let mut state = guard.lock().expect("market state mutex poisoned");

        let closed_m5 = state.bars_m5.closed();
        let closed_h1 = state.bars_h1.closed();
        let closed_m24h = state.bars_m24h.closed();
        let closed_m15 = state.bars_m15.closed();

        if let Some(v) = atr(&closed_m5, self.config.atr_period) {
            state.last_atr_m5 = v;
        }
        if let Some(v) = atr(&closed_h1, self.config.atr_period) {
            state.last_atr_h1 = v;
        }
        if let Some(v) = atr(&closed_m24h, self.config.m24h_period) {
            state.last_atr_24h = v;
        } else if let Some(v) = atr(&closed_m24h, self.config.atr_period) {
            state.last_atr_24h = v;
        }

        let sma_now = sma(&closed_m15, self.config.sma_period, 0);
        let sma_prev = sma(&closed_m15, self.config.sma_period, 1);
        let sma_slope = match (sma_now, sma_prev) {
            (Some(now), Some(prev)) => {
                let eps = state.point.max(1e-9) * 0.5;
                if now - prev > eps {
                    SlopeDirection::Up
                } else if prev - now > eps {
                    SlopeDirection::Down
                } else {
                    SlopeDirection::Flat
                }
            }
            _ => SlopeDirection::Flat,
        };

        let spread = (state.ask - state.bid).max(0.0);
        let spread_median = state.spread_median.unwrap_or(spread);

        debug!(symbol, atr_m5 = state.last_atr_m5, atr_h1 = state.last_atr_h1, "market snapshot computed");

        MarketSnapshot {
            bid: state.bid,
            ask: state.ask,
            point: state.point,
            atr_m5: state.last_atr_m5,
            atr_h1: state.last_atr_h1,
            atr_24h_avg: state.last_atr_24h,
            spread,
            spread_median,
            sma_m15_20: sma_now,
            sma_slope,
            swing_high: swing_high(&closed_m5, self.config.swing_lookback),
            swing_low: swing_low(&closed_m5, self.config.swing_lookback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { timestamp: ts, open: o, high: h, low: l, close: c }
    }

    #[test]
    fn atr_uses_only_closed_bars() {
        let provider = MarketSnapshotProvider::new(ProviderConfig::default());
        for i in 0..14 {
            provider.ingest_bar("XAUUSD", Timeframe::M5, bar(i * 300, 10.0, 11.0, 9.0, 10.0));
        }
        // The 14th bar is still forming until a 15th arrives.
        let snap = provider.get_market("XAUUSD");
        assert_eq!(snap.atr_m5, 0.0);

        provider.ingest_bar("XAUUSD", Timeframe::M5, bar(14 * 300, 10.0, 11.0, 9.0, 10.0));
        let snap = provider.get_market("XAUUSD");
        assert!(snap.atr_m5 > 0.0);
    }

    #[test]
    fn sma_slope_detects_rising_closes() {
        let provider = MarketSnapshotProvider::new(ProviderConfig::default());
        provider.ingest_tick("XAUUSD", 2000.0, 2000.2, 0.01);
        for i in 0..22 {
            let close = 2000.0 + i as f64;
            provider.ingest_bar("XAUUSD", Timeframe::M15, bar(i * 900, close, close + 1.0, close - 1.0, close));
        }
        let snap = provider.get_market("XAUUSD");
        assert_eq!(snap.sma_slope, SlopeDirection::Up);
    }

    #[test]
    fn spread_median_converges_toward_samples() {
        let provider = MarketSnapshotProvider::new(ProviderConfig::default());
        for _ in 0..500 {
            provider.ingest_tick("XAUUSD", 2000.0, 2000.5, 0.01);
        }
        let snap = provider.get_market("XAUUSD");
        assert!((snap.spread_median - 0.5).abs() < 0.05);
    }

    #[test]
    fn swing_extremes_track_last_n_bars() {
        let provider = MarketSnapshotProvider::new(ProviderConfig::default());
        for i in 0..25 {
            let base = 2000.0 + i as f64;
            provider.ingest_bar("XAUUSD", Timeframe::M5, bar(i * 300, base, base + 2.0, base - 2.0, base));
        }
        let snap = provider.get_market("XAUUSD");
        // Closed bars are indices 0..24 (bar 24 is forming); last 20 closed are 4..23.
        assert_eq!(snap.swing_low, Some(2004.0 - 2.0));
        assert_eq!(snap.swing_high, Some(2023.0 + 2.0));
    }
}
