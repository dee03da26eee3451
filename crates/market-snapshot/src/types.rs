use serde::{Deserialize, Serialize};

/// A single closed (or forming) OHLC bar. `timestamp` is the bar's open
/// time, epoch seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlopeDirection {
    Up,
    Down,
    Flat,
}

/// On-demand market bundle for a symbol (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bid: f64,
    pub ask: f64,
    pub point: f64,
    pub atr_m5: f64,
    pub atr_h1: f64,
    pub atr_24h_avg: f64,
    pub spread: f64,
    pub spread_median: f64,
    pub sma_m15_20: Option<f64>,
    pub sma_slope: SlopeDirection,
    pub swing_high: Option<f64>,
    pub swing_low: Option<f64>,
}

impl MarketSnapshot {
    pub fn spread_points(&self) -> f64 {
        if self.point > 0.0 { self.spread / self.point } else { 0.0 }
    }

    pub fn atr_points(&self, atr: f64) -> f64 {
        if self.point > 0.0 { atr / self.point } else { 0.0 }
    }

    /// `ATR_eff = clamp(ATR_now, ATR_24h×floor_mult, ATR_24h×spike_cap_mult)` (§4.7.3).
    pub fn atr_effective(&self, floor_mult: f64, spike_cap_mult: f64) -> f64 {
        let floor = self.atr_24h_avg * floor_mult;
        let cap = self.atr_24h_avg * spike_cap_mult;
        self.atr_m5.max(floor).min(cap)
    }
}
