use std::collections::VecDeque;

use crate::types::Bar;

/// A per-timeframe bar series that tracks the currently-forming bar
/// separately from closed bars, so ATR/SMA/slope computations can
/// explicitly exclude the forming bar (§4.4).
pub struct Timeseries {
    closed: VecDeque<Bar>,
    forming: Option<Bar>,
    capacity: usize,
}

impl Timeseries {
    pub fn new(capacity: usize) -> Self {
        Self { closed: VecDeque::with_capacity(capacity), forming: None, capacity }
    }

    /// Feed a bar. If its timestamp differs from the currently-forming
    /// bar's timestamp, the forming bar closes and rolls into `closed`.
    /// Same-timestamp updates replace the forming bar in place (the bar is
    /// still being built).
    pub fn push(&mut self, bar: Bar) {
        match self.forming {
            Some(prev) if prev.timestamp == bar.timestamp => {
                self.forming = Some(bar);
            }
            Some(prev) => {
                self.closed.push_back(prev);
                while self.closed.len() > self.capacity {
                    self.closed.pop_front();
                }
                self.forming = Some(bar);
            }
            None => {
                self.forming = Some(bar);
            }
        }
    }

    pub fn closed(&self) -> Vec<Bar> {
        self.closed.iter().copied().collect()
    }

    pub fn forming(&self) -> Option<Bar> {
        self.forming
    }
}

/// True-Range ATR over the last `period` closed bars.
pub fn atr(closed: &[Bar], period: usize) -> Option<f64> {
    if closed.len() < period || period == 0 {
        return None;
    }
    let start = closed.len() - period;
    let mut tr_sum = 0.0;
    for i in start..closed.len() {
        let bar = closed[i];
        let prev_close = if i > 0 { closed[i - 1].close } else { bar.open };
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        tr_sum += tr;
    }
    Some(tr_sum / period as f64)
}

pub fn sma(closed: &[Bar], period: usize, offset_from_end: usize) -> Option<f64> {
    if closed.len() < period + offset_from_end {
        return None;
    }
    let end = closed.len() - offset_from_end;
    let start = end - period;
    let sum: f64 = closed[start..end].iter().map(|b| b.close).sum();
    Some(sum / period as f64)
}

pub fn swing_low(closed: &[Bar], period: usize) -> Option<f64> {
    if closed.is_empty() {
        return None;
    }
    let start = closed.len().saturating_sub(period);
    closed[start..].iter().map(|b| b.low).fold(None, |acc, v| {
        Some(acc.map_or(v, |a: f64| a.min(v)))
    })
}

pub fn swing_high(closed: &[Bar], period: usize) -> Option<f64> {
    if closed.is_empty() {
        return None;
    }
    let start = closed.len().saturating_sub(period);
    closed[start..].iter().map(|b| b.high).fold(None, |acc, v| {
        Some(acc.map_or(v, |a: f64| a.max(v)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { timestamp: ts, open: o, high: h, low: l, close: c }
    }

    #[test]
    fn forming_bar_is_excluded_from_closed() {
        let mut ts = Timeseries::new(10);
        ts.push(bar(0, 10.0, 11.0, 9.0, 10.5));
        ts.push(bar(300, 10.5, 12.0, 10.0, 11.5));
        assert_eq!(ts.closed().len(), 1);
        assert_eq!(ts.forming().unwrap().timestamp, 300);
    }

    #[test]
    fn same_timestamp_update_replaces_forming_in_place() {
        let mut ts = Timeseries::new(10);
        ts.push(bar(0, 10.0, 11.0, 9.0, 10.2));
        ts.push(bar(0, 10.0, 11.5, 9.0, 10.8));
        assert_eq!(ts.closed().len(), 0);
        assert_eq!(ts.forming().unwrap().close, 10.8);
    }

    #[test]
    fn atr_requires_full_period() {
        let bars: Vec<Bar> = (0..13).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0)).collect();
        assert!(atr(&bars, 14).is_none());
        let bars14: Vec<Bar> = (0..14).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0)).collect();
        assert!(atr(&bars14, 14).is_some());
    }
}
