// =============================================================================
// Bar buffer — bounded per-timeframe OHLCV history
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A single OHLCV bar from the unified stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    /// Epoch seconds of the bar timestamp.
    pub ts: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
}

impl Bar {
    /// OHLC sanity: `low <= min(open, close) <= max(open, close) <= high`.
    pub fn is_valid(&self) -> bool {
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        self.low <= body_lo && body_hi <= self.high
    }
}

/// Ring buffer of bars ordered by ascending timestamp, capped at `max_bars`.
/// A bar arriving with the timestamp of the newest entry replaces it
/// (in-progress update); older timestamps are rejected as duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarBuffer {
    bars: VecDeque<Bar>,
    max_bars: usize,
}

impl BarBuffer {
    pub fn new(max_bars: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(max_bars + 1),
            max_bars,
        }
    }

    /// Insert a bar, enforcing order, dedup and the cap.
    ///
    /// Returns false when the bar is invalid or older than the newest entry.
    pub fn push(&mut self, bar: Bar) -> bool {
        if !bar.is_valid() {
            return false;
        }
        if let Some(last) = self.bars.back() {
            if bar.ts < last.ts {
                return false;
            }
            if (bar.ts - last.ts).abs() < f64::EPSILON {
                // Same bar revised in place.
                self.bars.pop_back();
            }
        }
        self.bars.push_back(bar);
        while self.bars.len() > self.max_bars {
            self.bars.pop_front();
        }
        true
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    /// Most recent `count` bars, oldest first.
    pub fn recent(&self, count: usize) -> Vec<Bar> {
        let start = self.bars.len().saturating_sub(count);
        self.bars.iter().skip(start).cloned().collect()
    }

    /// Simple ATR proxy: mean true range over the last `period` bars.
    pub fn atr_proxy(&self, period: usize) -> Option<f64> {
        if self.bars.len() < 2 {
            return None;
        }
        let n = self.bars.len();
        let start = n.saturating_sub(period + 1);
        let mut sum = 0.0;
        let mut count = 0usize;
        let bars: Vec<&Bar> = self.bars.iter().skip(start).collect();
        for pair in bars.windows(2) {
            let prev_close = pair[0].close;
            let b = pair[1];
            let tr = (b.high - b.low)
                .max((b.high - prev_close).abs())
                .max((b.low - prev_close).abs());
            sum += tr;
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Range (high - low) of the newest bar.
    pub fn last_range(&self) -> Option<f64> {
        self.bars.back().map(|b| b.high - b.low)
    }
}
