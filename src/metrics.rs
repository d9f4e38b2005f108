// =============================================================================
// Advanced Metrics — streaming order-flow derivatives per symbol
// =============================================================================
//
// `update_from_tick` is driven by the selector at the analysis interval and
// computes, from prior state plus the tick:
//
//   quotes speed      — EWMA of inverse inter-quote-change interval (Hz)
//   wick sizes        — (high-low), upper and lower wick in ticks
//   cvd               — explicit cumulative delta when provided, else summed
//   delta burst/flip  — |delta_t - delta_{t-1}| and sign change
//   stacked imbalance — consecutive dominant DOM rows from the top (>= 3:1)
//   absorption        — heavy prints at best bid/ask while mid holds
//   iceberg           — repeated prints at a level whose display barely drops
//   gamma flip        — price crossing the gamma-flip level either way
//   cvd divergence    — price extreme unconfirmed by a CVD extreme
//
// All windows are bounded in both time and count; divisions are guarded.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::market::Snapshot;

const DOM_IMBALANCE_RATIO: f64 = 3.0;
const ABSORPTION_WINDOW_SECS: f64 = 3.0;
const ABSORPTION_MIN_CONTRACTS: f64 = 50.0;
const ABSORPTION_MAX_MID_SPAN_TICKS: f64 = 1.0;
const ICEBERG_WINDOW_SECS: f64 = 4.0;
const ICEBERG_MIN_TRADES: usize = 5;
const ICEBERG_MAX_DISPLAY_DROP_RATIO: f64 = 0.3;
const DIVERGENCE_WINDOW_SECS: f64 = 120.0;
const DIVERGENCE_MIN_SAMPLES: usize = 5;
/// Hard caps so the deques stay bounded even under a hot tape.
const MAX_WINDOW_ENTRIES: usize = 4_096;

/// |delta_t - delta_{t-1}| at or above this counts as a burst.
const DEFAULT_BURST_THRESHOLD: f64 = 100.0;
/// Quote-change EWMA at or above this (Hz) counts as speeding up.
const DEFAULT_SPEED_UP_HZ: f64 = 2.0;

// =============================================================================
// Building blocks
// =============================================================================

/// Exponentially weighted moving average, alpha clamped to (0, 1).
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(1e-6, 1.0 - 1e-6),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(y) => self.alpha * x + (1.0 - self.alpha) * y,
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Per-price-level trade counter over a sliding time window. Price levels
/// are keyed in ticks to avoid float keys.
#[derive(Debug, Clone)]
struct RollingTradeCounter {
    window_secs: f64,
    tick_size: f64,
    q: VecDeque<(f64, i64, f64)>,
    trades_at: HashMap<i64, usize>,
    size_at: HashMap<i64, f64>,
}

impl RollingTradeCounter {
    fn new(window_secs: f64, tick_size: f64) -> Self {
        Self {
            window_secs,
            tick_size,
            q: VecDeque::new(),
            trades_at: HashMap::new(),
            size_at: HashMap::new(),
        }
    }

    fn key(&self, price: f64) -> i64 {
        (price / self.tick_size).round() as i64
    }

    fn push_trade(&mut self, ts: f64, price: f64, size: f64) {
        let key = self.key(price);
        self.q.push_back((ts, key, size));
        *self.trades_at.entry(key).or_default() += 1;
        *self.size_at.entry(key).or_default() += size;
        self.evict(ts);
    }

    fn stats_for(&self, price: f64) -> (usize, f64) {
        let key = self.key(price);
        (
            self.trades_at.get(&key).copied().unwrap_or(0),
            self.size_at.get(&key).copied().unwrap_or(0.0),
        )
    }

    fn evict(&mut self, now: f64) {
        while let Some(&(ts, key, size)) = self.q.front() {
            if now - ts <= self.window_secs && self.q.len() <= MAX_WINDOW_ENTRIES {
                break;
            }
            self.q.pop_front();
            if let Some(n) = self.trades_at.get_mut(&key) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    self.trades_at.remove(&key);
                }
            }
            if let Some(s) = self.size_at.get_mut(&key) {
                *s -= size;
                if *s <= 0.0 {
                    self.size_at.remove(&key);
                }
            }
        }
    }
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

fn consecutive_true(flags: impl Iterator<Item = bool>) -> u32 {
    let mut count = 0;
    for f in flags {
        if f {
            count += 1;
        } else {
            break;
        }
    }
    count
}

// =============================================================================
// Tick input / metrics output
// =============================================================================

/// Input to one metrics update, assembled from the snapshot.
#[derive(Debug, Clone, Default)]
pub struct MetricsTick {
    pub ts: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub delta: Option<f64>,
    pub cvd: Option<f64>,
    pub trade_price: Option<f64>,
    pub trade_size: Option<f64>,
    pub dom_bids: Vec<f64>,
    pub dom_asks: Vec<f64>,
    pub dom_bid_prices: Vec<f64>,
    pub dom_ask_prices: Vec<f64>,
    pub gamma_level: Option<f64>,
}

impl MetricsTick {
    /// Assemble a tick from the current snapshot state.
    pub fn from_snapshot(snap: &Snapshot) -> Self {
        let (open, high, low, close) = match snap.m1_bars.last() {
            Some(b) => (Some(b.open), Some(b.high), Some(b.low), Some(b.close)),
            None => (None, None, None, None),
        };
        let (dom_bids, dom_asks, dom_bid_prices, dom_ask_prices) = match &snap.dom {
            Some(d) => (
                d.bids.clone(),
                d.asks.clone(),
                d.bid_prices.clone(),
                d.ask_prices.clone(),
            ),
            None => (Vec::new(), Vec::new(), Vec::new(), Vec::new()),
        };
        Self {
            ts: snap.ts_last_event,
            best_bid: snap.quote.as_ref().map(|q| q.bid),
            best_ask: snap.quote.as_ref().map(|q| q.ask),
            open,
            high,
            low,
            close,
            delta: snap.m1_nbcv.as_ref().map(|n| n.delta),
            cvd: snap.m1_nbcv.as_ref().and_then(|n| n.cumulative_delta),
            trade_price: snap.last_trade.as_ref().map(|t| t.price),
            trade_size: snap.last_trade.as_ref().map(|t| t.qty),
            dom_bids,
            dom_asks,
            dom_bid_prices,
            dom_ask_prices,
            gamma_level: snap.menthorq.zero_dte.gamma_wall,
        }
    }
}

/// Flat metric view produced by each update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowMetrics {
    pub quotes_speed_hz: f64,
    pub quotes_speed_up: bool,

    pub last_wick_ticks: Option<f64>,
    pub last_upper_wick_ticks: Option<f64>,
    pub last_lower_wick_ticks: Option<f64>,

    pub cvd: f64,
    pub delta_burst: f64,
    pub delta_burst_active: bool,
    pub delta_flip: bool,

    pub stacked_rows_ask: u32,
    pub stacked_rows_bid: u32,

    pub absorption_bid: bool,
    pub absorption_ask: bool,
    /// Price at which the detected absorption occurred.
    pub absorption_price: Option<f64>,

    pub iceberg: bool,

    pub gamma_flip_up: bool,
    pub gamma_flip_down: bool,

    pub cvd_divergence_bearish: bool,
    pub cvd_divergence_bullish: bool,
}

// =============================================================================
// AdvancedMetrics
// =============================================================================

/// Stateful per-symbol calculator.
pub struct AdvancedMetrics {
    tick_size: f64,
    burst_threshold: f64,
    speed_up_hz: f64,

    last_bbo: Option<(f64, f64, f64)>,
    quotes_ewma: Ewma,

    prev_delta: Option<f64>,
    cvd: f64,

    absorb_buf: VecDeque<(f64, f64, f64, f64, f64, f64)>,

    rolling_trades: RollingTradeCounter,
    displayed_qty: HashMap<i64, f64>,

    prev_price: Option<f64>,

    divergence_buf: VecDeque<(f64, f64, f64)>,
}

impl AdvancedMetrics {
    pub fn new(tick_size: f64) -> Self {
        Self {
            tick_size,
            burst_threshold: DEFAULT_BURST_THRESHOLD,
            speed_up_hz: DEFAULT_SPEED_UP_HZ,
            last_bbo: None,
            quotes_ewma: Ewma::new(0.3),
            prev_delta: None,
            cvd: 0.0,
            absorb_buf: VecDeque::new(),
            rolling_trades: RollingTradeCounter::new(ICEBERG_WINDOW_SECS, tick_size),
            displayed_qty: HashMap::new(),
            prev_price: None,
            divergence_buf: VecDeque::new(),
        }
    }

    /// Compute all metrics from the prior state plus one tick.
    pub fn update_from_tick(&mut self, tick: &MetricsTick) -> FlowMetrics {
        let mut out = FlowMetrics::default();
        let ts = tick.ts;

        // ── Quote speed ──────────────────────────────────────────────────
        if let (Some(bb), Some(ba)) = (tick.best_bid, tick.best_ask) {
            match self.last_bbo {
                None => {
                    self.last_bbo = Some((bb, ba, ts));
                }
                Some((lbb, lba, lts)) => {
                    let changed = (bb - lbb).abs() > f64::EPSILON || (ba - lba).abs() > f64::EPSILON;
                    if changed {
                        let dt = (ts - lts).max(1e-6);
                        self.quotes_ewma.update(1.0 / dt);
                        self.last_bbo = Some((bb, ba, ts));
                    }
                }
            }
        }
        out.quotes_speed_hz = self.quotes_ewma.value().unwrap_or(0.0);
        out.quotes_speed_up = out.quotes_speed_hz >= self.speed_up_hz;

        // ── Wick sizes ───────────────────────────────────────────────────
        if let (Some(o), Some(h), Some(l), Some(c)) = (tick.open, tick.high, tick.low, tick.close)
        {
            let tick_sz = self.tick_size.max(f64::EPSILON);
            out.last_wick_ticks = Some((h - l) / tick_sz);
            out.last_upper_wick_ticks = Some((h - o.max(c)).max(0.0) / tick_sz);
            out.last_lower_wick_ticks = Some((o.min(c) - l).max(0.0) / tick_sz);
        }

        // ── CVD ──────────────────────────────────────────────────────────
        if let Some(explicit) = tick.cvd {
            self.cvd = explicit;
        } else if let Some(d) = tick.delta {
            self.cvd += d;
        }
        out.cvd = self.cvd;

        // ── Delta burst / flip ───────────────────────────────────────────
        let curr_delta = tick.delta.or(self.prev_delta).unwrap_or(0.0);
        if let Some(prev) = self.prev_delta {
            out.delta_burst = (curr_delta - prev).abs();
            out.delta_flip = sign(curr_delta) != sign(prev);
        }
        out.delta_burst_active = out.delta_burst >= self.burst_threshold;
        self.prev_delta = Some(curr_delta);

        // ── Stacked DOM imbalance ────────────────────────────────────────
        let depth = tick.dom_bids.len().min(tick.dom_asks.len());
        if depth > 0 {
            out.stacked_rows_ask = consecutive_true((0..depth).map(|k| {
                let a = tick.dom_asks[k].max(0.0);
                let b = tick.dom_bids[k].max(0.0);
                a / b.max(1.0) >= DOM_IMBALANCE_RATIO
            }));
            out.stacked_rows_bid = consecutive_true((0..depth).map(|k| {
                let a = tick.dom_asks[k].max(0.0);
                let b = tick.dom_bids[k].max(0.0);
                b / a.max(1.0) >= DOM_IMBALANCE_RATIO
            }));
        }

        // ── Absorption ───────────────────────────────────────────────────
        let mid = match (tick.best_bid, tick.best_ask) {
            (Some(bb), Some(ba)) => Some(0.5 * (bb + ba)),
            _ => None,
        };
        let mut traded_at_bid = 0.0;
        let mut traded_at_ask = 0.0;
        if let (Some(tp), Some(tsz), Some(bb), Some(ba)) =
            (tick.trade_price, tick.trade_size, tick.best_bid, tick.best_ask)
        {
            if tsz > 0.0 {
                if tp <= bb {
                    traded_at_bid = tsz;
                } else if tp >= ba {
                    traded_at_ask = tsz;
                }
            }
        }
        self.absorb_buf.push_back((
            ts,
            tick.best_bid.unwrap_or(0.0),
            tick.best_ask.unwrap_or(0.0),
            mid.unwrap_or(f64::NAN),
            traded_at_bid,
            traded_at_ask,
        ));
        while let Some(&(front_ts, ..)) = self.absorb_buf.front() {
            if ts - front_ts <= ABSORPTION_WINDOW_SECS && self.absorb_buf.len() <= MAX_WINDOW_ENTRIES
            {
                break;
            }
            self.absorb_buf.pop_front();
        }
        out.absorption_bid = self.absorbed(|e| e.4);
        out.absorption_ask = self.absorbed(|e| e.5);
        if out.absorption_bid {
            out.absorption_price = tick.best_bid;
        } else if out.absorption_ask {
            out.absorption_price = tick.best_ask;
        }

        // ── Iceberg ──────────────────────────────────────────────────────
        if let (Some(tp), Some(tsz)) = (tick.trade_price, tick.trade_size) {
            if tsz > 0.0 {
                self.rolling_trades.push_trade(ts, tp, tsz);
            }
        }
        out.iceberg = self.detect_iceberg(tick);

        // ── Gamma flip ───────────────────────────────────────────────────
        let price_t = mid.or(tick.close).or(tick.trade_price);
        if let (Some(p), Some(level), Some(prev)) = (price_t, tick.gamma_level, self.prev_price) {
            out.gamma_flip_up = prev < level && p >= level;
            out.gamma_flip_down = prev > level && p <= level;
        }
        self.prev_price = price_t;

        // ── CVD divergence ───────────────────────────────────────────────
        if let Some(p) = price_t {
            let (bear, bull) = self.detect_divergence(ts, p, self.cvd);
            out.cvd_divergence_bearish = bear;
            out.cvd_divergence_bullish = bull;
            self.divergence_buf.push_back((ts, p, self.cvd));
            while let Some(&(front_ts, ..)) = self.divergence_buf.front() {
                if ts - front_ts <= DIVERGENCE_WINDOW_SECS
                    && self.divergence_buf.len() <= MAX_WINDOW_ENTRIES
                {
                    break;
                }
                self.divergence_buf.pop_front();
            }
        }

        out
    }

    fn absorbed(&self, vol_of: impl Fn(&(f64, f64, f64, f64, f64, f64)) -> f64) -> bool {
        if self.absorb_buf.len() < 2 {
            return false;
        }
        let total: f64 = self.absorb_buf.iter().map(&vol_of).sum();
        if total < ABSORPTION_MIN_CONTRACTS {
            return false;
        }
        let mids: Vec<f64> = self
            .absorb_buf
            .iter()
            .map(|e| e.3)
            .filter(|m| m.is_finite())
            .collect();
        if mids.len() < 2 {
            return false;
        }
        let span_ticks = (mids.iter().cloned().fold(f64::MIN, f64::max)
            - mids.iter().cloned().fold(f64::MAX, f64::min))
            / self.tick_size.max(f64::EPSILON);
        span_ticks <= ABSORPTION_MAX_MID_SPAN_TICKS
    }

    fn detect_iceberg(&mut self, tick: &MetricsTick) -> bool {
        let sides = [
            (&tick.dom_bid_prices, &tick.dom_bids),
            (&tick.dom_ask_prices, &tick.dom_asks),
        ];
        for (prices, qtys) in sides {
            let (Some(&p0), Some(&q0)) = (prices.first(), qtys.first()) else {
                continue;
            };
            let (trades_n, trades_sz) = self.rolling_trades.stats_for(p0);
            let key = self.rolling_trades.key(p0);
            let prev_display = self.displayed_qty.get(&key).copied().unwrap_or(q0);
            let display_drop = (prev_display - q0).max(0.0);
            self.displayed_qty.insert(key, q0);
            // Many prints at the level while the displayed size holds.
            if trades_n >= ICEBERG_MIN_TRADES
                && trades_sz > 0.0
                && display_drop < ICEBERG_MAX_DISPLAY_DROP_RATIO * trades_sz
            {
                return true;
            }
        }
        false
    }

    fn detect_divergence(&self, _ts: f64, price: f64, cvd: f64) -> (bool, bool) {
        if self.divergence_buf.len() < DIVERGENCE_MIN_SAMPLES {
            return (false, false);
        }
        let mut max_p = f64::MIN;
        let mut min_p = f64::MAX;
        let mut max_c = f64::MIN;
        let mut min_c = f64::MAX;
        for &(_, p, c) in &self.divergence_buf {
            max_p = max_p.max(p);
            min_p = min_p.min(p);
            max_c = max_c.max(c);
            min_c = min_c.min(c);
        }
        let bearish = price > max_p && cvd <= max_c;
        let bullish = price < min_p && cvd >= min_c;
        (bearish, bullish)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> AdvancedMetrics {
        AdvancedMetrics::new(0.25)
    }

    fn quote_tick(ts: f64, bid: f64, ask: f64) -> MetricsTick {
        MetricsTick {
            ts,
            best_bid: Some(bid),
            best_ask: Some(ask),
            ..MetricsTick::default()
        }
    }

    #[test]
    fn ewma_first_value_passes_through() {
        let mut e = Ewma::new(0.3);
        assert!((e.update(10.0) - 10.0).abs() < f64::EPSILON);
        assert!((e.update(0.0) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn ewma_alpha_is_clamped() {
        let mut e = Ewma::new(5.0);
        e.update(1.0);
        let second = e.update(0.0);
        assert!(second.is_finite());
        assert!(second >= 0.0 && second <= 1.0);
    }

    #[test]
    fn quote_speed_zero_when_unchanged() {
        let mut m = metrics();
        let out1 = m.update_from_tick(&quote_tick(1.0, 6500.0, 6500.25));
        assert!((out1.quotes_speed_hz - 0.0).abs() < f64::EPSILON);
        // Same BBO again: still zero.
        let out2 = m.update_from_tick(&quote_tick(2.0, 6500.0, 6500.25));
        assert!((out2.quotes_speed_hz - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn quote_speed_tracks_change_frequency() {
        let mut m = metrics();
        m.update_from_tick(&quote_tick(1.0, 6500.0, 6500.25));
        // Change every 0.25 s -> instantaneous 4 Hz.
        let mut out = FlowMetrics::default();
        for i in 1..=8 {
            let px = 6500.0 + i as f64 * 0.25;
            out = m.update_from_tick(&quote_tick(1.0 + i as f64 * 0.25, px, px + 0.25));
        }
        assert!(out.quotes_speed_hz > 3.0, "got {}", out.quotes_speed_hz);
        assert!(out.quotes_speed_up);
    }

    #[test]
    fn wick_measurement_in_ticks() {
        let mut m = metrics();
        let tick = MetricsTick {
            ts: 1.0,
            open: Some(6500.0),
            high: Some(6502.0),
            low: Some(6498.0),
            close: Some(6501.0),
            ..MetricsTick::default()
        };
        let out = m.update_from_tick(&tick);
        assert!((out.last_wick_ticks.unwrap() - 16.0).abs() < 1e-9);
        assert!((out.last_upper_wick_ticks.unwrap() - 4.0).abs() < 1e-9);
        assert!((out.last_lower_wick_ticks.unwrap() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn cvd_explicit_overrides_accumulation() {
        let mut m = metrics();
        let mut tick = MetricsTick {
            ts: 1.0,
            delta: Some(10.0),
            ..MetricsTick::default()
        };
        assert!((m.update_from_tick(&tick).cvd - 10.0).abs() < f64::EPSILON);
        tick.ts = 2.0;
        tick.delta = Some(5.0);
        assert!((m.update_from_tick(&tick).cvd - 15.0).abs() < f64::EPSILON);
        // Explicit cumulative wins.
        tick.ts = 3.0;
        tick.cvd = Some(100.0);
        assert!((m.update_from_tick(&tick).cvd - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn delta_burst_and_flip() {
        let mut m = metrics();
        let mk = |ts: f64, delta: f64| MetricsTick {
            ts,
            delta: Some(delta),
            ..MetricsTick::default()
        };
        m.update_from_tick(&mk(1.0, 50.0));
        let out = m.update_from_tick(&mk(2.0, -80.0));
        assert!((out.delta_burst - 130.0).abs() < 1e-9);
        assert!(out.delta_burst_active);
        assert!(out.delta_flip);

        let out = m.update_from_tick(&mk(3.0, -90.0));
        assert!(!out.delta_flip);
        assert!(!out.delta_burst_active);
    }

    #[test]
    fn stacked_imbalance_counts_consecutive_rows() {
        let mut m = metrics();
        let tick = MetricsTick {
            ts: 1.0,
            dom_bids: vec![300.0, 280.0, 250.0, 40.0, 200.0],
            dom_asks: vec![50.0, 60.0, 70.0, 200.0, 30.0],
            ..MetricsTick::default()
        };
        let out = m.update_from_tick(&tick);
        // Bid dominates rows 0..2 at >= 3:1, breaks at row 3.
        assert_eq!(out.stacked_rows_bid, 3);
        assert_eq!(out.stacked_rows_ask, 0);
    }

    #[test]
    fn absorption_at_bid_requires_volume_and_held_mid() {
        let mut m = metrics();
        // 6 prints of 10 contracts hitting the bid within 3 s, mid pinned.
        let mut out = FlowMetrics::default();
        for i in 0..6 {
            let tick = MetricsTick {
                ts: 1.0 + i as f64 * 0.4,
                best_bid: Some(6500.0),
                best_ask: Some(6500.25),
                trade_price: Some(6500.0),
                trade_size: Some(10.0),
                ..MetricsTick::default()
            };
            out = m.update_from_tick(&tick);
        }
        assert!(out.absorption_bid);
        assert!(!out.absorption_ask);
        assert_eq!(out.absorption_price, Some(6500.0));
    }

    #[test]
    fn no_absorption_when_mid_travels() {
        let mut m = metrics();
        let mut out = FlowMetrics::default();
        for i in 0..6 {
            let px = 6500.0 + i as f64 * 0.5; // mid walks 2 ticks per step
            let tick = MetricsTick {
                ts: 1.0 + i as f64 * 0.4,
                best_bid: Some(px),
                best_ask: Some(px + 0.25),
                trade_price: Some(px),
                trade_size: Some(20.0),
                ..MetricsTick::default()
            };
            out = m.update_from_tick(&tick);
        }
        assert!(!out.absorption_bid);
    }

    #[test]
    fn iceberg_when_display_holds_against_prints() {
        let mut m = metrics();
        let mut out = FlowMetrics::default();
        for i in 0..6 {
            let tick = MetricsTick {
                ts: 1.0 + i as f64 * 0.5,
                trade_price: Some(6500.0),
                trade_size: Some(20.0),
                dom_bid_prices: vec![6500.0],
                dom_bids: vec![100.0], // display never drops
                dom_ask_prices: vec![6500.25],
                dom_asks: vec![80.0],
                ..MetricsTick::default()
            };
            out = m.update_from_tick(&tick);
        }
        assert!(out.iceberg);
    }

    #[test]
    fn no_iceberg_when_display_depletes() {
        let mut m = metrics();
        let mut out = FlowMetrics::default();
        for i in 0..6 {
            let tick = MetricsTick {
                ts: 1.0 + i as f64 * 0.5,
                trade_price: Some(6500.0),
                trade_size: Some(20.0),
                dom_bid_prices: vec![6500.0],
                dom_bids: vec![200.0 - i as f64 * 40.0], // display drains in step with the prints
                dom_ask_prices: vec![6500.25],
                dom_asks: vec![80.0],
                ..MetricsTick::default()
            };
            out = m.update_from_tick(&tick);
        }
        assert!(!out.iceberg);
    }

    #[test]
    fn gamma_flip_both_directions() {
        let mut m = metrics();
        let mk = |ts: f64, bid: f64| MetricsTick {
            ts,
            best_bid: Some(bid),
            best_ask: Some(bid + 0.25),
            gamma_level: Some(6500.0),
            ..MetricsTick::default()
        };
        m.update_from_tick(&mk(1.0, 6498.0));
        let out = m.update_from_tick(&mk(2.0, 6500.5));
        assert!(out.gamma_flip_up);
        assert!(!out.gamma_flip_down);
        let out = m.update_from_tick(&mk(3.0, 6497.0));
        assert!(out.gamma_flip_down);
    }

    #[test]
    fn cvd_divergence_bearish_on_unconfirmed_high() {
        let mut m = metrics();
        // Rising price with rising delta-less cvd, then a new high with no
        // delta at all (cvd flat).
        for i in 0..8 {
            let tick = MetricsTick {
                ts: 1.0 + i as f64,
                best_bid: Some(6500.0 + i as f64 * 0.25),
                best_ask: Some(6500.25 + i as f64 * 0.25),
                delta: Some(20.0),
                ..MetricsTick::default()
            };
            m.update_from_tick(&tick);
        }
        // New price high, negative delta pulls CVD off its high.
        let out = m.update_from_tick(&MetricsTick {
            ts: 10.0,
            best_bid: Some(6505.0),
            best_ask: Some(6505.25),
            delta: Some(-200.0),
            ..MetricsTick::default()
        });
        assert!(out.cvd_divergence_bearish);
        assert!(!out.cvd_divergence_bullish);
    }
}
