// =============================================================================
// Market Snapshot — per-symbol in-memory view of the unified stream
// =============================================================================
//
// `apply_event` is the only mutator and is called solely by the event
// dispatch task; the selector driver reads cloned views. Sections:
//
//   m1       — 1-minute bars (chart 3) + VWAP/bands, value area, footprint
//   m30      — 30-minute bars (chart 4) + current/previous VWAP, footprint
//   vix      — volatility index with regime and runtime policy key
//   menthorq — option-derived level book with staleness tracking
//   derived  — m30 range, ATR proxy, average spread, VWAP distance
//
// The volatility index is market-wide: a chart-8 print updates the VIX
// section of every active symbol.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MenthorqIntervals;
use crate::events::FeedEvent;
use crate::market::bars::{Bar, BarBuffer};
use crate::market::levels::LevelBook;
use crate::types::{tick_size_for, VixRegime};

pub const M1_HISTORY_CAP: usize = 300;
pub const M30_HISTORY_CAP: usize = 96;

/// Alpha for the running average of the top-of-book spread.
const SPREAD_EWMA_ALPHA: f64 = 0.2;
/// Lookback for the m1 ATR proxy.
const ATR_PROXY_PERIOD: usize = 14;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VwapState {
    pub vwap: f64,
    pub sd1_up: Option<f64>,
    pub sd1_dn: Option<f64>,
    pub sd2_up: Option<f64>,
    pub sd2_dn: Option<f64>,
    pub ts: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VvaState {
    pub vpoc: f64,
    pub vah: f64,
    pub val: f64,
    pub pval: Option<f64>,
    pub session_id: Option<i64>,
    pub ts: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NbcvState {
    pub delta: f64,
    pub cumulative_delta: Option<f64>,
    pub trades_count: Option<u64>,
    pub ts: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VixState {
    pub last_value: Option<f64>,
    pub ts: f64,
    pub regime: VixRegime,
    /// Free-form runtime key consumed by the risk gate.
    pub policy: String,
}

impl Default for VixState {
    fn default() -> Self {
        Self {
            last_value: None,
            ts: 0.0,
            regime: VixRegime::Mid,
            policy: "normal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteState {
    pub bid: f64,
    pub ask: f64,
    pub ts: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastTrade {
    pub price: f64,
    pub qty: f64,
    pub ts: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomState {
    pub bids: Vec<f64>,
    pub asks: Vec<f64>,
    pub bid_prices: Vec<f64>,
    pub ask_prices: Vec<f64>,
    pub ts: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceVsVwap {
    Above,
    Below,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedState {
    pub m30_range: Option<f64>,
    pub atr_proxy: Option<f64>,
    pub spread_avg: Option<f64>,
    pub vwap_distance: Option<f64>,
    pub pos_vs_vwap: Option<PriceVsVwap>,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Complete per-symbol market state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub sym: String,
    pub tick_size: f64,
    pub ts_last_event: f64,

    pub m1_bars: BarBuffer,
    pub m1_vwap: Option<VwapState>,
    pub m1_vva: Option<VvaState>,
    pub m1_nbcv: Option<NbcvState>,

    pub m30_bars: BarBuffer,
    pub m30_vwap_current: Option<VwapState>,
    pub m30_vwap_previous: Option<VwapState>,
    pub m30_nbcv: Option<NbcvState>,

    pub vix: VixState,
    pub menthorq: LevelBook,

    pub quote: Option<QuoteState>,
    pub last_trade: Option<LastTrade>,
    pub dom: Option<DomState>,

    /// Recent m1 VWAP one-sigma band widths, newest last.
    pub band_width_history: std::collections::VecDeque<f64>,

    pub derived: DerivedState,
}

/// Bars of band-width history retained for squeeze detection.
pub const BAND_WIDTH_HISTORY_CAP: usize = 64;

impl Snapshot {
    pub fn new(sym: impl Into<String>) -> Self {
        let sym = sym.into();
        let tick_size = tick_size_for(&sym);
        Self {
            sym,
            tick_size,
            ts_last_event: 0.0,
            m1_bars: BarBuffer::new(M1_HISTORY_CAP),
            m1_vwap: None,
            m1_vva: None,
            m1_nbcv: None,
            m30_bars: BarBuffer::new(M30_HISTORY_CAP),
            m30_vwap_current: None,
            m30_vwap_previous: None,
            m30_nbcv: None,
            vix: VixState::default(),
            menthorq: LevelBook::default(),
            quote: None,
            last_trade: None,
            dom: None,
            band_width_history: std::collections::VecDeque::new(),
            derived: DerivedState::default(),
        }
    }

    /// Synthetic depth ladder derived from the newest m30 bar, used when no
    /// real DOM has been received: bid/ask volume spread evenly over five
    /// levels on each side of the close.
    pub fn m30_dom_synthetic(&self) -> Option<DomState> {
        if self.dom.is_some() {
            return None;
        }
        let bar = self.m30_bars.last()?;
        let levels = 5usize;
        let per_bid = (bar.bid_volume / levels as f64).max(1.0);
        let per_ask = (bar.ask_volume / levels as f64).max(1.0);
        let mut dom = DomState {
            ts: bar.ts,
            ..DomState::default()
        };
        for k in 0..levels {
            let offset = (k + 1) as f64 * self.tick_size;
            dom.bid_prices.push(bar.close - offset);
            dom.bids.push(per_bid);
            dom.ask_prices.push(bar.close + offset);
            dom.asks.push(per_ask);
        }
        Some(dom)
    }

    /// Best-known last price: trade, then quote mid, then m1 close.
    pub fn last_price(&self) -> Option<f64> {
        if let Some(t) = &self.last_trade {
            return Some(t.price);
        }
        if let Some(q) = &self.quote {
            if q.bid > 0.0 && q.ask > 0.0 {
                return Some(0.5 * (q.bid + q.ask));
            }
        }
        self.m1_bars.last().map(|b| b.close)
    }

    fn recompute_derived(&mut self) {
        self.derived.m30_range = self.m30_bars.last_range();
        self.derived.atr_proxy = self.m1_bars.atr_proxy(ATR_PROXY_PERIOD);

        let price = self.last_price();
        let vwap = self.m1_vwap.as_ref().map(|v| v.vwap);
        match (price, vwap) {
            (Some(p), Some(v)) if v > 0.0 => {
                self.derived.vwap_distance = Some(p - v);
                self.derived.pos_vs_vwap = Some(if p >= v {
                    PriceVsVwap::Above
                } else {
                    PriceVsVwap::Below
                });
            }
            _ => {
                self.derived.vwap_distance = None;
                self.derived.pos_vs_vwap = None;
            }
        }
    }

    fn update_spread_avg(&mut self, bid: f64, ask: f64) {
        if ask <= bid {
            return;
        }
        let spread = ask - bid;
        self.derived.spread_avg = Some(match self.derived.spread_avg {
            Some(avg) => SPREAD_EWMA_ALPHA * spread + (1.0 - SPREAD_EWMA_ALPHA) * avg,
            None => spread,
        });
    }
}

// =============================================================================
// SnapshotStore
// =============================================================================

/// Map of per-symbol snapshots. Written only by the event dispatch task,
/// read (cloned) by the selector driver.
pub struct SnapshotStore {
    snaps: RwLock<HashMap<String, Snapshot>>,
    vix_low_max: f64,
    vix_mid_max: f64,
    menthorq_intervals: MenthorqIntervals,
    /// Market-wide VIX, carried into snapshots created after the print.
    global_vix: RwLock<Option<(f64, f64)>>,
}

impl SnapshotStore {
    pub fn new(vix_low_max: f64, vix_mid_max: f64, intervals: MenthorqIntervals) -> Self {
        Self {
            snaps: RwLock::new(HashMap::new()),
            vix_low_max,
            vix_mid_max,
            menthorq_intervals: intervals,
            global_vix: RwLock::new(None),
        }
    }

    /// Pre-create snapshots for the configured symbols.
    pub fn register_symbols(&self, symbols: &[String]) {
        let mut snaps = self.snaps.write();
        for sym in symbols {
            snaps
                .entry(sym.clone())
                .or_insert_with(|| Snapshot::new(sym.clone()));
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.snaps.read().keys().cloned().collect()
    }

    /// Read-only clone of a symbol's snapshot.
    pub fn get(&self, sym: &str) -> Option<Snapshot> {
        self.snaps.read().get(sym).cloned()
    }

    /// Apply one event. Returns the affected symbol when the event mutated
    /// a snapshot (the dispatch task notifies the selector driver with it).
    pub fn apply_event(&self, event: &FeedEvent) -> Option<String> {
        let ts = event.epoch_secs()?;

        // VIX is market-wide: fan out to every snapshot.
        if let FeedEvent::Vix(v) = event {
            *self.global_vix.write() = Some((v.last, ts));
            let mut snaps = self.snaps.write();
            for snap in snaps.values_mut() {
                self.apply_vix(snap, v.last, ts);
                snap.ts_last_event = snap.ts_last_event.max(ts);
                self.refresh_stale(snap, ts);
            }
            return Some(v.sym.clone());
        }

        let sym = event.symbol()?.to_string();
        let mut snaps = self.snaps.write();
        let snap = snaps.entry(sym.clone()).or_insert_with(|| {
            let mut s = Snapshot::new(sym.clone());
            if let Some((last, vts)) = *self.global_vix.read() {
                self.apply_vix(&mut s, last, vts);
            }
            s
        });

        match event {
            FeedEvent::BaseData(e) => {
                let bar = Bar {
                    ts,
                    open: e.open,
                    high: e.high,
                    low: e.low,
                    close: e.close,
                    volume: e.volume,
                    bid_volume: e.bid_volume,
                    ask_volume: e.ask_volume,
                };
                let buf = if e.chart == 4 {
                    &mut snap.m30_bars
                } else {
                    &mut snap.m1_bars
                };
                if !buf.push(bar) {
                    debug!(sym = %snap.sym, chart = e.chart, "dropped out-of-order or invalid bar");
                }
            }
            FeedEvent::Vwap(e) => {
                let state = VwapState {
                    vwap: e.v,
                    sd1_up: e.up1,
                    sd1_dn: e.dn1,
                    sd2_up: e.up2,
                    sd2_dn: e.dn2,
                    ts,
                };
                if e.chart == 4 {
                    snap.m30_vwap_previous = snap.m30_vwap_current.take();
                    snap.m30_vwap_current = Some(state);
                } else {
                    if let (Some(up), Some(dn)) = (state.sd1_up, state.sd1_dn) {
                        if up > dn {
                            snap.band_width_history.push_back(up - dn);
                            while snap.band_width_history.len() > BAND_WIDTH_HISTORY_CAP {
                                snap.band_width_history.pop_front();
                            }
                        }
                    }
                    snap.m1_vwap = Some(state);
                }
            }
            FeedEvent::Vva(e) => {
                snap.m1_vva = Some(VvaState {
                    vpoc: e.vpoc,
                    vah: e.vah,
                    val: e.val,
                    pval: e.pval,
                    session_id: e.id_curr,
                    ts,
                });
            }
            FeedEvent::Nbcv(e) => {
                let state = NbcvState {
                    delta: e.delta,
                    cumulative_delta: e.cumulative_delta,
                    trades_count: e.trades_count,
                    ts,
                };
                if e.chart == 4 {
                    snap.m30_nbcv = Some(state);
                } else {
                    snap.m1_nbcv = Some(state);
                }
            }
            FeedEvent::Quote(e) => {
                snap.update_spread_avg(e.bid, e.ask);
                snap.quote = Some(QuoteState {
                    bid: e.bid,
                    ask: e.ask,
                    ts,
                });
            }
            FeedEvent::Trade(e) => {
                snap.last_trade = Some(LastTrade {
                    price: e.price,
                    qty: e.qty,
                    ts,
                });
            }
            FeedEvent::Depth(e) => {
                snap.dom = Some(DomState {
                    bids: e.dom_bids.clone(),
                    asks: e.dom_asks.clone(),
                    bid_prices: e.dom_bid_prices.clone(),
                    ask_prices: e.dom_ask_prices.clone(),
                    ts,
                });
            }
            FeedEvent::MenthorqLevel(e) => {
                snap.menthorq.apply(&e.level_type, e.price, e.subgraph, ts);
            }
            FeedEvent::Vix(_) | FeedEvent::Other => {}
        }

        snap.ts_last_event = snap.ts_last_event.max(ts);
        snap.recompute_derived();
        self.refresh_stale(snap, ts);

        Some(sym)
    }

    fn apply_vix(&self, snap: &mut Snapshot, last: f64, ts: f64) {
        let regime = VixRegime::classify(last, self.vix_low_max, self.vix_mid_max);
        snap.vix.last_value = Some(last);
        snap.vix.ts = ts;
        snap.vix.regime = regime;
        snap.vix.policy = match regime {
            VixRegime::Low => "normal".to_string(),
            VixRegime::Mid => "reduced".to_string(),
            VixRegime::High => "defensive".to_string(),
        };
    }

    fn refresh_stale(&self, snap: &mut Snapshot, now: f64) {
        let interval = match snap.vix.regime {
            VixRegime::Low => self.menthorq_intervals.low,
            VixRegime::Mid => self.menthorq_intervals.mid,
            VixRegime::High => self.menthorq_intervals.high,
        };
        if snap.menthorq.refresh_stale(now, interval) {
            warn!(
                sym = %snap.sym,
                last_update = snap.menthorq.last_update.unwrap_or(0.0),
                interval_secs = interval,
                "menthorq levels went stale"
            );
        }
    }
}
