// =============================================================================
// Feature view — the flat context consumed by strategies and the selector
// =============================================================================
//
// Built once per selector tick by cloning the minimal state out of the
// snapshot and combining it with the latest flow metrics. Strategies never
// touch the snapshot or the raw stream.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market::snapshot::{PriceVsVwap, Snapshot};
use crate::metrics::FlowMetrics;
use crate::session::{SessionManager, SessionPhase};
use crate::types::VixRegime;

/// How many recent m1 bars feed the swing high/low and pin lookbacks.
const RECENT_BAR_LOOKBACK: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VwapView {
    pub vwap: f64,
    pub sd1_up: Option<f64>,
    pub sd1_dn: Option<f64>,
    pub sd2_up: Option<f64>,
    pub sd2_dn: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VvaView {
    pub vpoc: f64,
    pub vah: f64,
    pub val: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZeroDteView {
    pub call: Option<f64>,
    pub put: Option<f64>,
    pub gamma_wall: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenthorqView {
    pub stale: bool,
    pub call_resistance: Option<f64>,
    pub put_support: Option<f64>,
    pub hvl: Option<f64>,
    pub gamma_wall_0dte: Option<f64>,
    pub d1_min: Option<f64>,
    pub d1_max: Option<f64>,
    pub zero_dte: ZeroDteView,
    pub gex_levels: Vec<f64>,
    pub blind_spots: Vec<f64>,
    pub swing_levels: Vec<f64>,
    /// Price crossed the gamma-flip level on this tick (either direction).
    pub gamma_flip: bool,
}

/// Sibling-index view for the lead-lag strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub sym: String,
    pub last_price: Option<f64>,
    pub d1_min: Option<f64>,
    pub d1_max: Option<f64>,
}

/// Flat per-tick context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub sym: String,
    pub ts: f64,
    pub tick_size: f64,

    pub last_price: Option<f64>,
    pub atr: Option<f64>,
    pub vwap: Option<VwapView>,
    pub vva: Option<VvaView>,
    pub menthorq: MenthorqView,
    pub orderflow: FlowMetrics,

    pub vix: Option<f64>,
    pub vix_regime: VixRegime,

    pub session_phase: SessionPhase,
    pub in_trading_window: bool,
    pub in_opening_window: bool,

    pub pos_vs_vwap: Option<PriceVsVwap>,
    pub vwap_distance: Option<f64>,

    /// One-sigma VWAP band width, newest value.
    pub band_width: Option<f64>,
    /// Median band width over the retained history.
    pub band_width_median: Option<f64>,

    /// Swing extremes over the recent m1 bars, excluding the newest bar.
    pub recent_high: Option<f64>,
    pub recent_low: Option<f64>,
    /// Recent m1 closes, oldest first, newest last.
    pub recent_closes: Vec<f64>,

    /// Sentiment in [-1, +1] blended from orderflow, VWAP position,
    /// value-area context and the VIX filter.
    pub dealer_bias: f64,

    pub peer: Option<PeerView>,
}

impl FeatureSet {
    pub fn build(
        snap: &Snapshot,
        metrics: &FlowMetrics,
        sessions: &SessionManager,
        peer: Option<&Snapshot>,
    ) -> Self {
        let ts = snap.ts_last_event;
        let last_price = snap.last_price();

        let vwap = snap.m1_vwap.as_ref().map(|v| VwapView {
            vwap: v.vwap,
            sd1_up: v.sd1_up,
            sd1_dn: v.sd1_dn,
            sd2_up: v.sd2_up,
            sd2_dn: v.sd2_dn,
        });
        let vva = snap.m1_vva.as_ref().map(|v| VvaView {
            vpoc: v.vpoc,
            vah: v.vah,
            val: v.val,
        });

        let menthorq = MenthorqView {
            stale: snap.menthorq.stale,
            call_resistance: snap.menthorq.gamma.call_resistance,
            put_support: snap.menthorq.gamma.put_support,
            hvl: snap.menthorq.gamma.hvl,
            gamma_wall_0dte: snap.menthorq.gamma.gamma_wall_0dte,
            d1_min: snap.menthorq.gamma.d1_min,
            d1_max: snap.menthorq.gamma.d1_max,
            zero_dte: ZeroDteView {
                call: snap.menthorq.zero_dte.call,
                put: snap.menthorq.zero_dte.put,
                gamma_wall: snap.menthorq.zero_dte.gamma_wall,
            },
            gex_levels: snap.menthorq.gex_prices(),
            blind_spots: snap.menthorq.blind_spot_prices(),
            swing_levels: snap.menthorq.swing_prices(),
            gamma_flip: metrics.gamma_flip_up || metrics.gamma_flip_down,
        };

        let band_width = snap.band_width_history.back().copied();
        let band_width_median = median(snap.band_width_history.iter().copied());

        let recent = snap.m1_bars.recent(RECENT_BAR_LOOKBACK + 1);
        // Exclude the newest (possibly still forming) bar from the swing scan.
        let prior = if recent.len() > 1 {
            &recent[..recent.len() - 1]
        } else {
            &recent[..]
        };
        let recent_high = prior.iter().map(|b| b.high).fold(None, fold_max);
        let recent_low = prior.iter().map(|b| b.low).fold(None, fold_min);
        let recent_closes: Vec<f64> = recent.iter().map(|b| b.close).collect();

        let dealer_bias = dealer_bias(snap, last_price);

        let peer = peer.map(|p| PeerView {
            sym: p.sym.clone(),
            last_price: p.last_price(),
            d1_min: p.menthorq.gamma.d1_min,
            d1_max: p.menthorq.gamma.d1_max,
        });

        Self {
            sym: snap.sym.clone(),
            ts,
            tick_size: snap.tick_size,
            last_price,
            atr: snap.derived.atr_proxy,
            vwap,
            vva,
            menthorq,
            orderflow: metrics.clone(),
            vix: snap.vix.last_value,
            vix_regime: snap.vix.regime,
            session_phase: sessions.phase(ts),
            in_trading_window: sessions.in_trading_window(ts),
            in_opening_window: sessions.is_opening_window(ts),
            pos_vs_vwap: snap.derived.pos_vs_vwap,
            vwap_distance: snap.derived.vwap_distance,
            band_width,
            band_width_median,
            recent_high,
            recent_low,
            recent_closes,
            dealer_bias,
            peer,
        }
    }

    /// Distance to a level, in ticks.
    pub fn ticks_to(&self, level: f64) -> Option<f64> {
        let price = self.last_price?;
        Some((price - level).abs() / self.tick_size.max(f64::EPSILON))
    }
}

fn fold_max(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.max(x)))
}

fn fold_min(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.min(x)))
}

fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut v: Vec<f64> = values.collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 {
        0.5 * (v[mid - 1] + v[mid])
    } else {
        v[mid]
    })
}

/// Multi-factor sentiment in [-1, +1]: orderflow pressure 40 %, position
/// vs VWAP 30 %, value-area context 20 %, VIX filter 10 %.
fn dealer_bias(snap: &Snapshot, last_price: Option<f64>) -> f64 {
    let of_score = match &snap.m1_nbcv {
        Some(n) => {
            let total = snap
                .m1_bars
                .last()
                .map(|b| b.volume)
                .filter(|v| *v > 0.0)
                .unwrap_or(1.0);
            let ratio = (n.delta / total).clamp(-1.0, 1.0);
            if ratio > 0.1 {
                0.8
            } else if ratio < -0.1 {
                0.2
            } else {
                0.5 + ratio * 0.3
            }
        }
        None => 0.5,
    };

    let vwap_score = match (last_price, snap.m1_vwap.as_ref()) {
        (Some(p), Some(v)) if v.vwap > 0.0 => {
            let dist = (p - v.vwap) / v.vwap;
            if dist > 0.002 {
                0.8
            } else if dist < -0.002 {
                0.2
            } else {
                0.5 + dist * 50.0
            }
        }
        _ => 0.5,
    };

    let va_score = match (last_price, snap.m1_vva.as_ref()) {
        (Some(p), Some(vva)) => {
            if p > vva.vah {
                0.8
            } else if p < vva.val {
                0.2
            } else if p > vva.vpoc {
                0.6
            } else {
                0.4
            }
        }
        _ => 0.5,
    };

    let vix_score = match snap.vix.last_value {
        Some(v) if v < 15.0 => 0.8,
        Some(v) if v > 30.0 => 0.2,
        Some(_) => 0.5,
        None => 0.5,
    };

    let blended = 0.4 * of_score + 0.3 * vwap_score + 0.2 * va_score + 0.1 * vix_score;
    ((blended - 0.5) * 2.0).clamp(-1.0, 1.0)
}
