// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the current market from the feature view. Detection hierarchy
// (first match wins):
//
//   1. VOLATILE — band width expanded past 2x its median
//   2. SQUEEZE  — band width compressed below 0.5x its median
//   3. TRENDING — net move over the recent bars >= 1.5 ATR with
//                 directional persistence >= 65 %
//   4. RANGING  — everything else
//
// The volatility tier is the VIX regime, carried alongside so sizing and
// confluence bands can key off it without re-deriving.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market::FeatureSet;
use crate::types::VixRegime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    Trending,
    Ranging,
    Volatile,
    Squeeze,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "TRENDING"),
            Self::Ranging => write!(f, "RANGING"),
            Self::Volatile => write!(f, "VOLATILE"),
            Self::Squeeze => write!(f, "SQUEEZE"),
        }
    }
}

/// Detected regime plus the contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: MarketRegime,
    pub vol_tier: VixRegime,
    pub confidence: f64,
    pub net_move_atr: f64,
    pub persistence: f64,
    pub band_expansion: f64,
}

pub struct RegimeDetector;

impl RegimeDetector {
    /// Classify from the current feature view. Returns `None` when there is
    /// not enough bar history to say anything.
    pub fn detect(ctx: &FeatureSet) -> Option<RegimeState> {
        if ctx.recent_closes.len() < 5 {
            return None;
        }

        let closes = &ctx.recent_closes;
        let first = *closes.first()?;
        let last = *closes.last()?;
        let atr = ctx.atr.filter(|a| *a > f64::EPSILON)?;

        let net_move_atr = (last - first).abs() / atr;

        let mut up = 0usize;
        let mut moves = 0usize;
        for pair in closes.windows(2) {
            if (pair[1] - pair[0]).abs() > f64::EPSILON {
                moves += 1;
                if pair[1] > pair[0] {
                    up += 1;
                }
            }
        }
        let up_frac = if moves == 0 {
            0.5
        } else {
            up as f64 / moves as f64
        };
        // Persistence is direction-agnostic: 1.0 means every move agreed.
        let persistence = up_frac.max(1.0 - up_frac);

        let band_expansion = match (ctx.band_width, ctx.band_width_median) {
            (Some(w), Some(m)) if m > f64::EPSILON => w / m,
            _ => 1.0,
        };

        let (regime, confidence) = classify(net_move_atr, persistence, band_expansion);

        let state = RegimeState {
            regime,
            vol_tier: ctx.vix_regime,
            confidence,
            net_move_atr,
            persistence,
            band_expansion,
        };

        debug!(
            sym = %ctx.sym,
            regime = %regime,
            vol_tier = %ctx.vix_regime,
            net_move_atr = format!("{net_move_atr:.2}"),
            persistence = format!("{persistence:.2}"),
            band_expansion = format!("{band_expansion:.2}"),
            "regime detected"
        );

        Some(state)
    }
}

fn classify(net_move_atr: f64, persistence: f64, band_expansion: f64) -> (MarketRegime, f64) {
    if band_expansion > 2.0 {
        let confidence = remap(band_expansion, 2.0, 4.0, 0.6, 1.0);
        return (MarketRegime::Volatile, confidence);
    }

    if band_expansion < 0.5 {
        let confidence = remap(band_expansion, 0.5, 0.2, 0.6, 1.0);
        return (MarketRegime::Squeeze, confidence);
    }

    if net_move_atr >= 1.5 && persistence >= 0.65 {
        let move_conf = remap(net_move_atr, 1.5, 4.0, 0.6, 1.0);
        let pers_conf = remap(persistence, 0.65, 0.9, 0.6, 1.0);
        return (MarketRegime::Trending, (move_conf + pers_conf) / 2.0);
    }

    (MarketRegime::Ranging, 0.5)
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`,
/// clamped to the output range.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    out_lo + t.clamp(0.0, 1.0) * (out_hi - out_lo)
}
