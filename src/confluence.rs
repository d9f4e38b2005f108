// =============================================================================
// MenthorQ confluence scoring
// =============================================================================
//
// Each level label carries a weight; levels within the VIX-scaled band
// contribute `weight * exp(-(d/band)^2)` where `d` is the distance in
// ticks. Gamma-side and swing levels add, blind spots subtract. The sum is
// clamped to [-1, +1].
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market::FeatureSet;
use crate::types::VixRegime;

pub const WEIGHT_CALL_PUT: f64 = 0.95;
pub const WEIGHT_HVL: f64 = 0.90;
pub const WEIGHT_D1: f64 = 0.85;
pub const WEIGHT_ZERO_DTE: f64 = 0.88;
pub const WEIGHT_GAMMA_WALL_0DTE: f64 = 0.90;
pub const WEIGHT_GEX: f64 = 0.85;
pub const WEIGHT_OTHER: f64 = 0.75;
pub const WEIGHT_BLIND_SPOT: f64 = 0.80;

/// Band width in ticks scales with the VIX regime.
pub fn band_ticks(regime: VixRegime) -> f64 {
    match regime {
        VixRegime::Low => 6.0,
        VixRegime::Mid => 10.0,
        VixRegime::High => 14.0,
    }
}

/// Breakdown of a confluence evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfluenceScore {
    /// Clamped sum in [-1, +1].
    pub strength_mq: f64,
    /// Number of levels inside the band.
    pub levels_in_band: usize,
    /// Distance to the nearest blind spot, in ticks.
    pub nearest_blind_spot_ticks: Option<f64>,
}

fn gaussian(dist_ticks: f64, band: f64) -> f64 {
    let x = dist_ticks / band.max(f64::EPSILON);
    (-x * x).exp()
}

/// Evaluate the confluence around the current price.
pub fn evaluate(ctx: &FeatureSet) -> ConfluenceScore {
    let Some(price) = ctx.last_price else {
        return ConfluenceScore::default();
    };
    let band = band_ticks(ctx.vix_regime);
    let tick = ctx.tick_size.max(f64::EPSILON);
    let dist = |level: f64| (price - level).abs() / tick;

    let mq = &ctx.menthorq;
    let mut sum = 0.0;
    let mut in_band = 0usize;

    let mut add = |level: Option<f64>, weight: f64| {
        if let Some(l) = level {
            let d = dist(l);
            if d <= band {
                sum += weight * gaussian(d, band);
                in_band += 1;
            }
        }
    };

    add(mq.call_resistance, WEIGHT_CALL_PUT);
    add(mq.put_support, WEIGHT_CALL_PUT);
    add(mq.hvl, WEIGHT_HVL);
    add(mq.d1_min, WEIGHT_D1);
    add(mq.d1_max, WEIGHT_D1);
    add(mq.zero_dte.call, WEIGHT_ZERO_DTE);
    add(mq.zero_dte.put, WEIGHT_ZERO_DTE);
    add(mq.zero_dte.gamma_wall, WEIGHT_GAMMA_WALL_0DTE);
    for gex in &mq.gex_levels {
        add(Some(*gex), WEIGHT_GEX);
    }
    for swing in &mq.swing_levels {
        add(Some(*swing), WEIGHT_OTHER);
    }

    let mut nearest_bl: Option<f64> = None;
    for bl in &mq.blind_spots {
        let d = dist(*bl);
        nearest_bl = Some(nearest_bl.map_or(d, |n: f64| n.min(d)));
        if d <= band {
            sum -= WEIGHT_BLIND_SPOT * gaussian(d, band);
            in_band += 1;
        }
    }

    ConfluenceScore {
        strength_mq: sum.clamp(-1.0, 1.0),
        levels_in_band: in_band,
        nearest_blind_spot_ticks: nearest_bl,
    }
}
