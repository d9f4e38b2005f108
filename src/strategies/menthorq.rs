// =============================================================================
// MenthorQ level strategies
// =============================================================================
//
// Six patterns keyed off option-derived levels (0DTE walls, gamma wall,
// HVL, prior-day extremes, GEX clusters, the call/put channel). None of
// them fire while the level book is stale.
// =============================================================================

use tracing::trace;

use crate::market::FeatureSet;
use crate::strategies::{nearest_level, targets_toward, PatternSignal, Strategy};
use crate::types::{Side, SignalFamily};

/// Stop distance beyond the violated level, as a multiple of ATR.
const ATR_MULT_SL: f64 = 1.0;

fn meta(ctx: &FeatureSet, pairs: &[(&str, f64)]) -> std::collections::HashMap<String, f64> {
    let mut m: std::collections::HashMap<String, f64> =
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    if let Some(p) = ctx.last_price {
        m.insert("price".to_string(), p);
    }
    m
}

// =============================================================================
// Zero-DTE Wall Sweep Reversal
// =============================================================================

/// A sweep into a 0DTE wall (long wick + delta flip) that gets absorbed on
/// the far side reverses back toward the mean.
pub struct ZeroDteWallSweepReversal;

impl Strategy for ZeroDteWallSweepReversal {
    fn name(&self) -> &'static str {
        "zero_dte_wall_sweep_reversal"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Reversal
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "price.last",
            "atr",
            "menthorq.zero_dte",
            "orderflow.delta_flip",
            "orderflow.absorption",
            "basedata.last_wick_ticks",
        ]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && (ctx.menthorq.zero_dte.call.is_some() || ctx.menthorq.zero_dte.put.is_some())
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let wick = ctx.orderflow.last_wick_ticks?;

        if wick < 6.0 || !ctx.orderflow.delta_flip {
            return None;
        }

        // Pick the 0DTE wall nearest the current price.
        let call = ctx.menthorq.zero_dte.call;
        let put = ctx.menthorq.zero_dte.put;
        let wall = nearest_level(price, call.into_iter().chain(put))?;
        let dist_ticks = ctx.ticks_to(wall)?;
        if dist_ticks > 8.0 {
            trace!(strategy = self.name(), dist_ticks, "wall too far");
            return None;
        }
        let is_call_wall = Some(wall) == call;

        // Absorption must oppose the sweep: hit bids near a CALL wall,
        // lifted offers near a PUT wall.
        let side = if is_call_wall && ctx.orderflow.absorption_bid {
            Side::Short
        } else if !is_call_wall && ctx.orderflow.absorption_ask {
            Side::Long
        } else {
            return None;
        };

        let stop = match side {
            Side::Short => wall + ATR_MULT_SL * atr,
            Side::Long => wall - ATR_MULT_SL * atr,
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.66,
            entry: price,
            stop,
            targets: targets_toward(price, side, [4.0, 8.0], ctx.tick_size),
            reason: format!(
                "0DTE {} wall {wall} swept ({wick:.0}t wick, delta flip) and absorbed",
                if is_call_wall { "CALL" } else { "PUT" }
            ),
            metadata: meta(ctx, &[("wall", wall), ("dist_ticks", dist_ticks)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// Gamma Wall Break-and-Go
// =============================================================================

/// A gamma-flip crossing with a delta burst and accelerating quotes is a
/// dealer-hedging breakout through the wall.
pub struct GammaWallBreakAndGo;

impl Strategy for GammaWallBreakAndGo {
    fn name(&self) -> &'static str {
        "gamma_wall_break_and_go"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Breakout
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "price.last",
            "atr",
            "vwap.vwap",
            "menthorq.zero_dte.gamma_wall",
            "menthorq.gamma_flip",
            "orderflow.delta_burst",
            "quotes.speed_up",
        ]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.vwap.is_some()
            && ctx.menthorq.zero_dte.gamma_wall.is_some()
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let wall = ctx.menthorq.zero_dte.gamma_wall?;
        let vwap = ctx.vwap.as_ref()?;

        if !ctx.menthorq.gamma_flip
            || !ctx.orderflow.delta_burst_active
            || !ctx.orderflow.quotes_speed_up
        {
            return None;
        }

        let (side, stop, target) = if price > wall && price > vwap.vwap {
            let target = vwap.sd2_up.unwrap_or(price + 6.0 * ctx.tick_size);
            (Side::Long, wall - ATR_MULT_SL * atr, target)
        } else if price < wall && price < vwap.vwap {
            let target = vwap.sd2_dn.unwrap_or(price - 6.0 * ctx.tick_size);
            (Side::Short, wall + ATR_MULT_SL * atr, target)
        } else {
            return None;
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.70,
            entry: price,
            stop,
            targets: vec![target],
            reason: format!("gamma wall {wall} broken {side} with burst + quote acceleration"),
            metadata: meta(ctx, &[("wall", wall), ("vwap", vwap.vwap)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// HVL Magnet Fade
// =============================================================================

/// Price drifting near the high-volume level without initiative flow gets
/// pulled back to it.
pub struct HvlMagnetFade;

impl Strategy for HvlMagnetFade {
    fn name(&self) -> &'static str {
        "hvl_magnet_fade"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::MeanRevert
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "menthorq.hvl", "orderflow.delta_burst"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.menthorq.hvl.is_some()
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let hvl = ctx.menthorq.hvl?;
        let dist_ticks = ctx.ticks_to(hvl)?;

        if dist_ticks < 1.0 || dist_ticks > 10.0 {
            return None;
        }
        if ctx.orderflow.delta_burst_active {
            return None;
        }
        let stacked = ctx
            .orderflow
            .stacked_rows_ask
            .max(ctx.orderflow.stacked_rows_bid);
        if stacked >= 3 {
            return None;
        }

        let side = if price > hvl { Side::Short } else { Side::Long };
        let stop = match side {
            Side::Short => price + ATR_MULT_SL * atr,
            Side::Long => price - ATR_MULT_SL * atr,
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.60,
            entry: price,
            stop,
            targets: vec![hvl],
            reason: format!("fade toward HVL {hvl} ({dist_ticks:.0}t away, no initiative flow)"),
            metadata: meta(ctx, &[("hvl", hvl), ("dist_ticks", dist_ticks)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// D1 Extreme Trap
// =============================================================================

/// A break of the prior-day extreme that CVD refuses to confirm is a trap;
/// fade it back toward VWAP / VPOC.
pub struct D1ExtremeTrap;

impl Strategy for D1ExtremeTrap {
    fn name(&self) -> &'static str {
        "d1_extreme_trap"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Trap
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "price.last",
            "atr",
            "menthorq.d1min",
            "menthorq.d1max",
            "orderflow.cvd_divergence",
        ]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && (ctx.menthorq.d1_min.is_some() || ctx.menthorq.d1_max.is_some())
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;

        let (side, extreme) = match (ctx.menthorq.d1_max, ctx.menthorq.d1_min) {
            (Some(max), _) if price > max && ctx.orderflow.cvd_divergence_bearish => {
                (Side::Short, max)
            }
            (_, Some(min)) if price < min && ctx.orderflow.cvd_divergence_bullish => {
                (Side::Long, min)
            }
            _ => return None,
        };

        let stop = match side {
            Side::Short => price + ATR_MULT_SL * atr,
            Side::Long => price - ATR_MULT_SL * atr,
        };

        let mut targets: Vec<f64> = Vec::new();
        if let Some(v) = ctx.vwap.as_ref().map(|v| v.vwap) {
            targets.push(v);
        }
        if let Some(vpoc) = ctx.vva.as_ref().map(|v| v.vpoc) {
            targets.push(vpoc);
        }
        if targets.is_empty() {
            targets = targets_toward(price, side, [4.0, 8.0], ctx.tick_size);
        }
        targets.sort_by(|a, b| {
            (a - price)
                .abs()
                .partial_cmp(&(b - price).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.64,
            entry: price,
            stop,
            targets,
            reason: format!("prior-day extreme {extreme} broken without CVD confirmation"),
            metadata: meta(ctx, &[("extreme", extreme)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// GEX Cluster Mean Revert
// =============================================================================

/// Price escaping a tight GEX cluster tends to be pulled back to its
/// centre by dealer hedging.
pub struct GexClusterMeanRevert;

impl Strategy for GexClusterMeanRevert {
    fn name(&self) -> &'static str {
        "gex_cluster_mean_revert"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::MeanRevert
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "menthorq.gex_levels"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.menthorq.gex_levels.len() >= 3
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let levels = &ctx.menthorq.gex_levels;
        if levels.len() < 3 {
            return None;
        }

        let lo = levels.iter().cloned().fold(f64::MAX, f64::min);
        let hi = levels.iter().cloned().fold(f64::MIN, f64::max);
        let span_ticks = (hi - lo) / ctx.tick_size.max(f64::EPSILON);
        if span_ticks > 16.0 {
            return None;
        }
        let centre = 0.5 * (lo + hi);

        // Only a fresh escape counts: price just outside an edge, not a
        // market trading far away from the cluster.
        let escape_ticks = 8.0 * ctx.tick_size;
        let side = if price > hi && price <= hi + escape_ticks {
            Side::Short
        } else if price < lo && price >= lo - escape_ticks {
            Side::Long
        } else {
            return None;
        };

        let stop = match side {
            Side::Short => price + ATR_MULT_SL * atr,
            Side::Long => price - ATR_MULT_SL * atr,
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.60,
            entry: price,
            stop,
            targets: vec![centre],
            reason: format!(
                "price left GEX cluster [{lo}, {hi}] ({span_ticks:.0}t span), revert to centre"
            ),
            metadata: meta(ctx, &[("cluster_lo", lo), ("cluster_hi", hi), ("centre", centre)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// Call/Put Channel Rotation
// =============================================================================

/// Inside a wide call-resistance / put-support channel, edges without
/// initiative flow rotate back toward value.
pub struct CallPutChannelRotation;

impl Strategy for CallPutChannelRotation {
    fn name(&self) -> &'static str {
        "call_put_channel_rotation"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::RangeRotation
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "price.last",
            "atr",
            "menthorq.call_resistance",
            "menthorq.put_support",
        ]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.menthorq.call_resistance.is_some()
            && ctx.menthorq.put_support.is_some()
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let call = ctx.menthorq.call_resistance?;
        let put = ctx.menthorq.put_support?;

        let top = call.max(put);
        let bottom = call.min(put);
        let width_ticks = (top - bottom) / ctx.tick_size.max(f64::EPSILON);
        if width_ticks < 20.0 {
            return None;
        }
        if ctx.orderflow.delta_burst_active {
            return None;
        }

        let near_top = (price - top).abs() / ctx.tick_size <= 6.0;
        let near_bottom = (price - bottom).abs() / ctx.tick_size <= 6.0;
        let side = if near_top {
            Side::Short
        } else if near_bottom {
            Side::Long
        } else {
            return None;
        };

        let stop = match side {
            Side::Short => price + ATR_MULT_SL * atr,
            Side::Long => price - ATR_MULT_SL * atr,
        };

        let rotation_target = ctx
            .vva
            .as_ref()
            .map(|v| v.vpoc)
            .or_else(|| ctx.vwap.as_ref().map(|v| v.vwap))
            .unwrap_or_else(|| 0.5 * (top + bottom));

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.60,
            entry: price,
            stop,
            targets: vec![rotation_target],
            reason: format!(
                "rotation off channel {} edge [{bottom}, {top}] toward value",
                if near_top { "upper" } else { "lower" }
            ),
            metadata: meta(ctx, &[("channel_top", top), ("channel_bottom", bottom)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testutil::base_ctx;

    #[test]
    fn zero_dte_sweep_short_near_call_wall() {
        // S1 fixture: price 1 point above the 0DTE call at 6425.
        let mut ctx = base_ctx(6426.0);
        ctx.orderflow.last_wick_ticks = Some(8.0);
        ctx.orderflow.delta_flip = true;
        ctx.orderflow.absorption_bid = true;
        ctx.orderflow.absorption_price = Some(6425.5);

        let sig = ZeroDteWallSweepReversal.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert!((sig.confidence - 0.66).abs() < f64::EPSILON);
        assert!((sig.entry - 6426.0).abs() < f64::EPSILON);
        assert!(sig.stop > 6425.0 + 2.0 - 1e-9);
        assert!((sig.targets[0] - 6425.0).abs() < f64::EPSILON);
        assert!((sig.targets[1] - 6424.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_dte_sweep_long_near_put_wall() {
        let mut ctx = base_ctx(6464.5);
        ctx.orderflow.last_wick_ticks = Some(8.0);
        ctx.orderflow.delta_flip = true;
        ctx.orderflow.absorption_ask = true;
        ctx.orderflow.absorption_price = Some(6464.75);

        let sig = ZeroDteWallSweepReversal.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Long);
        assert!(sig.stop < 6465.0 - 2.0 + 1e-9);
    }

    #[test]
    fn zero_dte_sweep_needs_wick_and_flip() {
        let mut ctx = base_ctx(6426.0);
        ctx.orderflow.absorption_bid = true;
        ctx.orderflow.last_wick_ticks = Some(3.0);
        ctx.orderflow.delta_flip = true;
        assert!(ZeroDteWallSweepReversal.generate(&ctx).is_none());

        ctx.orderflow.last_wick_ticks = Some(8.0);
        ctx.orderflow.delta_flip = false;
        assert!(ZeroDteWallSweepReversal.generate(&ctx).is_none());
    }

    #[test]
    fn zero_dte_sweep_aborts_when_wall_is_far() {
        let mut ctx = base_ctx(6440.0); // 60 ticks above the call
        ctx.orderflow.last_wick_ticks = Some(8.0);
        ctx.orderflow.delta_flip = true;
        ctx.orderflow.absorption_bid = true;
        assert!(ZeroDteWallSweepReversal.generate(&ctx).is_none());
    }

    #[test]
    fn gamma_wall_break_long() {
        // S2 fixture: price 6503 over the 6500 wall with VWAP below.
        let mut ctx = base_ctx(6503.0);
        ctx.vwap.as_mut().unwrap().vwap = 6502.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;

        let sig = GammaWallBreakAndGo.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Long);
        assert!((sig.confidence - 0.70).abs() < f64::EPSILON);
        // Stop sits below the wall by one ATR.
        assert!((sig.stop - 6498.0).abs() < 1e-9);
    }

    #[test]
    fn gamma_wall_break_short_mirror() {
        let mut ctx = base_ctx(6497.0);
        ctx.vwap.as_mut().unwrap().vwap = 6498.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;

        let sig = GammaWallBreakAndGo.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert!((sig.stop - 6502.0).abs() < 1e-9);
    }

    #[test]
    fn gamma_wall_break_requires_all_triggers() {
        let mut ctx = base_ctx(6503.0);
        ctx.vwap.as_mut().unwrap().vwap = 6502.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = false;
        ctx.menthorq.gamma_flip = true;
        assert!(GammaWallBreakAndGo.generate(&ctx).is_none());
    }

    #[test]
    fn hvl_fade_short_above_and_long_below() {
        let mut ctx = base_ctx(6461.25); // 4 ticks above HVL 6460.25
        assert_eq!(
            HvlMagnetFade.generate(&ctx).unwrap().side,
            Side::Short
        );
        ctx.last_price = Some(6459.25);
        assert_eq!(HvlMagnetFade.generate(&ctx).unwrap().side, Side::Long);
    }

    #[test]
    fn hvl_fade_blocked_by_burst_or_stack() {
        let mut ctx = base_ctx(6461.25);
        ctx.orderflow.delta_burst_active = true;
        assert!(HvlMagnetFade.generate(&ctx).is_none());
        ctx.orderflow.delta_burst_active = false;
        ctx.orderflow.stacked_rows_ask = 3;
        assert!(HvlMagnetFade.generate(&ctx).is_none());
    }

    #[test]
    fn d1_trap_short_above_max() {
        let mut ctx = base_ctx(6526.0); // above d1_max 6525
        ctx.orderflow.cvd_divergence_bearish = true;
        let sig = D1ExtremeTrap.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert!(!sig.targets.is_empty());
    }

    #[test]
    fn d1_trap_long_below_min() {
        let mut ctx = base_ctx(6451.0); // below d1_min 6451.75
        ctx.orderflow.cvd_divergence_bullish = true;
        assert_eq!(D1ExtremeTrap.generate(&ctx).unwrap().side, Side::Long);
    }

    #[test]
    fn d1_trap_needs_divergence() {
        let ctx = base_ctx(6526.0);
        assert!(D1ExtremeTrap.generate(&ctx).is_none());
    }

    #[test]
    fn gex_cluster_revert_both_exits() {
        // Cluster [6510, 6512], span 8 ticks.
        let mut ctx = base_ctx(6513.0);
        let sig = GexClusterMeanRevert.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert!((sig.targets[0] - 6511.0).abs() < f64::EPSILON);

        ctx.last_price = Some(6509.0);
        assert_eq!(GexClusterMeanRevert.generate(&ctx).unwrap().side, Side::Long);
    }

    #[test]
    fn gex_cluster_skips_wide_span() {
        let mut ctx = base_ctx(6530.0);
        ctx.menthorq.gex_levels = vec![6500.0, 6510.0, 6525.0]; // 100 ticks
        assert!(GexClusterMeanRevert.generate(&ctx).is_none());
    }

    #[test]
    fn channel_rotation_fades_the_edges() {
        // Channel put 6465 .. call 6425 is inverted in the base fixture;
        // use explicit wide channel instead.
        let mut ctx = base_ctx(6464.0);
        ctx.menthorq.call_resistance = Some(6525.0);
        ctx.menthorq.put_support = Some(6465.0);
        let sig = CallPutChannelRotation.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Long);

        ctx.last_price = Some(6524.5);
        let sig = CallPutChannelRotation.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
    }

    #[test]
    fn channel_rotation_needs_width_and_quiet_tape() {
        let mut ctx = base_ctx(6464.0);
        ctx.menthorq.call_resistance = Some(6467.0); // 8-tick channel
        ctx.menthorq.put_support = Some(6465.0);
        assert!(CallPutChannelRotation.generate(&ctx).is_none());

        ctx.menthorq.call_resistance = Some(6525.0);
        ctx.orderflow.delta_burst_active = true;
        assert!(CallPutChannelRotation.generate(&ctx).is_none());
    }

    #[test]
    fn stale_levels_suppress_all_menthorq_strategies() {
        let mut ctx = base_ctx(6426.0);
        ctx.menthorq.stale = true;
        ctx.orderflow.last_wick_ticks = Some(8.0);
        ctx.orderflow.delta_flip = true;
        ctx.orderflow.absorption_bid = true;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;

        assert!(!ZeroDteWallSweepReversal.should_run(&ctx));
        assert!(!GammaWallBreakAndGo.should_run(&ctx));
        assert!(!HvlMagnetFade.should_run(&ctx));
        assert!(!D1ExtremeTrap.should_run(&ctx));
        assert!(!GexClusterMeanRevert.should_run(&ctx));
        assert!(!CallPutChannelRotation.should_run(&ctx));
    }
}
