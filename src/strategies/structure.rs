// =============================================================================
// Structure strategies
// =============================================================================
//
// Patterns keyed off market structure: the dealer-flip breakout, the VWAP
// band squeeze, gamma pinning and value-area gaps.
// =============================================================================

use crate::market::FeatureSet;
use crate::strategies::{nearest_level, targets_toward, PatternSignal, Strategy};
use crate::types::{Side, SignalFamily};

const ATR_MULT_SL: f64 = 1.0;

fn stop_for(side: Side, entry: f64, atr: f64) -> f64 {
    match side {
        Side::Long => entry - ATR_MULT_SL * atr,
        Side::Short => entry + ATR_MULT_SL * atr,
    }
}

// =============================================================================
// Dealer Flip Breakout
// =============================================================================

/// A gamma flip plus a delta burst through the nearest wall, aligned with
/// VWAP, marks dealers switching from dampening to chasing.
pub struct DealerFlipBreakout;

impl Strategy for DealerFlipBreakout {
    fn name(&self) -> &'static str {
        "dealer_flip_breakout"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Breakout
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "price.last",
            "atr",
            "vwap.vwap",
            "menthorq.gamma_flip",
            "orderflow.delta_burst",
        ]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.vwap.is_some()
            && ctx.menthorq.gamma_flip
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let vwap = ctx.vwap.as_ref()?.vwap;

        if !ctx.menthorq.gamma_flip || !ctx.orderflow.delta_burst_active {
            return None;
        }

        let walls = ctx
            .menthorq
            .call_resistance
            .into_iter()
            .chain(ctx.menthorq.put_support)
            .chain(ctx.menthorq.gamma_wall_0dte);
        let wall = nearest_level(price, walls)?;

        let side = if price > wall && price > vwap {
            Side::Long
        } else if price < wall && price < vwap {
            Side::Short
        } else {
            return None;
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.68,
            entry: price,
            stop: match side {
                Side::Long => wall - ATR_MULT_SL * atr,
                Side::Short => wall + ATR_MULT_SL * atr,
            },
            targets: targets_toward(price, side, [6.0, 12.0], ctx.tick_size),
            reason: format!("dealer flip breakout through {wall} with VWAP alignment"),
            metadata: std::collections::HashMap::from([
                ("wall".to_string(), wall),
                ("vwap".to_string(), vwap),
            ]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// VWAP Band Squeeze Break
// =============================================================================

/// Band width compressed below half its recent median, then price escapes
/// a one-sigma band.
pub struct VwapBandSqueezeBreak;

impl Strategy for VwapBandSqueezeBreak {
    fn name(&self) -> &'static str {
        "vwap_band_squeeze_break"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Breakout
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "vwap.sd1_up", "vwap.sd1_dn", "band_width"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.vwap.is_some()
            && ctx.band_width.is_some()
            && ctx.band_width_median.is_some()
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let vwap = ctx.vwap.as_ref()?;
        let width = ctx.band_width?;
        let median = ctx.band_width_median?;

        if median <= f64::EPSILON || width >= 0.5 * median {
            return None;
        }

        let up = vwap.sd1_up?;
        let dn = vwap.sd1_dn?;

        let (side, target) = if price > up {
            (Side::Long, vwap.sd2_up.unwrap_or(price + 6.0 * ctx.tick_size))
        } else if price < dn {
            (Side::Short, vwap.sd2_dn.unwrap_or(price - 6.0 * ctx.tick_size))
        } else {
            return None;
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.64,
            entry: price,
            // The mean is the invalidation for a failed expansion.
            stop: vwap.vwap,
            targets: vec![target],
            reason: format!(
                "band squeeze break ({width:.2} vs median {median:.2}), escape {side}"
            ),
            metadata: std::collections::HashMap::from([
                ("band_width".to_string(), width),
                ("band_width_median".to_string(), median),
            ]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// Gamma Pin Reversion
// =============================================================================

/// Price circling a strong gamma level stays pinned; fade excursions back
/// into it while the recent closes keep hugging the level.
pub struct GammaPinReversion;

/// Maximum excursion, in ticks, that still counts as pinned.
const PIN_RADIUS_TICKS: f64 = 4.0;
/// Recent closes required inside the radius before fading.
const PIN_MIN_CLOSES: usize = 3;

impl Strategy for GammaPinReversion {
    fn name(&self) -> &'static str {
        "gamma_pin_reversion"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Reversal
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "menthorq.gamma_wall_0dte", "recent_closes"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && (ctx.menthorq.gamma_wall_0dte.is_some()
                || ctx.menthorq.call_resistance.is_some()
                || ctx.menthorq.put_support.is_some())
            && ctx.recent_closes.len() >= PIN_MIN_CLOSES
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;

        let pins = ctx
            .menthorq
            .gamma_wall_0dte
            .into_iter()
            .chain(ctx.menthorq.call_resistance)
            .chain(ctx.menthorq.put_support);
        let pin = nearest_level(price, pins)?;

        if ctx.recent_closes.len() < PIN_MIN_CLOSES {
            return None;
        }
        let tail = &ctx.recent_closes[ctx.recent_closes.len() - PIN_MIN_CLOSES..];
        let radius = PIN_RADIUS_TICKS * ctx.tick_size;
        if !tail.iter().all(|c| (c - pin).abs() <= radius) {
            return None;
        }

        // Fade only an actual excursion off the pin.
        let excursion_ticks = (price - pin).abs() / ctx.tick_size.max(f64::EPSILON);
        if excursion_ticks < 2.0 || excursion_ticks > PIN_RADIUS_TICKS {
            return None;
        }

        let side = if price > pin { Side::Short } else { Side::Long };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.60,
            entry: price,
            stop: stop_for(side, price, atr),
            targets: vec![pin],
            reason: format!("pinned at gamma level {pin}, fading the {excursion_ticks:.0}t excursion"),
            metadata: std::collections::HashMap::from([("pin".to_string(), pin)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// Profile Gap Fill
// =============================================================================

/// Price stranded outside the value area without initiative flow tends to
/// rotate back through the edge toward the point of control.
pub struct ProfileGapFill;

impl Strategy for ProfileGapFill {
    fn name(&self) -> &'static str {
        "profile_gap_fill"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::MeanRevert
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "vva.vah", "vva.val", "vva.vpoc"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        ctx.last_price.is_some() && ctx.atr.is_some() && ctx.vva.is_some()
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let vva = ctx.vva.as_ref()?;

        if ctx.orderflow.delta_burst_active {
            return None;
        }

        let gap_ticks = 4.0 * ctx.tick_size;
        let (side, edge) = if price >= vva.vah + gap_ticks {
            (Side::Short, vva.vah)
        } else if price <= vva.val - gap_ticks {
            (Side::Long, vva.val)
        } else {
            return None;
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.60,
            entry: price,
            stop: stop_for(side, price, atr),
            targets: vec![edge, vva.vpoc],
            reason: format!("value-area gap fill through {edge} toward VPOC {}", vva.vpoc),
            metadata: std::collections::HashMap::from([
                ("edge".to_string(), edge),
                ("vpoc".to_string(), vva.vpoc),
            ]),
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
    fn dealer_flip_long_through_wall() {
        let mut ctx = base_ctx(6503.0);
        ctx.menthorq.gamma_flip = true;
        ctx.orderflow.delta_burst_active = true;
        ctx.vwap.as_mut().unwrap().vwap = 6501.0;
        // Nearest wall to 6503 is the gamma wall at 6500.
        let sig = DealerFlipBreakout.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Long);
        assert!((sig.stop - 6498.0).abs() < 1e-9);
    }

    #[test]
    fn dealer_flip_needs_flip_and_burst() {
        let mut ctx = base_ctx(6503.0);
        ctx.orderflow.delta_burst_active = true;
        assert!(!DealerFlipBreakout.should_run(&ctx)); // no flip
        ctx.menthorq.gamma_flip = true;
        ctx.orderflow.delta_burst_active = false;
        assert!(DealerFlipBreakout.generate(&ctx).is_none());
    }

    #[test]
    fn squeeze_break_fires_only_after_compression() {
        let mut ctx = base_ctx(6500.0);
        ctx.band_width = Some(3.0);
        ctx.band_width_median = Some(8.0);
        // Price above the upper band.
        ctx.last_price = Some(ctx.vwap.as_ref().unwrap().sd1_up.unwrap() + 0.5);
        let sig = VwapBandSqueezeBreak.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Long);
        assert!((sig.stop - ctx.vwap.as_ref().unwrap().vwap).abs() < f64::EPSILON);

        // Same break without compression: nothing.
        ctx.band_width = Some(7.0);
        assert!(VwapBandSqueezeBreak.generate(&ctx).is_none());
    }

    #[test]
    fn squeeze_break_short_mirror() {
        let mut ctx = base_ctx(6500.0);
        ctx.band_width = Some(3.0);
        ctx.band_width_median = Some(8.0);
        ctx.last_price = Some(ctx.vwap.as_ref().unwrap().sd1_dn.unwrap() - 0.5);
        assert_eq!(VwapBandSqueezeBreak.generate(&ctx).unwrap().side, Side::Short);
    }

    #[test]
    fn gamma_pin_fades_excursions_while_pinned() {
        let mut ctx = base_ctx(6500.75); // 3 ticks above the 6500 wall
        ctx.recent_closes = vec![6500.25, 6499.75, 6500.5];
        let sig = GammaPinReversion.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert_eq!(sig.targets, vec![6500.0]);
    }

    #[test]
    fn gamma_pin_needs_hugging_closes() {
        let mut ctx = base_ctx(6500.75);
        ctx.recent_closes = vec![6495.0, 6499.75, 6500.5]; // one close far away
        assert!(GammaPinReversion.generate(&ctx).is_none());
    }

    #[test]
    fn gamma_pin_ignores_price_sitting_on_the_level() {
        let mut ctx = base_ctx(6500.0);
        ctx.recent_closes = vec![6500.25, 6499.75, 6500.0];
        assert!(GammaPinReversion.generate(&ctx).is_none());
    }

    #[test]
    fn profile_gap_short_above_value() {
        // VAH at price+5 in the fixture; push price above it.
        let mut ctx = base_ctx(6500.0);
        ctx.vva.as_mut().unwrap().vah = 6505.0;
        ctx.vva.as_mut().unwrap().val = 6495.0;
        ctx.vva.as_mut().unwrap().vpoc = 6500.0;
        ctx.last_price = Some(6506.5);
        let sig = ProfileGapFill.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert_eq!(sig.targets, vec![6505.0, 6500.0]);
    }

    #[test]
    fn profile_gap_long_below_value() {
        let mut ctx = base_ctx(6500.0);
        ctx.vva.as_mut().unwrap().vah = 6505.0;
        ctx.vva.as_mut().unwrap().val = 6495.0;
        ctx.last_price = Some(6493.5);
        assert_eq!(ProfileGapFill.generate(&ctx).unwrap().side, Side::Long);
    }

    #[test]
    fn profile_gap_quiet_inside_value() {
        let mut ctx = base_ctx(6500.0);
        ctx.vva.as_mut().unwrap().vah = 6505.0;
        ctx.vva.as_mut().unwrap().val = 6495.0;
        ctx.last_price = Some(6501.0);
        assert!(ProfileGapFill.generate(&ctx).is_none());
    }
}
