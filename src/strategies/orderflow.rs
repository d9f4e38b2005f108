// =============================================================================
// Order-flow strategies
// =============================================================================
//
// Patterns read directly off the microstructure metrics: liquidity sweeps,
// CVD divergence traps, stacked DOM imbalance continuation and iceberg
// following. None of these depend on the MenthorQ level book.
// =============================================================================

use crate::market::FeatureSet;
use crate::strategies::{targets_toward, PatternSignal, Strategy};
use crate::types::{Side, SignalFamily};

const ATR_MULT_SL: f64 = 1.0;

fn stop_for(side: Side, entry: f64, atr: f64) -> f64 {
    match side {
        Side::Long => entry - ATR_MULT_SL * atr,
        Side::Short => entry + ATR_MULT_SL * atr,
    }
}

// =============================================================================
// Liquidity Sweep Reversal
// =============================================================================

/// A push through the recent swing that is immediately absorbed on the far
/// side reverses back into the range.
pub struct LiquiditySweepReversal;

impl Strategy for LiquiditySweepReversal {
    fn name(&self) -> &'static str {
        "liquidity_sweep_reversal"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Reversal
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "recent_high", "recent_low", "orderflow.absorption"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.recent_high.is_some()
            && ctx.recent_low.is_some()
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let high = ctx.recent_high?;
        let low = ctx.recent_low?;

        let (side, swept) = if price > high && ctx.orderflow.absorption_ask {
            (Side::Short, high)
        } else if price < low && ctx.orderflow.absorption_bid {
            (Side::Long, low)
        } else {
            return None;
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.65,
            entry: price,
            stop: stop_for(side, price, atr),
            targets: vec![swept, match side {
                Side::Short => swept - 4.0 * ctx.tick_size,
                Side::Long => swept + 4.0 * ctx.tick_size,
            }],
            reason: format!("swing {swept} swept and absorbed, reversal {side}"),
            metadata: std::collections::HashMap::from([("swept_level".to_string(), swept)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// CVD Divergence Trap
// =============================================================================

/// A fresh price extreme that cumulative delta refuses to confirm.
pub struct CvdDivergenceTrap;

impl Strategy for CvdDivergenceTrap {
    fn name(&self) -> &'static str {
        "cvd_divergence_trap"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Trap
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "orderflow.cvd_divergence"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        ctx.last_price.is_some()
            && ctx.atr.is_some()
            && (ctx.orderflow.cvd_divergence_bearish || ctx.orderflow.cvd_divergence_bullish)
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;

        let side = if ctx.orderflow.cvd_divergence_bearish {
            Side::Short
        } else if ctx.orderflow.cvd_divergence_bullish {
            Side::Long
        } else {
            return None;
        };

        let mut targets: Vec<f64> = ctx
            .vwap
            .as_ref()
            .map(|v| v.vwap)
            .into_iter()
            .chain(ctx.vva.as_ref().map(|v| v.vpoc))
            .collect();
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
            confidence: 0.63,
            entry: price,
            stop: stop_for(side, price, atr),
            targets,
            reason: format!("price extreme unconfirmed by CVD (cvd={:.0})", ctx.orderflow.cvd),
            metadata: std::collections::HashMap::from([("cvd".to_string(), ctx.orderflow.cvd)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// Stacked Imbalance Continuation
// =============================================================================

/// Three or more consecutive dominated DOM rows on one side back a
/// continuation in that direction.
pub struct StackedImbalanceContinuation;

impl Strategy for StackedImbalanceContinuation {
    fn name(&self) -> &'static str {
        "stacked_imbalance_continuation"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Continuation
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "orderflow.stacked_imbalance"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        ctx.last_price.is_some()
            && ctx.atr.is_some()
            && (ctx.orderflow.stacked_rows_bid >= 3 || ctx.orderflow.stacked_rows_ask >= 3)
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;

        let bid_rows = ctx.orderflow.stacked_rows_bid;
        let ask_rows = ctx.orderflow.stacked_rows_ask;
        let (side, rows) = if bid_rows >= 3 && bid_rows > ask_rows {
            (Side::Long, bid_rows)
        } else if ask_rows >= 3 && ask_rows > bid_rows {
            (Side::Short, ask_rows)
        } else {
            return None;
        };

        // Confidence grows with the stack depth, capped well short of 1.
        let confidence = (0.58 + 0.02 * rows as f64).min(0.72);

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence,
            entry: price,
            stop: stop_for(side, price, atr),
            targets: targets_toward(price, side, [4.0, 8.0], ctx.tick_size),
            reason: format!("{rows} stacked {side}-side DOM rows, continuation"),
            metadata: std::collections::HashMap::from([("rows".to_string(), rows as f64)]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// Iceberg Tracker Follow
// =============================================================================

/// A replenishing hidden order absorbing flow on one side of the book;
/// follow the passive player's direction.
pub struct IcebergTrackerFollow;

impl Strategy for IcebergTrackerFollow {
    fn name(&self) -> &'static str {
        "iceberg_tracker_follow"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Follow
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "orderflow.iceberg", "orderflow.absorption"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        ctx.last_price.is_some() && ctx.atr.is_some() && ctx.orderflow.iceberg
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        if !ctx.orderflow.iceberg {
            return None;
        }

        // Absorption side tells us where the iceberg sits: a bid-side
        // iceberg soaks up sellers (go with the buyer), mirror for asks.
        let side = if ctx.orderflow.absorption_bid {
            Side::Long
        } else if ctx.orderflow.absorption_ask {
            Side::Short
        } else {
            return None;
        };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.61,
            entry: price,
            stop: stop_for(side, price, atr),
            targets: targets_toward(price, side, [4.0, 8.0], ctx.tick_size),
            reason: format!(
                "iceberg replenishing at {:?}, following the absorbing side",
                ctx.orderflow.absorption_price
            ),
            metadata: std::collections::HashMap::from([(
                "absorption_price".to_string(),
                ctx.orderflow.absorption_price.unwrap_or(price),
            )]),
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
    fn sweep_above_high_with_ask_absorption_is_short() {
        let mut ctx = base_ctx(6505.0);
        ctx.recent_high = Some(6504.0);
        ctx.orderflow.absorption_ask = true;
        let sig = LiquiditySweepReversal.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert!((sig.targets[0] - 6504.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sweep_below_low_with_bid_absorption_is_long() {
        let mut ctx = base_ctx(6495.0);
        ctx.recent_low = Some(6496.0);
        ctx.orderflow.absorption_bid = true;
        assert_eq!(
            LiquiditySweepReversal.generate(&ctx).unwrap().side,
            Side::Long
        );
    }

    #[test]
    fn sweep_without_absorption_is_ignored() {
        let mut ctx = base_ctx(6505.0);
        ctx.recent_high = Some(6504.0);
        assert!(LiquiditySweepReversal.generate(&ctx).is_none());
    }

    #[test]
    fn cvd_trap_direction_follows_divergence() {
        let mut ctx = base_ctx(6520.0);
        ctx.orderflow.cvd_divergence_bearish = true;
        let sig = CvdDivergenceTrap.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        // Targets ordered nearest-first.
        let d: Vec<f64> = sig.targets.iter().map(|t| (t - 6520.0_f64).abs()).collect();
        assert!(d.windows(2).all(|w| w[0] <= w[1]));

        ctx.orderflow.cvd_divergence_bearish = false;
        ctx.orderflow.cvd_divergence_bullish = true;
        assert_eq!(CvdDivergenceTrap.generate(&ctx).unwrap().side, Side::Long);
    }

    #[test]
    fn stacked_continuation_long_on_bid_stack() {
        let mut ctx = base_ctx(6500.0);
        ctx.orderflow.stacked_rows_bid = 4;
        let sig = StackedImbalanceContinuation.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Long);
        assert!((sig.confidence - 0.66).abs() < 1e-9);
        assert_eq!(sig.targets, vec![6501.0, 6502.0]);
    }

    #[test]
    fn stacked_continuation_needs_three_rows() {
        let mut ctx = base_ctx(6500.0);
        ctx.orderflow.stacked_rows_ask = 2;
        assert!(!StackedImbalanceContinuation.should_run(&ctx));
        assert!(StackedImbalanceContinuation.generate(&ctx).is_none());
    }

    #[test]
    fn iceberg_follow_goes_with_the_absorbing_side() {
        let mut ctx = base_ctx(6500.0);
        ctx.orderflow.iceberg = true;
        ctx.orderflow.absorption_bid = true;
        ctx.orderflow.absorption_price = Some(6500.0);
        assert_eq!(IcebergTrackerFollow.generate(&ctx).unwrap().side, Side::Long);

        ctx.orderflow.absorption_bid = false;
        ctx.orderflow.absorption_ask = true;
        assert_eq!(IcebergTrackerFollow.generate(&ctx).unwrap().side, Side::Short);
    }

    #[test]
    fn iceberg_without_absorption_is_ignored() {
        let mut ctx = base_ctx(6500.0);
        ctx.orderflow.iceberg = true;
        assert!(IcebergTrackerFollow.generate(&ctx).is_none());
    }
}
