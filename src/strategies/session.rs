// =============================================================================
// Session strategies
// =============================================================================
//
// Patterns that only make sense relative to the clock or the sibling
// index: the opening-drive failure fade and the ES/NQ lead-lag mirror.
// =============================================================================

use crate::market::FeatureSet;
use crate::strategies::{PatternSignal, Strategy};
use crate::types::{Side, SignalFamily};

const ATR_MULT_SL: f64 = 1.0;

fn stop_for(side: Side, entry: f64, atr: f64) -> f64 {
    match side {
        Side::Long => entry - ATR_MULT_SL * atr,
        Side::Short => entry + ATR_MULT_SL * atr,
    }
}

// =============================================================================
// Opening Drive Fail
// =============================================================================

/// In the first session window, a directional push away from VWAP that
/// loses its initiative flow fades back to the mean.
pub struct OpeningDriveFail;

/// Minimum extension from VWAP, in ticks, to call it a drive.
const DRIVE_MIN_TICKS: f64 = 4.0;

impl Strategy for OpeningDriveFail {
    fn name(&self) -> &'static str {
        "opening_drive_fail"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Reversal
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "vwap.vwap", "session.opening_window"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        ctx.in_opening_window
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.vwap.is_some()
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        if !ctx.in_opening_window {
            return None;
        }
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let vwap = ctx.vwap.as_ref()?.vwap;

        let extension_ticks = (price - vwap).abs() / ctx.tick_size.max(f64::EPSILON);
        if extension_ticks < DRIVE_MIN_TICKS {
            return None;
        }

        // The drive has to be stalling: no burst, no quote acceleration.
        if ctx.orderflow.delta_burst_active || ctx.orderflow.quotes_speed_up {
            return None;
        }

        let side = if price > vwap { Side::Short } else { Side::Long };

        Some(PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.60,
            entry: price,
            stop: stop_for(side, price, atr),
            targets: vec![vwap],
            reason: format!(
                "opening drive stalled {extension_ticks:.0}t from VWAP, fading back"
            ),
            metadata: std::collections::HashMap::from([
                ("vwap".to_string(), vwap),
                ("extension_ticks".to_string(), extension_ticks),
            ]),
            timestamp: ctx.ts,
        })
    }
}

// =============================================================================
// ES/NQ Lead-Lag Mirror
// =============================================================================

/// One index breaks its prior-day extreme while the sibling fails to
/// confirm its own; the unconfirmed break fades.
pub struct EsNqLeadLagMirror;

/// How far, in own ticks, the peer must sit inside its extreme to count as
/// a non-confirmation.
const PEER_FAIL_TICKS: f64 = 4.0;

impl Strategy for EsNqLeadLagMirror {
    fn name(&self) -> &'static str {
        "es_nq_lead_lag_mirror"
    }

    fn family(&self) -> SignalFamily {
        SignalFamily::Correlation
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &["price.last", "atr", "menthorq.d1min", "menthorq.d1max", "peer"]
    }

    fn should_run(&self, ctx: &FeatureSet) -> bool {
        !ctx.menthorq.stale
            && ctx.last_price.is_some()
            && ctx.atr.is_some()
            && ctx.peer.is_some()
            && (ctx.menthorq.d1_min.is_some() || ctx.menthorq.d1_max.is_some())
    }

    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal> {
        let price = ctx.last_price?;
        let atr = ctx.atr?;
        let peer = ctx.peer.as_ref()?;
        let peer_price = peer.last_price?;
        let peer_tick = crate::types::tick_size_for(&peer.sym);

        // Own break above, peer still clearly under its own high.
        if let (Some(own_max), Some(peer_max)) = (ctx.menthorq.d1_max, peer.d1_max) {
            let peer_short_ticks = (peer_max - peer_price) / peer_tick;
            if price > own_max && peer_short_ticks >= PEER_FAIL_TICKS {
                return Some(self.signal(ctx, price, atr, Side::Short, own_max, &peer.sym));
            }
        }

        // Own break below, peer holding above its own low.
        if let (Some(own_min), Some(peer_min)) = (ctx.menthorq.d1_min, peer.d1_min) {
            let peer_hold_ticks = (peer_price - peer_min) / peer_tick;
            if price < own_min && peer_hold_ticks >= PEER_FAIL_TICKS {
                return Some(self.signal(ctx, price, atr, Side::Long, own_min, &peer.sym));
            }
        }

        None
    }
}

impl EsNqLeadLagMirror {
    fn signal(
        &self,
        ctx: &FeatureSet,
        price: f64,
        atr: f64,
        side: Side,
        broken: f64,
        peer_sym: &str,
    ) -> PatternSignal {
        PatternSignal {
            strategy: self.name(),
            family: self.family(),
            side,
            confidence: 0.60,
            entry: price,
            stop: stop_for(side, price, atr),
            targets: vec![broken],
            reason: format!("extreme {broken} broken without confirmation from {peer_sym}"),
            metadata: std::collections::HashMap::from([("broken_level".to_string(), broken)]),
            timestamp: ctx.ts,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::features::PeerView;
    use crate::strategies::testutil::base_ctx;

    #[test]
    fn opening_drive_fail_fades_a_stalled_push() {
        let mut ctx = base_ctx(6506.0);
        ctx.in_opening_window = true;
        ctx.vwap.as_mut().unwrap().vwap = 6500.0; // 24 ticks extended
        let sig = OpeningDriveFail.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert_eq!(sig.targets, vec![6500.0]);
    }

    #[test]
    fn opening_drive_ignored_outside_window_or_with_flow() {
        let mut ctx = base_ctx(6506.0);
        ctx.vwap.as_mut().unwrap().vwap = 6500.0;
        assert!(!OpeningDriveFail.should_run(&ctx)); // not the opening window
        assert!(OpeningDriveFail.generate(&ctx).is_none());

        ctx.in_opening_window = true;
        ctx.orderflow.delta_burst_active = true; // drive still alive
        assert!(OpeningDriveFail.generate(&ctx).is_none());
    }

    #[test]
    fn opening_drive_needs_real_extension() {
        let mut ctx = base_ctx(6500.5);
        ctx.in_opening_window = true;
        ctx.vwap.as_mut().unwrap().vwap = 6500.0; // 2 ticks only
        assert!(OpeningDriveFail.generate(&ctx).is_none());
    }

    #[test]
    fn lead_lag_short_on_unconfirmed_high_break() {
        let mut ctx = base_ctx(6526.0); // above own d1_max 6525
        ctx.peer = Some(PeerView {
            sym: "NQU25_FUT_CME".to_string(),
            last_price: Some(23_490.0),
            d1_min: Some(23_200.0),
            d1_max: Some(23_500.0), // peer 20 NQ-ticks short of its high
        });
        let sig = EsNqLeadLagMirror.generate(&ctx).unwrap();
        assert_eq!(sig.side, Side::Short);
        assert_eq!(sig.targets, vec![6525.0]);
    }

    #[test]
    fn lead_lag_long_on_unconfirmed_low_break() {
        let mut ctx = base_ctx(6451.0); // below own d1_min 6451.75
        ctx.peer = Some(PeerView {
            sym: "NQU25_FUT_CME".to_string(),
            last_price: Some(23_250.0),
            d1_min: Some(23_200.0),
            d1_max: Some(23_500.0),
        });
        assert_eq!(EsNqLeadLagMirror.generate(&ctx).unwrap().side, Side::Long);
    }

    #[test]
    fn lead_lag_silent_when_peer_confirms() {
        let mut ctx = base_ctx(6526.0);
        ctx.peer = Some(PeerView {
            sym: "NQU25_FUT_CME".to_string(),
            last_price: Some(23_501.0), // peer broke its own high too
            d1_min: Some(23_200.0),
            d1_max: Some(23_500.0),
        });
        assert!(EsNqLeadLagMirror.generate(&ctx).is_none());
    }

    #[test]
    fn lead_lag_needs_a_peer() {
        let ctx = base_ctx(6526.0);
        assert!(!EsNqLeadLagMirror.should_run(&ctx));
        assert!(EsNqLeadLagMirror.generate(&ctx).is_none());
    }
}
