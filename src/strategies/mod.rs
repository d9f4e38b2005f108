// =============================================================================
// Pattern Strategies — sixteen independent predicates over the feature view
// =============================================================================
//
// Each strategy is a value exposing its family, required inputs,
// `should_run` and `generate`. The selector iterates a fixed, ordered
// registry; strategies are added or removed by editing `registry()`, never
// by branching. Every strategy returns `None` when a required input is
// missing, and never panics.
// =============================================================================

pub mod menthorq;
pub mod orderflow;
pub mod session;
pub mod structure;

use std::collections::HashMap;

use serde::Serialize;

use crate::market::FeatureSet;
use crate::types::{Side, SignalFamily};

/// A candidate trade emitted by one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct PatternSignal {
    pub strategy: &'static str,
    pub family: SignalFamily,
    pub side: Side,
    /// In [0, 1].
    pub confidence: f64,
    pub entry: f64,
    pub stop: f64,
    /// Ordered nearest-first.
    pub targets: Vec<f64>,
    pub reason: String,
    pub metadata: HashMap<String, f64>,
    pub timestamp: f64,
}

/// A registered pattern detector.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn family(&self) -> SignalFamily;
    /// Feature keys the strategy needs; informational, used for diagnostics.
    fn required_inputs(&self) -> &'static [&'static str];
    /// Cheap pre-check; `generate` is only called when this returns true.
    fn should_run(&self, ctx: &FeatureSet) -> bool;
    fn generate(&self, ctx: &FeatureSet) -> Option<PatternSignal>;
}

/// The fixed evaluation order. Deterministic across ticks.
pub fn registry() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(menthorq::ZeroDteWallSweepReversal),
        Box::new(menthorq::GammaWallBreakAndGo),
        Box::new(menthorq::HvlMagnetFade),
        Box::new(menthorq::D1ExtremeTrap),
        Box::new(menthorq::GexClusterMeanRevert),
        Box::new(menthorq::CallPutChannelRotation),
        Box::new(structure::DealerFlipBreakout),
        Box::new(structure::VwapBandSqueezeBreak),
        Box::new(orderflow::LiquiditySweepReversal),
        Box::new(structure::GammaPinReversion),
        Box::new(structure::ProfileGapFill),
        Box::new(orderflow::CvdDivergenceTrap),
        Box::new(orderflow::StackedImbalanceContinuation),
        Box::new(orderflow::IcebergTrackerFollow),
        Box::new(session::OpeningDriveFail),
        Box::new(session::EsNqLeadLagMirror),
    ]
}

// -----------------------------------------------------------------------------
// Shared helpers
// -----------------------------------------------------------------------------

/// Two targets stepping away from the entry in the trade direction,
/// nearest first.
pub(crate) fn targets_toward(entry: f64, side: Side, ticks: [f64; 2], tick_size: f64) -> Vec<f64> {
    let sign = match side {
        Side::Long => 1.0,
        Side::Short => -1.0,
    };
    vec![
        entry + sign * ticks[0] * tick_size,
        entry + sign * ticks[1] * tick_size,
    ]
}

/// The level nearest to `price` among the provided candidates.
pub(crate) fn nearest_level(price: f64, levels: impl Iterator<Item = f64>) -> Option<f64> {
    levels.min_by(|a, b| {
        (a - price)
            .abs()
            .partial_cmp(&(b - price).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}
