// =============================================================================
// Strategy Selector — runs the pattern bank and produces one Decision
// =============================================================================
//
// Pipeline, in order:
//
//   1.  Reset daily counters on UTC date rollover
//   2.  Daily signal cap
//   3.  Regime detection
//   4.  Run every applicable strategy, collect (confidence, signal)
//   5.  Family-deduplicate (best signal per family)
//   6.  Minimum-confidence filter
//   7.  Minimum-confluence filter
//   8.  Blind-spot hard rule (<5 ticks forces NO_TRADE, size 0)
//   9.  Pick the top remaining signal, else NEUTRAL
//   10. Final score = w_bn * strength_bn + w_mq * strength_mq
//   11. GO_LONG >= +0.15, GO_SHORT <= -0.15, else NEUTRAL with a
//       dealer-bias promotion when |bias| > 0.2
//   12. Per-strategy fire cooldown
//   13. Position sizing
//
// Evaluation order is the fixed registry order; ties are broken by
// confidence then lexicographic strategy name, so a tick is fully
// deterministic given its context.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::confluence::{self, ConfluenceScore};
use crate::config::EngineConfig;
use crate::market::FeatureSet;
use crate::regime::{MarketRegime, RegimeDetector, RegimeState};
use crate::strategies::{registry, PatternSignal, Strategy};
use crate::types::{DecisionName, Side};

/// Ticks to the nearest blind spot below which trading is suppressed.
const BLIND_SPOT_HARD_TICKS: f64 = 5.0;
/// Dealer-bias magnitude that promotes a neutral verdict.
const DEALER_BIAS_PROMOTION: f64 = 0.2;
/// Score thresholds for the final verdict.
const SCORE_GO_LONG: f64 = 0.15;
const SCORE_GO_SHORT: f64 = -0.15;
/// Confluence credit applied on top of the pattern confidence when the
/// structure agrees (execution-confluence gate input).
const CONFLUENCE_CREDIT: f64 = 0.25;

/// Final verdict of one selector tick.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub id: String,
    pub symbol: String,
    pub name: DecisionName,
    /// In [-1, +1], positive is long.
    pub score: f64,
    pub strength_bn: f64,
    pub strength_mq: f64,
    pub hard_rules_triggered: bool,
    pub near_bl: bool,
    pub d_bl_ticks: Option<f64>,
    /// Fraction of base size in [0, 1].
    pub position_sizing: f64,
    pub rationale: Vec<String>,
    pub signal: Option<PatternSignal>,
    pub timestamp: f64,
}

impl Decision {
    fn empty(ctx: &FeatureSet, name: DecisionName) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: ctx.sym.clone(),
            name,
            score: 0.0,
            strength_bn: 0.0,
            strength_mq: 0.0,
            hard_rules_triggered: false,
            near_bl: false,
            d_bl_ticks: None,
            position_sizing: 0.0,
            rationale: Vec::new(),
            signal: None,
            timestamp: ctx.ts,
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self.name, DecisionName::GoLong | DecisionName::GoShort) && self.signal.is_some()
    }
}

/// Regime-dependent size multiplier; configuration hooks would replace
/// these constants per deployment.
fn regime_multiplier(regime: Option<&RegimeState>) -> f64 {
    match regime.map(|r| r.regime) {
        Some(MarketRegime::Trending) => 1.0,
        Some(MarketRegime::Ranging) => 0.9,
        Some(MarketRegime::Squeeze) => 0.8,
        Some(MarketRegime::Volatile) => 0.7,
        None => 0.9,
    }
}

// =============================================================================
// Selector
// =============================================================================

pub struct StrategySelector {
    strategies: Vec<Box<dyn Strategy>>,
    max_signals_per_day: u32,
    cooldown_secs: f64,
    min_confidence: f64,
    min_confluence: f64,
    w_bn: f64,
    w_mq: f64,

    current_date: Option<String>,
    signals_today: u32,
    last_fire: HashMap<&'static str, f64>,
}

impl StrategySelector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            strategies: registry(),
            max_signals_per_day: config.max_signals_per_day,
            cooldown_secs: config.pattern_fire_cooldown_sec as f64,
            min_confidence: config.min_pattern_confidence,
            min_confluence: config.min_confluence_execution,
            w_bn: config.battle_navale_weight,
            w_mq: config.menthorq_weight,
            current_date: None,
            signals_today: 0,
            last_fire: HashMap::new(),
        }
    }

    /// Run one full selector tick over the feature view.
    pub fn analyze(&mut self, ctx: &FeatureSet) -> Decision {
        // ── 1. Daily rollover ────────────────────────────────────────────
        self.maybe_reset_daily(ctx.ts);

        // ── 2. Daily cap ─────────────────────────────────────────────────
        if self.signals_today >= self.max_signals_per_day {
            let mut d = Decision::empty(ctx, DecisionName::NoTrade);
            d.rationale.push("daily_limit_reached".to_string());
            return d;
        }

        // ── 3. Regime ────────────────────────────────────────────────────
        let regime = RegimeDetector::detect(ctx);

        // ── Confluence context (used by the hard rule and the scoring) ──
        let confluence = confluence::evaluate(ctx);

        // ── 8 (hoisted). Blind-spot hard rule dominates everything ──────
        if let Some(d_bl) = confluence.nearest_blind_spot_ticks {
            if d_bl < BLIND_SPOT_HARD_TICKS {
                let mut d = Decision::empty(ctx, DecisionName::NoTrade);
                d.hard_rules_triggered = true;
                d.near_bl = true;
                d.d_bl_ticks = Some(d_bl);
                d.strength_mq = confluence.strength_mq;
                d.rationale.push("BL proche (<5 ticks)".to_string());
                info!(
                    sym = %ctx.sym,
                    d_bl_ticks = format!("{d_bl:.1}"),
                    "blind-spot hard rule — trading suppressed"
                );
                return d;
            }
        }

        // ── 4. Run the bank ──────────────────────────────────────────────
        let mut candidates: Vec<(f64, PatternSignal)> = Vec::new();
        for strategy in &self.strategies {
            if !strategy.should_run(ctx) {
                continue;
            }
            if let Some(signal) = strategy.generate(ctx) {
                debug!(
                    sym = %ctx.sym,
                    strategy = signal.strategy,
                    side = %signal.side,
                    confidence = signal.confidence,
                    "candidate signal"
                );
                candidates.push((signal.confidence, signal));
            }
        }

        // ── 5. Family dedup, 6. confidence filter ───────────────────────
        let mut best = dedup_by_family(candidates);
        best.retain(|(score, _)| *score >= self.min_confidence);

        // ── 7. Confluence filter ────────────────────────────────────────
        best.retain(|(score, _)| {
            execution_confluence(*score, confluence.strength_mq) >= self.min_confluence
        });

        // ── 9. Top signal or neutral ────────────────────────────────────
        let bl_band = confluence::band_ticks(ctx.vix_regime);
        let near_bl = confluence
            .nearest_blind_spot_ticks
            .is_some_and(|d| d <= bl_band);

        sort_candidates(&mut best);
        let Some((confidence, signal)) = best.into_iter().next() else {
            let mut d = Decision::empty(ctx, DecisionName::Neutral);
            d.strength_mq = confluence.strength_mq;
            d.near_bl = near_bl;
            d.d_bl_ticks = confluence.nearest_blind_spot_ticks;
            d.rationale.push("no_qualified_pattern".to_string());
            if let Some(r) = &regime {
                d.rationale.push(format!("regime={}", r.regime));
            }
            return d;
        };

        // ── 10/11. Final score and verdict ──────────────────────────────
        let (name, score) =
            self.score_signal(&signal, confidence, &confluence, ctx.dealer_bias);

        // ── 12. Per-strategy cooldown ───────────────────────────────────
        if matches!(name, DecisionName::GoLong | DecisionName::GoShort) {
            if let Some(last) = self.last_fire.get(signal.strategy) {
                let elapsed = ctx.ts - last;
                if elapsed < self.cooldown_secs {
                    let mut d = Decision::empty(ctx, DecisionName::NoTrade);
                    d.strength_bn = signed(signal.side, confidence);
                    d.strength_mq = confluence.strength_mq;
                    d.rationale.push(format!(
                        "cooldown_active: {} fired {:.0}s ago",
                        signal.strategy, elapsed
                    ));
                    return d;
                }
            }
        }

        // ── 13. Sizing and assembly ─────────────────────────────────────
        let mut decision = Decision::empty(ctx, name);
        decision.score = score.clamp(-1.0, 1.0);
        decision.strength_bn = signed(signal.side, confidence);
        decision.strength_mq = confluence.strength_mq;
        decision.near_bl = near_bl;
        decision.d_bl_ticks = confluence.nearest_blind_spot_ticks;
        decision
            .rationale
            .push(format!("pattern={} conf={confidence:.2}", signal.strategy));
        if let Some(r) = &regime {
            decision
                .rationale
                .push(format!("regime={} vol={}", r.regime, r.vol_tier));
        }
        decision
            .rationale
            .push(format!("strength_mq={:.2}", confluence.strength_mq));

        if matches!(name, DecisionName::GoLong | DecisionName::GoShort) {
            let sizing = ctx.vix_regime.size_multiplier()
                * ctx.session_phase.size_multiplier()
                * regime_multiplier(regime.as_ref());
            decision.position_sizing = sizing.clamp(0.0, 1.0);
            decision.signal = Some(signal.clone());

            self.last_fire.insert(signal.strategy, ctx.ts);
            self.signals_today += 1;

            info!(
                sym = %ctx.sym,
                decision = %name,
                strategy = signal.strategy,
                score = format!("{:.3}", decision.score),
                sizing = format!("{:.2}", decision.position_sizing),
                signals_today = self.signals_today,
                "decision emitted"
            );
        } else {
            decision.signal = Some(signal);
        }

        decision
    }

    fn score_signal(
        &self,
        signal: &PatternSignal,
        confidence: f64,
        confluence: &ConfluenceScore,
        dealer_bias: f64,
    ) -> (DecisionName, f64) {
        let side_sign = match signal.side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        };
        let magnitude = self.w_bn * confidence + self.w_mq * confluence.strength_mq;
        let score = side_sign * magnitude;

        let name = if score >= SCORE_GO_LONG {
            DecisionName::GoLong
        } else if score <= SCORE_GO_SHORT {
            DecisionName::GoShort
        } else if dealer_bias > DEALER_BIAS_PROMOTION && signal.side == Side::Long {
            DecisionName::GoLong
        } else if dealer_bias < -DEALER_BIAS_PROMOTION && signal.side == Side::Short {
            DecisionName::GoShort
        } else {
            DecisionName::Neutral
        };
        (name, score)
    }

    fn maybe_reset_daily(&mut self, ts: f64) {
        let date = utc_date(ts);
        if self.current_date.as_deref() != Some(date.as_str()) {
            if self.current_date.is_some() {
                info!(
                    old_date = self.current_date.as_deref().unwrap_or(""),
                    new_date = %date,
                    "date rolled — resetting selector daily counters"
                );
            }
            self.current_date = Some(date);
            self.signals_today = 0;
        }
    }

    pub fn signals_today(&self) -> u32 {
        self.signals_today
    }
}

fn signed(side: Side, confidence: f64) -> f64 {
    match side {
        Side::Long => confidence,
        Side::Short => -confidence,
    }
}

fn utc_date(ts: f64) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d")
        .to_string()
}

/// Pattern confidence with confluence credit; the execution gate input.
fn execution_confluence(confidence: f64, strength_mq: f64) -> f64 {
    (confidence + CONFLUENCE_CREDIT * strength_mq.max(0.0)).clamp(0.0, 1.0)
}

/// Deterministic ordering: confidence descending, then strategy name.
fn sort_candidates(candidates: &mut [(f64, PatternSignal)]) {
    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.strategy.cmp(b.1.strategy))
    });
}

/// Keep only the best candidate per family.
fn dedup_by_family(candidates: Vec<(f64, PatternSignal)>) -> Vec<(f64, PatternSignal)> {
    let mut sorted = candidates;
    sort_candidates(&mut sorted);
    let mut seen = std::collections::HashSet::new();
    sorted
        .into_iter()
        .filter(|(_, sig)| seen.insert(sig.family))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testutil::base_ctx;
    use crate::types::SignalFamily;

    fn selector() -> StrategySelector {
        StrategySelector::new(&EngineConfig::default())
    }

    fn signal(
        strategy: &'static str,
        family: SignalFamily,
        side: Side,
        confidence: f64,
    ) -> (f64, PatternSignal) {
        (
            confidence,
            PatternSignal {
                strategy,
                family,
                side,
                confidence,
                entry: 6500.0,
                stop: 6498.0,
                targets: vec![6504.0],
                reason: "test".to_string(),
                metadata: Default::default(),
                timestamp: 0.0,
            },
        )
    }

    /// S1: a 0DTE wall sweep context produces GO_SHORT with the reversal
    /// signal, stop beyond the wall and first target four ticks away.
    #[test]
    fn scenario_s1_zero_dte_sweep_goes_short() {
        let mut sel = selector();
        let mut ctx = base_ctx(6426.0);
        ctx.orderflow.last_wick_ticks = Some(8.0);
        ctx.orderflow.delta_flip = true;
        ctx.orderflow.absorption_bid = true;
        ctx.orderflow.absorption_price = Some(6425.5);

        let d = sel.analyze(&ctx);
        assert_eq!(d.name, DecisionName::GoShort);
        let sig = d.signal.as_ref().unwrap();
        assert_eq!(sig.strategy, "zero_dte_wall_sweep_reversal");
        assert_eq!(sig.side, Side::Short);
        assert!((sig.confidence - 0.66).abs() < f64::EPSILON);
        assert!((sig.entry - 6426.0).abs() < f64::EPSILON);
        assert!(sig.stop > 6425.0 + 2.0 - 1e-9);
        assert!((sig.targets[0] - (sig.entry - 1.0)).abs() < f64::EPSILON);
        assert!(d.score <= -0.15);
        assert!(d.position_sizing > 0.0);
    }

    /// S2: gamma wall break-and-go context produces GO_LONG at 0.70.
    #[test]
    fn scenario_s2_gamma_wall_break_goes_long() {
        let mut sel = selector();
        let mut ctx = base_ctx(6503.0);
        ctx.vwap.as_mut().unwrap().vwap = 6502.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;

        let d = sel.analyze(&ctx);
        assert_eq!(d.name, DecisionName::GoLong);
        let sig = d.signal.as_ref().unwrap();
        assert_eq!(sig.strategy, "gamma_wall_break_and_go");
        assert!((sig.confidence - 0.70).abs() < f64::EPSILON);
        assert!(d.score >= 0.15);
    }

    /// S3: a blind spot within 5 ticks forces NO_TRADE regardless of any
    /// other favourable input.
    #[test]
    fn scenario_s3_blind_spot_hard_rule_dominates() {
        let mut sel = selector();
        let mut ctx = base_ctx(6499.0);
        // Every favourable trigger on.
        ctx.orderflow.last_wick_ticks = Some(8.0);
        ctx.orderflow.delta_flip = true;
        ctx.orderflow.absorption_bid = true;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;
        // Blind spot 1 tick away.
        ctx.menthorq.blind_spots = vec![6499.25];

        let d = sel.analyze(&ctx);
        assert_eq!(d.name, DecisionName::NoTrade);
        assert!(d.hard_rules_triggered);
        assert!(d.near_bl);
        assert!((d.position_sizing - 0.0).abs() < f64::EPSILON);
        assert!(d.rationale.iter().any(|r| r == "BL proche (<5 ticks)"));
        assert!((d.d_bl_ticks.unwrap() - 1.0).abs() < 1e-9);
    }

    /// S4: stale MenthorQ suppresses level strategies; a VWAP-only pattern
    /// can still fire.
    #[test]
    fn scenario_s4_stale_menthorq_limits_the_bank() {
        let mut sel = selector();
        let mut ctx = base_ctx(6503.0);
        ctx.menthorq.stale = true;
        // Gamma-wall triggers all on; must NOT fire because of staleness.
        ctx.vwap.as_mut().unwrap().vwap = 6502.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;

        let d = sel.analyze(&ctx);
        assert!(d
            .signal
            .as_ref()
            .map_or(true, |s| s.strategy != "gamma_wall_break_and_go"));

        // A squeeze break (VWAP-only) still qualifies once compressed.
        let mut ctx2 = base_ctx(6500.0);
        ctx2.menthorq = Default::default();
        ctx2.menthorq.stale = true;
        ctx2.band_width = Some(3.0);
        ctx2.band_width_median = Some(8.0);
        ctx2.last_price = Some(ctx2.vwap.as_ref().unwrap().sd1_up.unwrap() + 0.5);
        let signals: Vec<&str> = {
            let mut found = Vec::new();
            for s in crate::strategies::registry() {
                if s.should_run(&ctx2) && s.generate(&ctx2).is_some() {
                    found.push(s.name());
                }
            }
            found
        };
        assert!(signals.contains(&"vwap_band_squeeze_break"));
    }

    /// S6: two same-family signals — only the higher-confidence one
    /// survives dedup.
    #[test]
    fn scenario_s6_family_dedup_keeps_best() {
        let candidates = vec![
            signal("breakout_a", SignalFamily::Breakout, Side::Long, 0.72),
            signal("breakout_b", SignalFamily::Breakout, Side::Long, 0.80),
            signal("reversal_a", SignalFamily::Reversal, Side::Short, 0.70),
        ];
        let deduped = dedup_by_family(candidates);
        assert_eq!(deduped.len(), 2);
        let breakout: Vec<_> = deduped
            .iter()
            .filter(|(_, s)| s.family == SignalFamily::Breakout)
            .collect();
        assert_eq!(breakout.len(), 1);
        assert_eq!(breakout[0].1.strategy, "breakout_b");
        assert!((breakout[0].0 - 0.80).abs() < f64::EPSILON);
    }

    #[test]
    fn dedup_ties_break_by_name() {
        let candidates = vec![
            signal("zeta", SignalFamily::Breakout, Side::Long, 0.75),
            signal("alpha", SignalFamily::Breakout, Side::Long, 0.75),
        ];
        let deduped = dedup_by_family(candidates);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].1.strategy, "alpha");
    }

    #[test]
    fn daily_cap_forces_no_trade() {
        let mut cfg = EngineConfig::default();
        cfg.max_signals_per_day = 2;
        // Disable the cooldown so the cap is what stops us.
        cfg.pattern_fire_cooldown_sec = 0;
        let mut sel = StrategySelector::new(&cfg);

        let mut actionable = 0;
        for i in 0..10 {
            let mut ctx = base_ctx(6503.0);
            ctx.ts += i as f64 * 10.0;
            ctx.vwap.as_mut().unwrap().vwap = 6502.0;
            ctx.orderflow.delta_burst_active = true;
            ctx.orderflow.quotes_speed_up = true;
            ctx.menthorq.gamma_flip = true;
            let d = sel.analyze(&ctx);
            if d.is_actionable() {
                actionable += 1;
            }
            if i >= 2 {
                assert_eq!(d.name, DecisionName::NoTrade);
                assert!(d.rationale.iter().any(|r| r == "daily_limit_reached"));
            }
        }
        assert_eq!(actionable, 2);
    }

    #[test]
    fn daily_counters_reset_on_rollover() {
        let mut cfg = EngineConfig::default();
        cfg.max_signals_per_day = 1;
        cfg.pattern_fire_cooldown_sec = 0;
        let mut sel = StrategySelector::new(&cfg);

        let mut ctx = base_ctx(6503.0);
        ctx.vwap.as_mut().unwrap().vwap = 6502.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;

        assert!(sel.analyze(&ctx).is_actionable());
        ctx.ts += 60.0;
        assert_eq!(sel.analyze(&ctx).name, DecisionName::NoTrade);

        // Next UTC day.
        ctx.ts += 86_400.0;
        assert!(sel.analyze(&ctx).is_actionable());
    }

    #[test]
    fn cooldown_blocks_consecutive_fires_of_one_strategy() {
        let mut sel = selector(); // 60 s cooldown
        let mut ctx = base_ctx(6503.0);
        ctx.vwap.as_mut().unwrap().vwap = 6502.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;

        let d1 = sel.analyze(&ctx);
        assert!(d1.is_actionable());

        // 10 s later: same setup, same strategy — blocked.
        ctx.ts += 10.0;
        let d2 = sel.analyze(&ctx);
        assert_eq!(d2.name, DecisionName::NoTrade);
        assert!(d2.rationale.iter().any(|r| r.starts_with("cooldown_active")));

        // 70 s after the first fire: allowed again.
        ctx.ts += 60.0;
        let d3 = sel.analyze(&ctx);
        assert!(d3.is_actionable());
        let gap = d3.signal.as_ref().unwrap().timestamp - d1.signal.as_ref().unwrap().timestamp;
        assert!(gap >= 60.0);
    }

    #[test]
    fn neutral_when_nothing_qualifies() {
        let mut sel = selector();
        let ctx = base_ctx(6480.0); // no triggers set
        let d = sel.analyze(&ctx);
        assert_eq!(d.name, DecisionName::Neutral);
        assert!(d.signal.is_none());
        assert!(d.rationale.iter().any(|r| r == "no_qualified_pattern"));
    }

    #[test]
    fn position_sizing_reflects_vix_and_session() {
        let mut sel = selector();
        let mut ctx = base_ctx(6503.0);
        ctx.vwap.as_mut().unwrap().vwap = 6502.0;
        ctx.orderflow.delta_burst_active = true;
        ctx.orderflow.quotes_speed_up = true;
        ctx.menthorq.gamma_flip = true;
        // MID VIX (0.75) * NY afternoon (1.0) * ranging (0.9).
        let d = sel.analyze(&ctx);
        assert!(d.is_actionable());
        assert!(d.position_sizing <= 0.75 + 1e-9);
        assert!(d.position_sizing > 0.0);
    }

    #[test]
    fn low_confidence_candidates_are_filtered() {
        let mut sel = selector();
        // HVL fade fires at 0.60 which is below the default 0.65 floor;
        // with nothing else on, the tick is neutral.
        let ctx = base_ctx(6461.25);
        let d = sel.analyze(&ctx);
        assert_eq!(d.name, DecisionName::Neutral);
    }
}
