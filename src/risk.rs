// =============================================================================
// Risk Gate — ordered pre-trade checks protecting capital
// =============================================================================
//
// Gates, evaluated short-circuit:
//   1. Daily realised-loss limit
//   2. Maximum daily trades
//   3. Session window [no_trade_before, no_trade_after]
//   4. Per-trade currency risk (may reduce size instead of denying)
//   5. Confluence minimum
//   6. Maximum concurrent positions
//
// Daily statistics reset automatically when the UTC date rolls over.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::selector::Decision;
use crate::session::SessionManager;
use crate::types::tick_value_for;

/// Outcome of a risk evaluation, consumed before order dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRulesResult {
    pub allow: bool,
    pub size_multiplier: f64,
    pub reasons: Vec<String>,
}

impl ExecutionRulesResult {
    fn deny(reason: String) -> Self {
        Self {
            allow: false,
            size_multiplier: 0.0,
            reasons: vec![reason],
        }
    }
}

struct Inner {
    current_date: String,
    realized_loss_today: f64,
    trades_today: u32,
    open_positions: u32,
}

pub struct RiskGate {
    config: RiskConfig,
    min_confluence: f64,
    sessions: SessionManager,
    state: RwLock<Inner>,
}

impl RiskGate {
    pub fn new(config: RiskConfig, min_confluence: f64) -> Self {
        let sessions = SessionManager::from_risk_config(&config);
        info!(
            daily_loss_limit = config.daily_loss_limit,
            max_daily_trades = config.max_daily_trades,
            base_position_size = config.base_position_size,
            max_positions_concurrent = config.max_positions_concurrent,
            "risk gate initialised"
        );
        Self {
            config,
            min_confluence,
            sessions,
            state: RwLock::new(Inner {
                current_date: String::new(),
                realized_loss_today: 0.0,
                trades_today: 0,
                open_positions: 0,
            }),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Evaluate a decision against all gates. `now` is the event clock in
    /// epoch seconds.
    pub fn evaluate(&self, decision: &Decision, now: f64) -> ExecutionRulesResult {
        self.maybe_reset_daily(now);

        let Some(signal) = decision.signal.as_ref() else {
            return ExecutionRulesResult::deny("no signal attached".to_string());
        };

        let state = self.state.read();

        // 1. Daily realised loss.
        if state.realized_loss_today >= self.config.daily_loss_limit {
            let msg = format!(
                "daily loss limit reached: {:.2} >= {:.2}",
                state.realized_loss_today, self.config.daily_loss_limit
            );
            warn!(sym = %decision.symbol, "{msg}");
            return ExecutionRulesResult::deny(msg);
        }

        // 2. Daily trade count.
        if state.trades_today >= self.config.max_daily_trades {
            let msg = format!(
                "max daily trades reached: {} >= {}",
                state.trades_today, self.config.max_daily_trades
            );
            warn!(sym = %decision.symbol, "{msg}");
            return ExecutionRulesResult::deny(msg);
        }

        // 3. Session window.
        if !self.sessions.in_trading_window(now) {
            return ExecutionRulesResult::deny("outside trading window".to_string());
        }

        // 4. Per-trade currency risk; shrink before denying.
        let mut reasons = Vec::new();
        let mut size_multiplier = 1.0;
        let risk_per_contract = (signal.entry - signal.stop).abs()
            / crate::types::tick_size_for(&decision.symbol).max(f64::EPSILON)
            * tick_value_for(&decision.symbol);
        if risk_per_contract > 0.0 {
            let base_qty =
                (self.config.base_position_size as f64 * decision.position_sizing).floor();
            let planned_risk = risk_per_contract * base_qty.max(1.0);
            if risk_per_contract > self.config.max_risk_per_trade {
                return ExecutionRulesResult::deny(format!(
                    "per-trade risk {risk_per_contract:.2} exceeds limit {:.2} even for one contract",
                    self.config.max_risk_per_trade
                ));
            }
            if planned_risk > self.config.max_risk_per_trade {
                size_multiplier = self.config.max_risk_per_trade / planned_risk;
                reasons.push(format!(
                    "size reduced: planned risk {planned_risk:.2} > {:.2}",
                    self.config.max_risk_per_trade
                ));
            }
        }

        // 5. Confluence minimum.
        let confluence =
            (decision.strength_bn.abs() + 0.25 * decision.strength_mq.max(0.0)).clamp(0.0, 1.0);
        if confluence < self.min_confluence {
            return ExecutionRulesResult::deny(format!(
                "confluence {confluence:.2} below minimum {:.2}",
                self.min_confluence
            ));
        }

        // 6. Concurrent positions.
        if state.open_positions >= self.config.max_positions_concurrent {
            return ExecutionRulesResult::deny(format!(
                "max concurrent positions reached: {}",
                state.open_positions
            ));
        }

        debug!(
            sym = %decision.symbol,
            size_multiplier,
            confluence = format!("{confluence:.2}"),
            "risk gate passed"
        );
        ExecutionRulesResult {
            allow: true,
            size_multiplier,
            reasons,
        }
    }

    /// Final contract count for an allowed decision. Orders of quantity 0
    /// are suppressed by the caller.
    pub fn position_size(&self, decision: &Decision, rules: &ExecutionRulesResult) -> u32 {
        if !rules.allow || decision.hard_rules_triggered {
            return 0;
        }
        let qty = (self.config.base_position_size as f64
            * decision.position_sizing
            * rules.size_multiplier)
            .floor() as u32;
        qty.min(self.config.max_position_size)
    }

    /// Record an executed entry.
    pub fn record_trade(&self) {
        let mut s = self.state.write();
        s.trades_today += 1;
        s.open_positions += 1;
    }

    /// Record a realised close.
    pub fn record_close(&self, pnl: f64) {
        let mut s = self.state.write();
        s.open_positions = s.open_positions.saturating_sub(1);
        if pnl < 0.0 {
            s.realized_loss_today += -pnl;
        }
    }

    pub fn trades_today(&self) -> u32 {
        self.state.read().trades_today
    }

    fn maybe_reset_daily(&self, now: f64) {
        let date = DateTime::<Utc>::from_timestamp(now as i64, 0)
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d")
            .to_string();
        {
            let s = self.state.read();
            if s.current_date == date {
                return;
            }
        }
        let mut s = self.state.write();
        // Double-check after taking the write lock.
        if s.current_date != date {
            if !s.current_date.is_empty() {
                info!(old_date = %s.current_date, new_date = %date, "risk counters reset");
            }
            s.current_date = date;
            s.realized_loss_today = 0.0;
            s.trades_today = 0;
        }
    }
}
