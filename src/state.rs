// =============================================================================
// Central Engine State — Meridian Futures Core
// =============================================================================
//
// The single source of truth for the process. The event dispatch task is
// the sole writer of the snapshot store; the selector driver owns the
// metrics and selector through short write locks. A bounded ring of recent
// decisions is retained for inspection.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::config::EngineConfig;
use crate::journal::TradeJournal;
use crate::metrics::AdvancedMetrics;
use crate::risk::RiskGate;
use crate::router::OrderRouter;
use crate::selector::{Decision, StrategySelector};
use crate::market::SnapshotStore;
use crate::types::tick_size_for;

/// Maximum number of recent decisions retained for inspection.
const MAX_RECENT_DECISIONS: usize = 100;

pub struct EngineState {
    pub config: Arc<EngineConfig>,
    pub snapshots: Arc<SnapshotStore>,
    pub metrics: RwLock<HashMap<String, AdvancedMetrics>>,
    pub selector: RwLock<StrategySelector>,
    pub risk_gate: Arc<RiskGate>,
    pub router: Arc<OrderRouter>,
    pub journal: Arc<TradeJournal>,
    pub recent_decisions: RwLock<Vec<Decision>>,
    pub start_time: std::time::Instant,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let snapshots = Arc::new(SnapshotStore::new(
            config.vix_low_max,
            config.vix_mid_max,
            config.menthorq_update_interval_secs.clone(),
        ));
        snapshots.register_symbols(&config.symbols);

        let mut metrics = HashMap::new();
        for sym in &config.symbols {
            metrics.insert(sym.clone(), AdvancedMetrics::new(tick_size_for(sym)));
        }

        let selector = StrategySelector::new(&config);
        let risk_gate = Arc::new(RiskGate::new(
            config.risk.clone(),
            config.min_confluence_execution,
        ));
        let router = Arc::new(OrderRouter::new(config.router.clone()));
        let journal = Arc::new(TradeJournal::open(&config.journal_path)?);

        Ok(Self {
            config: Arc::new(config),
            snapshots,
            metrics: RwLock::new(metrics),
            selector: RwLock::new(selector),
            risk_gate,
            router,
            journal,
            recent_decisions: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        })
    }

    /// Record a decision in the bounded inspection ring.
    pub fn push_decision(&self, decision: Decision) {
        let mut ring = self.recent_decisions.write();
        ring.push(decision);
        while ring.len() > MAX_RECENT_DECISIONS {
            ring.remove(0);
        }
    }

    /// The sibling index for the lead-lag strategy: the first configured
    /// symbol on the other side of the ES/NQ divide.
    pub fn peer_symbol(&self, sym: &str) -> Option<String> {
        let is_nq = sym.to_uppercase().contains("NQ");
        self.config
            .symbols
            .iter()
            .find(|s| s.as_str() != sym && s.to_uppercase().contains("NQ") != is_nq)
            .cloned()
    }
}
