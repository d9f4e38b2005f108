// =============================================================================
// Meridian Futures Core — Main Entry Point
// =============================================================================
//
// Task layout:
//   - event dispatch task: tails the unified JSONL file and is the sole
//     mutator of the snapshot store
//   - selector driver: every analysis interval, recomputes metrics, runs
//     the strategy bank, and routes allowed decisions
//   - heartbeat task: keeps bridge connections alive
//   - stats task: periodic tailer throughput metric
//
// Exit codes: 0 clean shutdown, 1 invalid configuration, 2 unrecoverable
// event-file I/O, 3 bridge failure with paper mode disabled.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod confluence;
mod config;
mod events;
mod journal;
mod market;
mod metrics;
mod regime;
mod risk;
mod router;
mod selector;
mod session;
mod state;
mod strategies;
mod tailer;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::journal::JournalRecord;
use crate::market::FeatureSet;
use crate::metrics::MetricsTick;
use crate::router::{Bracket, OrderRequest};
use crate::state::EngineState;
use crate::tailer::EventTailer;
use crate::types::{OrderType, TimeInForce};

/// Soft deadline for one symbol's analysis pass.
const ANALYSIS_SOFT_DEADLINE_MS: u128 = 100;

const EXIT_CONFIG: i32 = 1;
const EXIT_EVENT_IO: i32 = 2;
const EXIT_BRIDGE: i32 = 3;

#[derive(Debug)]
enum Fatal {
    EventIo(String),
    Bridge(String),
}

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian Futures Core starting up");

    // ── 1. Configuration ─────────────────────────────────────────────────
    let config_path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "engine_config.json".into());
    let mut config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    if let Ok(syms) = std::env::var("MERIDIAN_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(EXIT_CONFIG);
    }

    info!(
        symbols = ?config.symbols,
        data_dir = %config.data_dir,
        analysis_interval_ms = config.analysis_interval_ms,
        "configuration validated"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = match EngineState::new(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to initialise engine state");
            std::process::exit(EXIT_EVENT_IO);
        }
    };

    let (fatal_tx, mut fatal_rx) = tokio::sync::mpsc::channel::<Fatal>(4);
    // Dispatch -> driver notification: which symbols have fresh events.
    let (dirty_tx, mut dirty_rx) = tokio::sync::mpsc::channel::<String>(1024);

    // ── 3. Event dispatch task ───────────────────────────────────────────
    let dispatch_state = state.clone();
    let dispatch_fatal = fatal_tx.clone();
    tokio::spawn(async move {
        let cfg = dispatch_state.config.clone();
        let mut tailer = EventTailer::new(
            cfg.data_dir.clone(),
            cfg.unified_pattern.clone(),
            cfg.backfill_mb,
        );

        // Stats task shares the tailer counters.
        let stats = tailer.stats.clone();
        tokio::spawn(async move {
            let mut last_total = 0u64;
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                let total = stats.events_total.load(std::sync::atomic::Ordering::Relaxed);
                info!(
                    events_per_min = total - last_total,
                    events_total = total,
                    malformed = stats
                        .malformed_total
                        .load(std::sync::atomic::Ordering::Relaxed),
                    unknown_types = stats
                        .unknown_type_total
                        .load(std::sync::atomic::Ordering::Relaxed),
                    offset = stats
                        .current_offset
                        .load(std::sync::atomic::Ordering::Relaxed),
                    last_event_ts = stats.last_event_ts().unwrap_or(0.0),
                    "tailer throughput"
                );
                last_total = total;
            }
        });

        loop {
            match tailer.next_event().await {
                Ok(event) => {
                    if let Some(symbol) = dispatch_state.snapshots.apply_event(&event) {
                        // Backpressure is fine to drop: the driver only
                        // needs to know the symbol is dirty, not how often.
                        let _ = dirty_tx.try_send(symbol);
                    }
                }
                Err(e) => {
                    error!(error = %e, "unrecoverable event-file error");
                    let _ = dispatch_fatal.send(Fatal::EventIo(e.to_string())).await;
                    return;
                }
            }
        }
    });

    // ── 4. Selector driver ───────────────────────────────────────────────
    let driver_state = state.clone();
    let driver_fatal = fatal_tx.clone();
    tokio::spawn(async move {
        let interval_ms = driver_state.config.analysis_interval_ms;
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;

            // Drain the dirty set; analysis order stays the config order.
            let mut dirty = std::collections::HashSet::new();
            while let Ok(symbol) = dirty_rx.try_recv() {
                dirty.insert(symbol);
            }
            if dirty.is_empty() {
                continue;
            }

            for symbol in driver_state.config.symbols.clone() {
                if !dirty.contains(&symbol) {
                    continue;
                }
                if let Err(e) = run_analysis_tick(&driver_state, &symbol).await {
                    if driver_state.config.router.allow_paper {
                        // Unexpected; log with context and skip the tick.
                        error!(symbol = %symbol, error = %e, "analysis tick failed — skipping");
                    } else {
                        let _ = driver_fatal.send(Fatal::Bridge(e.to_string())).await;
                        return;
                    }
                }
            }
        }
    });

    // ── 5. Heartbeat task ────────────────────────────────────────────────
    let hb_state = state.clone();
    tokio::spawn(async move {
        let secs = hb_state.config.router.heartbeat_interval_sec.max(1);
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(secs));
        loop {
            interval.tick().await;
            hb_state.router.heartbeat_all().await;
        }
    });

    info!("all subsystems running — Ctrl+C to stop");

    // ── 6. Shutdown ──────────────────────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping");
            info!("Meridian Futures Core shut down complete");
        }
        fatal = fatal_rx.recv() => {
            match fatal {
                Some(Fatal::EventIo(msg)) => {
                    error!(error = %msg, "exiting: event file unrecoverable");
                    std::process::exit(EXIT_EVENT_IO);
                }
                Some(Fatal::Bridge(msg)) => {
                    error!(error = %msg, "exiting: bridge unreachable and paper disabled");
                    std::process::exit(EXIT_BRIDGE);
                }
                None => {}
            }
        }
    }
}

/// One full analysis pass for a symbol: metrics, selector, risk, routing.
async fn run_analysis_tick(state: &Arc<EngineState>, symbol: &str) -> anyhow::Result<()> {
    let started = std::time::Instant::now();

    let Some(snapshot) = state.snapshots.get(symbol) else {
        return Ok(());
    };
    if snapshot.ts_last_event <= 0.0 {
        return Ok(()); // nothing received yet
    }

    // ── Metrics ──────────────────────────────────────────────────────────
    let tick = MetricsTick::from_snapshot(&snapshot);
    let flow = {
        let mut metrics = state.metrics.write();
        let m = metrics
            .entry(symbol.to_string())
            .or_insert_with(|| crate::metrics::AdvancedMetrics::new(snapshot.tick_size));
        m.update_from_tick(&tick)
    };

    // ── Feature view & selector ──────────────────────────────────────────
    let peer_snapshot = state
        .peer_symbol(symbol)
        .and_then(|p| state.snapshots.get(&p));
    let ctx = FeatureSet::build(
        &snapshot,
        &flow,
        state.risk_gate.sessions(),
        peer_snapshot.as_ref(),
    );

    let decision = state.selector.write().analyze(&ctx);
    state.push_decision(decision.clone());

    if !decision.is_actionable() {
        finish_tick(symbol, started);
        return Ok(());
    }

    // ── Risk gate ────────────────────────────────────────────────────────
    let rules = state.risk_gate.evaluate(&decision, ctx.ts);
    if !rules.allow {
        info!(
            symbol,
            reasons = ?rules.reasons,
            "decision blocked by risk gate"
        );
        finish_tick(symbol, started);
        return Ok(());
    }
    let qty = state.risk_gate.position_size(&decision, &rules);
    if qty == 0 {
        info!(symbol, "order suppressed: computed quantity is zero");
        finish_tick(symbol, started);
        return Ok(());
    }

    // ── Routing & journaling ─────────────────────────────────────────────
    let Some(signal) = decision.signal.as_ref() else {
        return Ok(());
    };
    let request = OrderRequest {
        symbol: symbol.to_string(),
        side: signal.side,
        quantity: qty,
        order_type: OrderType::Market,
        limit_price: None,
        stop_price: None,
        time_in_force: TimeInForce::Day,
        bracket: Some(Bracket {
            stop_loss: Some(signal.stop),
            take_profit: signal.targets.first().copied(),
        }),
    };

    let result = state.router.place_order(&request).await?;
    state.risk_gate.record_trade();
    let record = JournalRecord::from_order(
        &request,
        &result,
        Some(signal.strategy.to_string()),
    );
    if let Err(e) = state.journal.record(&record) {
        error!(symbol, error = %e, "failed to journal order");
    }

    info!(
        symbol,
        decision = %decision.name,
        strategy = signal.strategy,
        qty,
        order_id = %result.order_id,
        paper = result.paper,
        "order routed"
    );

    finish_tick(symbol, started);
    Ok(())
}

fn finish_tick(symbol: &str, started: std::time::Instant) {
    let elapsed = started.elapsed().as_millis();
    if elapsed > ANALYSIS_SOFT_DEADLINE_MS {
        warn!(symbol, elapsed_ms = elapsed as u64, "analysis tick exceeded soft deadline");
    }
}
