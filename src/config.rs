// =============================================================================
// Engine Configuration — merged file + environment settings with atomic save
// =============================================================================
//
// Every tunable parameter lives here and is built once at startup; there is
// no hot reload. All fields carry `#[serde(default)]` so that adding new
// fields never breaks loading an older config file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_unified_pattern() -> String {
    "mia_unified_*.jsonl".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["ESU25_FUT_CME".to_string(), "NQU25_FUT_CME".to_string()]
}

fn default_backfill_mb() -> u64 {
    20
}

fn default_analysis_interval_ms() -> u64 {
    500
}

fn default_max_signals_per_day() -> u32 {
    12
}

fn default_pattern_fire_cooldown_sec() -> u64 {
    60
}

fn default_min_pattern_confidence() -> f64 {
    0.65
}

fn default_min_confluence_execution() -> f64 {
    0.70
}

fn default_battle_navale_weight() -> f64 {
    0.6
}

fn default_menthorq_weight() -> f64 {
    0.4
}

fn default_vix_low_max() -> f64 {
    15.0
}

fn default_vix_mid_max() -> f64 {
    25.0
}

fn default_mq_interval_low() -> u64 {
    600
}

fn default_mq_interval_mid() -> u64 {
    300
}

fn default_mq_interval_high() -> u64 {
    120
}

fn default_daily_loss_limit() -> f64 {
    1_000.0
}

fn default_max_daily_trades() -> u32 {
    12
}

fn default_base_position_size() -> u32 {
    1
}

fn default_max_position_size() -> u32 {
    3
}

fn default_max_positions_concurrent() -> u32 {
    1
}

fn default_no_trade_before() -> String {
    "13:35".to_string()
}

fn default_no_trade_after() -> String {
    "20:45".to_string()
}

fn default_max_risk_per_trade() -> f64 {
    500.0
}

fn default_router_host() -> String {
    "127.0.0.1".to_string()
}

fn default_es_port() -> u16 {
    11099
}

fn default_nq_port() -> u16 {
    11100
}

fn default_router_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_sec() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_journal_path() -> String {
    "trade_journal.jsonl".to_string()
}

// =============================================================================
// Sub-sections
// =============================================================================

/// Risk-gate limits and session window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Daily realised-loss limit in account currency.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,

    /// Maximum number of executed trades per UTC day.
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    /// Base contract count before multipliers.
    #[serde(default = "default_base_position_size")]
    pub base_position_size: u32,

    /// Hard cap on contracts per order.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: u32,

    /// Maximum simultaneously open positions.
    #[serde(default = "default_max_positions_concurrent")]
    pub max_positions_concurrent: u32,

    /// No entries before this UTC time ("HH:MM").
    #[serde(default = "default_no_trade_before")]
    pub no_trade_before: String,

    /// No entries after this UTC time ("HH:MM").
    #[serde(default = "default_no_trade_after")]
    pub no_trade_after: String,

    /// Maximum per-trade risk (|entry - stop| in currency) per contract lot.
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: default_daily_loss_limit(),
            max_daily_trades: default_max_daily_trades(),
            base_position_size: default_base_position_size(),
            max_position_size: default_max_position_size(),
            max_positions_concurrent: default_max_positions_concurrent(),
            no_trade_before: default_no_trade_before(),
            no_trade_after: default_no_trade_after(),
            max_risk_per_trade: default_max_risk_per_trade(),
        }
    }
}

/// Exchange-bridge connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_router_host")]
    pub host: String,

    /// Port for ES-family symbols.
    #[serde(default = "default_es_port")]
    pub es_port: u16,

    /// Port for NQ-family symbols.
    #[serde(default = "default_nq_port")]
    pub nq_port: u16,

    /// Hard timeout for connect/send/response, in milliseconds.
    #[serde(default = "default_router_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_sec")]
    pub heartbeat_interval_sec: u64,

    /// When false, a bridge failure is fatal (exit code 3) instead of
    /// falling back to paper mode.
    #[serde(default = "default_true")]
    pub allow_paper: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: default_router_host(),
            es_port: default_es_port(),
            nq_port: default_nq_port(),
            timeout_ms: default_router_timeout_ms(),
            heartbeat_interval_sec: default_heartbeat_interval_sec(),
            allow_paper: true,
        }
    }
}

/// Expected MenthorQ level-refresh interval per VIX regime, in seconds.
/// The snapshot flags the level book stale after 2x the interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenthorqIntervals {
    #[serde(default = "default_mq_interval_low")]
    pub low: u64,
    #[serde(default = "default_mq_interval_mid")]
    pub mid: u64,
    #[serde(default = "default_mq_interval_high")]
    pub high: u64,
}

impl Default for MenthorqIntervals {
    fn default() -> Self {
        Self {
            low: default_mq_interval_low(),
            mid: default_mq_interval_mid(),
            high: default_mq_interval_high(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Meridian engine, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the unified event files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Glob matched against file names in `data_dir`; the most recently
    /// modified match is tailed.
    #[serde(default = "default_unified_pattern")]
    pub unified_pattern: String,

    /// Megabytes to seek back from end-of-file on start, for backfill.
    #[serde(default = "default_backfill_mb")]
    pub backfill_mb: u64,

    /// Symbols the engine watches and trades.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Minimum wall-clock interval between selector ticks.
    #[serde(default = "default_analysis_interval_ms")]
    pub analysis_interval_ms: u64,

    /// Daily cap on non-NO_TRADE decisions.
    #[serde(default = "default_max_signals_per_day")]
    pub max_signals_per_day: u32,

    /// Minimum seconds between consecutive fires of the same strategy.
    #[serde(default = "default_pattern_fire_cooldown_sec")]
    pub pattern_fire_cooldown_sec: u64,

    /// Candidate signals below this confidence are discarded.
    #[serde(default = "default_min_pattern_confidence")]
    pub min_pattern_confidence: f64,

    /// Minimum confluence score required for execution.
    #[serde(default = "default_min_confluence_execution")]
    pub min_confluence_execution: f64,

    /// Weight of the base pattern strength in the final score.
    #[serde(default = "default_battle_navale_weight")]
    pub battle_navale_weight: f64,

    /// Weight of the MenthorQ confluence strength in the final score.
    #[serde(default = "default_menthorq_weight")]
    pub menthorq_weight: f64,

    /// VIX regime breakpoints: LOW below `vix_low_max`, MID below
    /// `vix_mid_max`, HIGH at or above it.
    #[serde(default = "default_vix_low_max")]
    pub vix_low_max: f64,
    #[serde(default = "default_vix_mid_max")]
    pub vix_mid_max: f64,

    #[serde(default)]
    pub menthorq_update_interval_secs: MenthorqIntervals,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub router: RouterConfig,

    /// Path of the append-only trade journal.
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            unified_pattern: default_unified_pattern(),
            backfill_mb: default_backfill_mb(),
            symbols: default_symbols(),
            analysis_interval_ms: default_analysis_interval_ms(),
            max_signals_per_day: default_max_signals_per_day(),
            pattern_fire_cooldown_sec: default_pattern_fire_cooldown_sec(),
            min_pattern_confidence: default_min_pattern_confidence(),
            min_confluence_execution: default_min_confluence_execution(),
            battle_navale_weight: default_battle_navale_weight(),
            menthorq_weight: default_menthorq_weight(),
            vix_low_max: default_vix_low_max(),
            vix_mid_max: default_vix_mid_max(),
            menthorq_update_interval_secs: MenthorqIntervals::default(),
            risk: RiskConfig::default(),
            router: RouterConfig::default(),
            journal_path: default_journal_path(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            data_dir = %config.data_dir,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Validate ranges. A failure here is fatal at startup (exit code 1).
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("config: symbols must not be empty");
        }
        if !(0.0..=1.0).contains(&self.min_pattern_confidence) {
            bail!("config: min_pattern_confidence must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.min_confluence_execution) {
            bail!("config: min_confluence_execution must be in [0, 1]");
        }
        let weight_sum = self.battle_navale_weight + self.menthorq_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            bail!("config: battle_navale_weight + menthorq_weight must sum to 1 (got {weight_sum})");
        }
        if self.vix_low_max >= self.vix_mid_max {
            bail!("config: vix_low_max must be below vix_mid_max");
        }
        if self.analysis_interval_ms == 0 {
            bail!("config: analysis_interval_ms must be positive");
        }
        if self.risk.base_position_size == 0 || self.risk.base_position_size > self.risk.max_position_size
        {
            bail!("config: base_position_size must be in [1, max_position_size]");
        }
        parse_hhmm(&self.risk.no_trade_before)
            .with_context(|| format!("config: invalid no_trade_before {:?}", self.risk.no_trade_before))?;
        parse_hhmm(&self.risk.no_trade_after)
            .with_context(|| format!("config: invalid no_trade_after {:?}", self.risk.no_trade_after))?;
        Ok(())
    }

    /// Expected MenthorQ refresh interval for a VIX regime, in seconds.
    pub fn menthorq_interval(&self, regime: crate::types::VixRegime) -> u64 {
        match regime {
            crate::types::VixRegime::Low => self.menthorq_update_interval_secs.low,
            crate::types::VixRegime::Mid => self.menthorq_update_interval_secs.mid,
            crate::types::VixRegime::High => self.menthorq_update_interval_secs.high,
        }
    }
}

/// Parse an "HH:MM" string into minutes since midnight.
pub fn parse_hhmm(s: &str) -> Result<u32> {
    let (h, m) = s
        .split_once(':')
        .with_context(|| format!("expected HH:MM, got {s:?}"))?;
    let h: u32 = h.parse().with_context(|| format!("bad hour in {s:?}"))?;
    let m: u32 = m.parse().with_context(|| format!("bad minute in {s:?}"))?;
    if h > 23 || m > 59 {
        bail!("time out of range: {s:?}");
    }
    Ok(h * 60 + m)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.unified_pattern, "mia_unified_*.jsonl");
        assert_eq!(cfg.backfill_mb, 20);
        assert_eq!(cfg.analysis_interval_ms, 500);
        assert_eq!(cfg.max_signals_per_day, 12);
        assert_eq!(cfg.pattern_fire_cooldown_sec, 60);
        assert!((cfg.min_pattern_confidence - 0.65).abs() < f64::EPSILON);
        assert!((cfg.min_confluence_execution - 0.70).abs() < f64::EPSILON);
        assert!((cfg.battle_navale_weight - 0.6).abs() < f64::EPSILON);
        assert!((cfg.menthorq_weight - 0.4).abs() < f64::EPSILON);
        assert_eq!(cfg.router.es_port, 11099);
        assert_eq!(cfg.router.nq_port, 11100);
        assert!(cfg.router.allow_paper);
        cfg.validate().unwrap();
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols.len(), 2);
        assert_eq!(cfg.risk.max_daily_trades, 12);
        assert_eq!(cfg.menthorq_update_interval_secs.mid, 300);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ES"], "router": { "es_port": 12099 } }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ES"]);
        assert_eq!(cfg.router.es_port, 12099);
        assert_eq!(cfg.router.nq_port, 11100);
        assert_eq!(cfg.backfill_mb, 20);
    }

    #[test]
    fn validate_rejects_bad_weights() {
        let mut cfg = EngineConfig::default();
        cfg.battle_navale_weight = 0.8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_window() {
        let mut cfg = EngineConfig::default();
        cfg.risk.no_trade_before = "25:00".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine_config.json");

        let mut cfg = EngineConfig::default();
        cfg.symbols = vec!["NQZ25_FUT_CME".to_string()];
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, cfg.symbols);
        assert_eq!(loaded.router.timeout_ms, cfg.router.timeout_ms);
    }

    #[test]
    fn hhmm_parsing() {
        assert_eq!(parse_hhmm("13:35").unwrap(), 13 * 60 + 35);
        assert_eq!(parse_hhmm("00:00").unwrap(), 0);
        assert!(parse_hhmm("9h30").is_err());
        assert!(parse_hhmm("24:00").is_err());
    }
}
