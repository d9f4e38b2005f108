// =============================================================================
// MenthorQ level book — option-derived price levels per symbol
// =============================================================================
//
// Levels arrive as `menthorq_level` events and are routed on their
// `level_type` prefix into three buckets:
//
//   gamma       — call_resistance*, put_support*, hvl*, gamma_wall*,
//                 gex_*, 1d_min / 1d_max
//   blind_spots — blind_spot_*
//   swing       — swing_*
//
// `_0dte`-suffixed variants additionally populate the zero-DTE view. A
// later level with the same (bucket, subgraph) overwrites the earlier one;
// lists are capped. The book goes stale when no level has arrived for more
// than twice the expected refresh interval of the current VIX regime.
// =============================================================================

use serde::{Deserialize, Serialize};

pub const MAX_GEX_LEVELS: usize = 10;
pub const MAX_BLIND_SPOTS: usize = 10;
pub const MAX_SWING_LEVELS: usize = 9;

/// One stored level: price keyed by subgraph index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoredLevel {
    pub subgraph: u32,
    pub price: f64,
}

fn upsert(levels: &mut Vec<StoredLevel>, subgraph: u32, price: f64, cap: usize) {
    if let Some(existing) = levels.iter_mut().find(|l| l.subgraph == subgraph) {
        existing.price = price;
        return;
    }
    if levels.len() >= cap {
        levels.remove(0);
    }
    levels.push(StoredLevel { subgraph, price });
}

/// Gamma-side named levels plus the GEX ladder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GammaLevels {
    pub call_resistance: Option<f64>,
    pub put_support: Option<f64>,
    pub hvl: Option<f64>,
    pub gamma_wall_0dte: Option<f64>,
    pub d1_min: Option<f64>,
    pub d1_max: Option<f64>,
    pub gex: Vec<StoredLevel>,
}

/// 0-DTE variants of the wall levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZeroDteLevels {
    pub call: Option<f64>,
    pub put: Option<f64>,
    pub gamma_wall: Option<f64>,
    pub hvl: Option<f64>,
}

/// Per-symbol book of MenthorQ levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelBook {
    pub gamma: GammaLevels,
    pub zero_dte: ZeroDteLevels,
    pub blind_spots: Vec<StoredLevel>,
    pub swing: Vec<StoredLevel>,
    /// Epoch seconds of the last applied level, None before the first.
    pub last_update: Option<f64>,
    pub stale: bool,
}

impl LevelBook {
    /// Route one level into its bucket. Unrecognised labels are ignored.
    pub fn apply(&mut self, level_type: &str, price: f64, subgraph: Option<u32>, ts: f64) {
        let label = level_type.to_ascii_lowercase();
        let is_0dte = label.ends_with("_0dte");
        let base = label.strip_suffix("_0dte").unwrap_or(&label);
        let sg = subgraph.unwrap_or(0);

        if base.starts_with("call_resistance") {
            if is_0dte {
                self.zero_dte.call = Some(price);
            } else {
                self.gamma.call_resistance = Some(price);
            }
        } else if base.starts_with("put_support") {
            if is_0dte {
                self.zero_dte.put = Some(price);
            } else {
                self.gamma.put_support = Some(price);
            }
        } else if base.starts_with("hvl") {
            if is_0dte {
                self.zero_dte.hvl = Some(price);
            } else {
                self.gamma.hvl = Some(price);
            }
        } else if base.starts_with("gamma_wall") {
            // The wall is published as a 0DTE study either way.
            self.gamma.gamma_wall_0dte = Some(price);
            self.zero_dte.gamma_wall = Some(price);
        } else if base.starts_with("gex") {
            upsert(&mut self.gamma.gex, sg, price, MAX_GEX_LEVELS);
        } else if base.starts_with("blind_spot") {
            upsert(&mut self.blind_spots, sg, price, MAX_BLIND_SPOTS);
        } else if base.starts_with("swing") {
            upsert(&mut self.swing, sg, price, MAX_SWING_LEVELS);
        } else if base == "1d_min" || base == "d1min" {
            self.gamma.d1_min = Some(price);
        } else if base == "1d_max" || base == "d1max" {
            self.gamma.d1_max = Some(price);
        } else {
            return;
        }

        self.last_update = Some(ts);
        self.stale = false;
    }

    /// True once any level has ever been applied.
    pub fn has_data(&self) -> bool {
        self.last_update.is_some()
    }

    /// Refresh the stale flag against `now`. Returns true on a fresh
    /// transition into staleness (callers warn once per transition).
    pub fn refresh_stale(&mut self, now: f64, expected_interval_secs: u64) -> bool {
        let Some(last) = self.last_update else {
            return false;
        };
        let is_stale = now - last > 2.0 * expected_interval_secs as f64;
        let transitioned = is_stale && !self.stale;
        self.stale = is_stale;
        transitioned
    }

    pub fn gex_prices(&self) -> Vec<f64> {
        self.gamma.gex.iter().map(|l| l.price).collect()
    }

    pub fn blind_spot_prices(&self) -> Vec<f64> {
        self.blind_spots.iter().map(|l| l.price).collect()
    }

    pub fn swing_prices(&self) -> Vec<f64> {
        self.swing.iter().map(|l| l.price).collect()
    }
}
