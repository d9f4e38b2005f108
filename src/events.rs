// =============================================================================
// Unified event stream model
// =============================================================================
//
// Each line of the unified JSONL file is one tagged record
// `{ts, sym, chart, type, ...}`. Payloads are modelled as one struct per
// variant; unknown `type` values parse to `FeedEvent::Other` and are counted
// by the dispatcher rather than dropped silently.
//
// Timestamps arrive either as ISO-8601 strings or as spreadsheet serial
// days (days since 1899-12-30); epoch milliseconds and epoch seconds are
// also seen in older captures. `RawTs::to_epoch_secs` normalises all four.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Days between 1899-12-30 (spreadsheet epoch) and 1970-01-01.
const SERIAL_EPOCH_OFFSET_DAYS: f64 = 25_569.0;

/// A timestamp as it appears on the wire, before normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTs {
    Number(f64),
    Text(String),
}

impl RawTs {
    /// Normalise to seconds since the Unix epoch.
    ///
    /// Heuristics (matching the upstream writer):
    ///   * numeric in (20_000, 90_000) — spreadsheet serial days
    ///   * numeric above 1e11          — epoch milliseconds
    ///   * any other numeric           — epoch seconds
    ///   * string                      — RFC 3339 / ISO-8601
    pub fn to_epoch_secs(&self) -> Result<f64> {
        match self {
            Self::Number(t) => Ok(normalize_numeric_ts(*t)),
            Self::Text(s) => {
                let dt = chrono::DateTime::parse_from_rfc3339(s)
                    .with_context(|| format!("unparseable timestamp {s:?}"))?;
                Ok(dt.timestamp_millis() as f64 / 1_000.0)
            }
        }
    }
}

pub fn normalize_numeric_ts(t: f64) -> f64 {
    if t > 20_000.0 && t < 90_000.0 {
        (t - SERIAL_EPOCH_OFFSET_DAYS) * 86_400.0
    } else if t > 1e11 {
        t / 1_000.0
    } else {
        t
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// OHLCV bar. `chart = 3` is a 1-minute bar, `chart = 4` a 30-minute bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseDataEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub bid_volume: f64,
    #[serde(default)]
    pub ask_volume: f64,
}

/// VWAP and its standard-deviation bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VwapEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    /// The VWAP itself.
    pub v: f64,
    #[serde(default)]
    pub up1: Option<f64>,
    #[serde(default)]
    pub dn1: Option<f64>,
    #[serde(default)]
    pub up2: Option<f64>,
    #[serde(default)]
    pub dn2: Option<f64>,
}

/// Volume value-area analytics (VPOC / VAH / VAL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VvaEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    pub vpoc: f64,
    pub vah: f64,
    pub val: f64,
    #[serde(default)]
    pub pval: Option<f64>,
    #[serde(default)]
    pub id_curr: Option<i64>,
}

/// Footprint delta / cumulative delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbcvEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    pub delta: f64,
    #[serde(default)]
    pub cumulative_delta: Option<f64>,
    #[serde(default)]
    pub trades_count: Option<u64>,
}

/// Top-of-book quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    pub bid: f64,
    pub ask: f64,
}

/// A single print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    pub price: f64,
    pub qty: f64,
}

/// Depth-of-market ladder (quantities + prices, top level first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    #[serde(default)]
    pub dom_bids: Vec<f64>,
    #[serde(default)]
    pub dom_asks: Vec<f64>,
    #[serde(default)]
    pub dom_bid_prices: Vec<f64>,
    #[serde(default)]
    pub dom_ask_prices: Vec<f64>,
}

/// Volatility index print (chart 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VixEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    #[serde(alias = "v", alias = "value")]
    pub last: f64,
}

/// Option-derived level (chart 10). `level_type` is a label such as
/// `call_resistance`, `put_support_0dte`, `gex_3`, `blind_spot_2`,
/// `swing_1`; `subgraph` disambiguates repeated labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenthorqLevelEvent {
    #[serde(alias = "t")]
    pub ts: RawTs,
    pub sym: String,
    pub chart: u8,
    pub level_type: String,
    pub price: f64,
    #[serde(default)]
    pub subgraph: Option<u32>,
}

// =============================================================================
// FeedEvent
// =============================================================================

/// One record of the unified stream, dispatched on its `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedEvent {
    #[serde(rename = "basedata")]
    BaseData(BaseDataEvent),
    #[serde(rename = "vwap")]
    Vwap(VwapEvent),
    #[serde(rename = "vva")]
    Vva(VvaEvent),
    #[serde(rename = "nbcv_footprint")]
    Nbcv(NbcvEvent),
    #[serde(rename = "quote")]
    Quote(QuoteEvent),
    #[serde(rename = "trade")]
    Trade(TradeEvent),
    #[serde(rename = "depth")]
    Depth(DepthEvent),
    #[serde(rename = "vix")]
    Vix(VixEvent),
    #[serde(rename = "menthorq_level")]
    MenthorqLevel(MenthorqLevelEvent),
    /// Any other `type` value; retained only for counting.
    #[serde(other)]
    Other,
}

impl FeedEvent {
    /// Parse a single JSONL line.
    pub fn parse_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).with_context(|| "malformed event line")
    }

    /// Symbol the event pertains to, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::BaseData(e) => Some(&e.sym),
            Self::Vwap(e) => Some(&e.sym),
            Self::Vva(e) => Some(&e.sym),
            Self::Nbcv(e) => Some(&e.sym),
            Self::Quote(e) => Some(&e.sym),
            Self::Trade(e) => Some(&e.sym),
            Self::Depth(e) => Some(&e.sym),
            Self::Vix(e) => Some(&e.sym),
            Self::MenthorqLevel(e) => Some(&e.sym),
            Self::Other => None,
        }
    }

    /// Normalised event timestamp in epoch seconds, if present and valid.
    pub fn epoch_secs(&self) -> Option<f64> {
        let raw = match self {
            Self::BaseData(e) => &e.ts,
            Self::Vwap(e) => &e.ts,
            Self::Vva(e) => &e.ts,
            Self::Nbcv(e) => &e.ts,
            Self::Quote(e) => &e.ts,
            Self::Trade(e) => &e.ts,
            Self::Depth(e) => &e.ts,
            Self::Vix(e) => &e.ts,
            Self::MenthorqLevel(e) => &e.ts,
            Self::Other => return None,
        };
        raw.to_epoch_secs().ok()
    }
}
