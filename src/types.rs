// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of a pattern signal or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The order side string sent to the exchange bridge.
    pub fn as_order_side(self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Coarse pattern class used for signal deduplication: at most one signal
/// per family survives a selector tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalFamily {
    Breakout,
    Reversal,
    MeanRevert,
    Continuation,
    Trap,
    Follow,
    RangeRotation,
    Correlation,
    Other,
}

impl std::fmt::Display for SignalFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Breakout => "BREAKOUT",
            Self::Reversal => "REVERSAL",
            Self::MeanRevert => "MEAN_REVERT",
            Self::Continuation => "CONTINUATION",
            Self::Trap => "TRAP",
            Self::Follow => "FOLLOW",
            Self::RangeRotation => "RANGE_ROTATION",
            Self::Correlation => "CORRELATION",
            Self::Other => "OTHER",
        };
        write!(f, "{s}")
    }
}

/// Final verdict of a selector tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionName {
    GoLong,
    GoShort,
    NoTrade,
    Neutral,
}

impl std::fmt::Display for DecisionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GoLong => "GO_LONG",
            Self::GoShort => "GO_SHORT",
            Self::NoTrade => "NO_TRADE",
            Self::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

/// VIX volatility regime. Boundaries are closed on the right for MID:
/// `last < 15` is Low, `15 <= last < 25` is Mid, `last >= 25` is High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VixRegime {
    Low,
    Mid,
    High,
}

impl VixRegime {
    pub fn classify(last: f64, low_max: f64, mid_max: f64) -> Self {
        if last < low_max {
            Self::Low
        } else if last < mid_max {
            Self::Mid
        } else {
            Self::High
        }
    }

    /// Position-size multiplier applied by the risk gate.
    pub fn size_multiplier(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Mid => 0.75,
            Self::High => 0.5,
        }
    }
}

impl std::fmt::Display for VixRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Mid => write!(f, "MID"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Whether orders for a symbol go to the live bridge or are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Live,
    Paper,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paper => write!(f, "Paper"),
        }
    }
}

/// Order type accepted by the exchange bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "LMT")]
    Limit,
    #[serde(rename = "STP")]
    Stop,
    #[serde(rename = "STP_LMT")]
    StopLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MKT"),
            Self::Limit => write!(f, "LMT"),
            Self::Stop => write!(f, "STP"),
            Self::StopLimit => write!(f, "STP_LMT"),
        }
    }
}

/// Time-in-force accepted by the exchange bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "DAY")]
    Day,
    #[serde(rename = "GTC")]
    Gtc,
    #[serde(rename = "IOC")]
    Ioc,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day => write!(f, "DAY"),
            Self::Gtc => write!(f, "GTC"),
            Self::Ioc => write!(f, "IOC"),
        }
    }
}

/// Tick size by symbol family: 0.25 for ES-family contracts, 0.5 for
/// NQ-family. Contract-coded names (`ESU25_FUT_CME`) resolve through the
/// same contains-rule.
pub fn tick_size_for(symbol: &str) -> f64 {
    if symbol.to_uppercase().contains("NQ") {
        0.5
    } else {
        0.25
    }
}

/// Currency value of one tick, used for per-trade risk computation.
pub fn tick_value_for(symbol: &str) -> f64 {
    if symbol.to_uppercase().contains("NQ") {
        5.0
    } else {
        12.5
    }
}
