// =============================================================================
// Session Manager — maps timestamps to session phases and trading windows
// =============================================================================

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{parse_hhmm, RiskConfig};

/// Trading-day phase, derived from the UTC clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Overnight Globex / Asian hours.
    Overnight,
    /// European cash hours, 07:00-14:30 UTC.
    London,
    /// New York cash open, 14:30-17:00 UTC.
    NyMorning,
    /// New York afternoon into the close, 17:00-21:00 UTC.
    NyAfternoon,
}

impl SessionPhase {
    /// Position-size multiplier for the phase.
    pub fn size_multiplier(self) -> f64 {
        match self {
            Self::NyMorning => 1.2,
            Self::NyAfternoon => 1.0,
            Self::London => 0.8,
            Self::Overnight => 0.3,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Overnight => "OVERNIGHT",
            Self::London => "LONDON",
            Self::NyMorning => "NY_MORNING",
            Self::NyAfternoon => "NY_AFTERNOON",
        };
        write!(f, "{s}")
    }
}

/// Stateless classifier over epoch timestamps.
pub struct SessionManager {
    no_trade_before_min: u32,
    no_trade_after_min: u32,
}

impl SessionManager {
    pub fn from_risk_config(risk: &RiskConfig) -> Self {
        // Config was validated at startup; fall back to an always-open
        // window rather than panic if it was mutated since.
        Self {
            no_trade_before_min: parse_hhmm(&risk.no_trade_before).unwrap_or(0),
            no_trade_after_min: parse_hhmm(&risk.no_trade_after).unwrap_or(24 * 60 - 1),
        }
    }

    fn utc(epoch_secs: f64) -> DateTime<Utc> {
        DateTime::from_timestamp(epoch_secs as i64, 0).unwrap_or_else(Utc::now)
    }

    pub fn phase(&self, epoch_secs: f64) -> SessionPhase {
        let t = Self::utc(epoch_secs);
        let minutes = t.hour() * 60 + t.minute();
        match minutes {
            m if (7 * 60..14 * 60 + 30).contains(&m) => SessionPhase::London,
            m if (14 * 60 + 30..17 * 60).contains(&m) => SessionPhase::NyMorning,
            m if (17 * 60..21 * 60).contains(&m) => SessionPhase::NyAfternoon,
            _ => SessionPhase::Overnight,
        }
    }

    /// True when entries are allowed at this time per the configured
    /// `[no_trade_before, no_trade_after]` window.
    pub fn in_trading_window(&self, epoch_secs: f64) -> bool {
        let t = Self::utc(epoch_secs);
        let minutes = t.hour() * 60 + t.minute();
        minutes >= self.no_trade_before_min && minutes <= self.no_trade_after_min
    }

    /// True during the first half hour of the NY session (used by the
    /// opening-drive strategy).
    pub fn is_opening_window(&self, epoch_secs: f64) -> bool {
        let t = Self::utc(epoch_secs);
        let minutes = t.hour() * 60 + t.minute();
        (14 * 60 + 30..15 * 60).contains(&minutes)
    }

    pub fn size_multiplier(&self, epoch_secs: f64) -> f64 {
        self.phase(epoch_secs).size_multiplier()
    }
}
