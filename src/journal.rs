// =============================================================================
// Trade Journal — append-only local record of orders and fills
// =============================================================================
//
// The exchange bridge is write-only for us, so the journal is the source
// of truth for known orders. One JSON object per line, single writer.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::router::{OrderRequest, RouteResult};
use crate::types::{OrderType, TimeInForce};

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub client_order_id: String,
    /// RFC 3339 timestamp of the send.
    pub sent_at: String,
    pub symbol: String,
    pub side: String,
    pub qty: u32,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bracket_stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bracket_take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
    pub response_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl JournalRecord {
    pub fn from_order(
        request: &OrderRequest,
        result: &RouteResult,
        strategy: Option<String>,
    ) -> Self {
        Self {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            sent_at: chrono::Utc::now().to_rfc3339(),
            symbol: request.symbol.clone(),
            side: request.side.as_order_side().to_string(),
            qty: request.quantity,
            order_type: request.order_type,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            bracket_stop_loss: request.bracket.as_ref().and_then(|b| b.stop_loss),
            bracket_take_profit: request.bracket.as_ref().and_then(|b| b.take_profit),
            response_status: result.response_status.clone(),
            response_order_id: result.order_id.clone(),
            strategy,
        }
    }
}

/// Append-only JSONL writer, serialised on a single writer lock.
pub struct TradeJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl TradeJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open trade journal at {}", path.display()))?;
        info!(path = %path.display(), "trade journal opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush.
    pub fn record(&self, record: &JournalRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialise journal record")?;
        let mut file = self.file.lock();
        writeln!(file, "{line}").context("failed to append to trade journal")?;
        file.flush().context("failed to flush trade journal")?;
        debug!(
            order_id = %record.response_order_id,
            symbol = %record.symbol,
            "journal record appended"
        );
        Ok(())
    }

    /// Read back all records (operator reconciliation helper).
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read journal at {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
