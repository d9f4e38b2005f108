// =============================================================================
// Order Router — per-symbol TCP connections to the exchange bridge
// =============================================================================
//
// One persistent connection per symbol, opened lazily on the first order.
// Messages are single JSON objects terminated by a newline; the bridge's
// response (optional) is one JSON line parsed permissively. Every connect,
// send and read carries a hard timeout.
//
// When the bridge is unreachable or misbehaves the symbol drops into paper
// mode: the would-be order is logged with the identical on-wire summary
// and a synthetic `PAPER_<epoch>` id is returned. With paper mode disabled
// in config, the same failure is surfaced to the caller instead.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::types::{OrderType, Side, TimeInForce};

// =============================================================================
// Requests and wire format
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Bracket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: u32,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub bracket: Option<Bracket>,
}

/// On-wire PLACE_ORDER message.
#[derive(Debug, Serialize)]
struct PlaceOrderMsg<'a> {
    action: &'static str,
    symbol: &'a str,
    side: &'a str,
    quantity: u32,
    order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<f64>,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bracket: Option<&'a Bracket>,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct CancelOrderMsg<'a> {
    action: &'static str,
    order_id: &'a str,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct HeartbeatMsg {
    action: &'static str,
    timestamp: u64,
}

fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn wire_place_order(req: &OrderRequest, timestamp: u64) -> String {
    let msg = PlaceOrderMsg {
        action: "PLACE_ORDER",
        symbol: &req.symbol,
        side: req.side.as_order_side(),
        quantity: req.quantity,
        order_type: req.order_type.to_string(),
        limit_price: req.limit_price,
        stop_price: req.stop_price,
        time_in_force: req.time_in_force.to_string(),
        bracket: req.bracket.as_ref(),
        timestamp,
    };
    // Serialisation of a plain struct with no maps cannot fail.
    serde_json::to_string(&msg).unwrap_or_default()
}

// =============================================================================
// Route result
// =============================================================================

/// Outcome of a successful routing attempt (live or paper).
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub order_id: String,
    pub paper: bool,
    pub response_status: Option<String>,
}

// =============================================================================
// Router
// =============================================================================

struct Connection {
    stream: Option<BufReader<TcpStream>>,
    paper_mode: bool,
}

pub struct OrderRouter {
    config: RouterConfig,
    conns: RwLock<HashMap<String, Arc<Mutex<Connection>>>>,
    order_counter: AtomicU64,
}

impl OrderRouter {
    pub fn new(config: RouterConfig) -> Self {
        info!(
            host = %config.host,
            es_port = config.es_port,
            nq_port = config.nq_port,
            allow_paper = config.allow_paper,
            "order router initialised"
        );
        Self {
            config,
            conns: RwLock::new(HashMap::new()),
            order_counter: AtomicU64::new(1),
        }
    }

    /// Bridge port for a symbol family.
    pub fn port_for(&self, symbol: &str) -> u16 {
        if symbol.to_uppercase().contains("NQ") {
            self.config.nq_port
        } else {
            self.config.es_port
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn conn_handle(&self, symbol: &str) -> Arc<Mutex<Connection>> {
        if let Some(c) = self.conns.read().get(symbol) {
            return c.clone();
        }
        let mut map = self.conns.write();
        map.entry(symbol.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Connection {
                    stream: None,
                    paper_mode: false,
                }))
            })
            .clone()
    }

    /// Whether the symbol currently has a live bridge connection.
    pub async fn is_connected(&self, symbol: &str) -> bool {
        let handle = self.conn_handle(symbol);
        let conn = handle.lock().await;
        conn.stream.is_some() && !conn.paper_mode
    }

    /// Route an order. Never blocks longer than the configured timeouts;
    /// falls back to paper mode per symbol unless paper is disabled, in
    /// which case the transport error is returned (exit-code-3 path).
    pub async fn place_order(&self, req: &OrderRequest) -> Result<RouteResult> {
        let timestamp = now_epoch();
        let line = wire_place_order(req, timestamp);
        let handle = self.conn_handle(&req.symbol);
        let mut conn = handle.lock().await;

        if conn.paper_mode {
            return Ok(self.paper_fill(req, &line, timestamp));
        }

        match self.send_line(&mut conn, &req.symbol, &line).await {
            Ok(response) => {
                let (order_id, status) = parse_order_response(response.as_deref());
                let order_id = order_id.unwrap_or_else(|| self.synthetic_id(timestamp));
                info!(
                    symbol = %req.symbol,
                    order_id = %order_id,
                    status = status.as_deref().unwrap_or("none"),
                    wire = %line,
                    "order placed"
                );
                Ok(RouteResult {
                    order_id,
                    paper: false,
                    response_status: status,
                })
            }
            Err(e) => {
                if !self.config.allow_paper {
                    return Err(e.context("bridge unreachable and paper mode disabled"));
                }
                warn!(
                    symbol = %req.symbol,
                    error = %e,
                    "bridge transport failure — entering paper mode for symbol"
                );
                conn.stream = None;
                conn.paper_mode = true;
                Ok(self.paper_fill(req, &line, timestamp))
            }
        }
    }

    /// Cancel a previously placed order.
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let msg = CancelOrderMsg {
            action: "CANCEL_ORDER",
            order_id,
            timestamp: now_epoch(),
        };
        let line = serde_json::to_string(&msg).unwrap_or_default();
        let handle = self.conn_handle(symbol);
        let mut conn = handle.lock().await;
        if conn.paper_mode {
            info!(symbol, order_id, wire = %line, "paper cancel");
            return Ok(());
        }
        self.send_line(&mut conn, symbol, &line).await.map(|_| ())
    }

    /// Send one heartbeat per established connection; a failure drops the
    /// connection so the next order triggers a reconnect.
    pub async fn heartbeat_all(&self) {
        let symbols: Vec<String> = self.conns.read().keys().cloned().collect();
        for symbol in symbols {
            let handle = self.conn_handle(&symbol);
            let mut conn = handle.lock().await;
            if conn.stream.is_none() || conn.paper_mode {
                continue;
            }
            let msg = HeartbeatMsg {
                action: "HEARTBEAT",
                timestamp: now_epoch(),
            };
            let line = serde_json::to_string(&msg).unwrap_or_default();
            if let Err(e) = self.write_only(&mut conn, &line).await {
                warn!(symbol = %symbol, error = %e, "heartbeat failed — dropping connection");
                conn.stream = None;
            } else {
                debug!(symbol = %symbol, "heartbeat sent");
            }
        }
    }

    /// Re-enable live routing for a symbol (e.g. after an operator reset).
    pub async fn reset_paper_mode(&self, symbol: &str) {
        let handle = self.conn_handle(symbol);
        let mut conn = handle.lock().await;
        conn.paper_mode = false;
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn synthetic_id(&self, timestamp: u64) -> String {
        let n = self.order_counter.fetch_add(1, Ordering::Relaxed);
        format!("SC_{n}_{timestamp}")
    }

    fn paper_fill(&self, req: &OrderRequest, wire: &str, timestamp: u64) -> RouteResult {
        let order_id = format!("PAPER_{timestamp}");
        info!(
            symbol = %req.symbol,
            order_id = %order_id,
            wire = %wire,
            "paper order (identical on-wire summary)"
        );
        RouteResult {
            order_id,
            paper: true,
            response_status: Some("PAPER".to_string()),
        }
    }

    async fn ensure_connected(&self, conn: &mut Connection, symbol: &str) -> Result<()> {
        if conn.stream.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.config.host, self.port_for(symbol));
        let stream = tokio::time::timeout(self.timeout(), TcpStream::connect(&addr))
            .await
            .with_context(|| format!("connect to {addr} timed out"))?
            .with_context(|| format!("connect to {addr} failed"))?;
        info!(symbol, addr = %addr, "bridge connection established");
        conn.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn write_only(&self, conn: &mut Connection, line: &str) -> Result<()> {
        let stream = conn.stream.as_mut().context("not connected")?;
        let payload = format!("{line}\n");
        tokio::time::timeout(self.timeout(), stream.get_mut().write_all(payload.as_bytes()))
            .await
            .context("send timed out")?
            .context("send failed")?;
        Ok(())
    }

    /// Send a line and wait briefly for an optional single-line response.
    /// A silent bridge is not an error; a closed or unparseable one is.
    async fn send_line(
        &self,
        conn: &mut Connection,
        symbol: &str,
        line: &str,
    ) -> Result<Option<String>> {
        self.ensure_connected(conn, symbol).await?;
        if let Err(e) = self.write_only(conn, line).await {
            conn.stream = None;
            return Err(e);
        }

        let stream = conn.stream.as_mut().context("not connected")?;
        let mut response = String::new();
        match tokio::time::timeout(self.timeout(), stream.read_line(&mut response)).await {
            Err(_elapsed) => Ok(None), // write-only bridge; no response
            Ok(Ok(0)) => {
                conn.stream = None;
                anyhow::bail!("bridge closed the connection");
            }
            Ok(Ok(_)) => {
                // Permissive parse: any JSON object is acceptable.
                if serde_json::from_str::<serde_json::Value>(response.trim()).is_err() {
                    conn.stream = None;
                    anyhow::bail!("unparseable bridge response: {response:?}");
                }
                Ok(Some(response))
            }
            Ok(Err(e)) => {
                conn.stream = None;
                Err(anyhow::Error::from(e).context("response read failed"))
            }
        }
    }
}

/// Extract (order_id, status) from an optional response line.
fn parse_order_response(response: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(text) = response else {
        return (None, None);
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) else {
        return (None, None);
    };
    let order_id = value
        .get("order_id")
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    let status = value
        .get("status")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    (order_id, status)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn request(symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            side: Side::Long,
            quantity: 1,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            bracket: Some(Bracket {
                stop_loss: Some(6498.0),
                take_profit: Some(6506.0),
            }),
        }
    }

    fn config(es_port: u16, nq_port: u16) -> RouterConfig {
        RouterConfig {
            host: "127.0.0.1".to_string(),
            es_port,
            nq_port,
            timeout_ms: 500,
            heartbeat_interval_sec: 30,
            allow_paper: true,
        }
    }

    #[test]
    fn ports_by_symbol_family() {
        let r = OrderRouter::new(config(11099, 11100));
        assert_eq!(r.port_for("ESU25_FUT_CME"), 11099);
        assert_eq!(r.port_for("NQU25_FUT_CME"), 11100);
        assert_eq!(r.port_for("ES"), 11099);
    }

    #[test]
    fn wire_format_matches_the_contract() {
        let req = request("ESU25_FUT_CME");
        let line = wire_place_order(&req, 1_757_356_200);
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["action"], "PLACE_ORDER");
        assert_eq!(v["symbol"], "ESU25_FUT_CME");
        assert_eq!(v["side"], "BUY");
        assert_eq!(v["quantity"], 1);
        assert_eq!(v["order_type"], "MKT");
        assert_eq!(v["time_in_force"], "DAY");
        assert_eq!(v["bracket"]["stop_loss"], 6498.0);
        assert_eq!(v["bracket"]["take_profit"], 6506.0);
        assert_eq!(v["timestamp"], 1_757_356_200);
        assert!(v.get("limit_price").is_none());
        // One line, no embedded newlines.
        assert!(!line.contains('\n'));
    }

    #[test]
    fn response_parsing_is_permissive() {
        assert_eq!(parse_order_response(None), (None, None));
        let (id, status) =
            parse_order_response(Some(r#"{"order_id":"X1","status":"FILLED"}"#));
        assert_eq!(id.as_deref(), Some("X1"));
        assert_eq!(status.as_deref(), Some("FILLED"));
        let (id, status) = parse_order_response(Some(r#"{"something":"else"}"#));
        assert!(id.is_none() && status.is_none());
        let (id, _) = parse_order_response(Some(r#"{"order_id":42}"#));
        assert_eq!(id.as_deref(), Some("42"));
    }

    /// S5: an unreachable bridge yields a `PAPER_<epoch>` id and the
    /// symbol stays in paper mode for subsequent orders.
    #[tokio::test]
    async fn falls_back_to_paper_when_bridge_unreachable() {
        // Nothing listens on these ports.
        let router = OrderRouter::new(config(1, 2));
        let result = router.place_order(&request("ESU25_FUT_CME")).await.unwrap();
        assert!(result.paper);
        assert!(result.order_id.starts_with("PAPER_"));
        assert!(result.order_id[6..].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(result.response_status.as_deref(), Some("PAPER"));

        // Second order short-circuits straight to paper.
        let again = router.place_order(&request("ESU25_FUT_CME")).await.unwrap();
        assert!(again.paper);
        assert!(!router.is_connected("ESU25_FUT_CME").await);
    }

    #[tokio::test]
    async fn paper_disabled_surfaces_the_error() {
        let mut cfg = config(1, 2);
        cfg.allow_paper = false;
        let router = OrderRouter::new(cfg);
        assert!(router.place_order(&request("ESU25_FUT_CME")).await.is_err());
    }

    #[tokio::test]
    async fn live_roundtrip_uses_bridge_order_id() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let line = String::from_utf8_lossy(&buf[..n]).to_string();
            sock.write_all(b"{\"order_id\":\"SC_77\",\"status\":\"ACCEPTED\"}\n")
                .await
                .unwrap();
            line
        });

        let router = OrderRouter::new(config(port, port));
        let result = router.place_order(&request("ESU25_FUT_CME")).await.unwrap();
        assert!(!result.paper);
        assert_eq!(result.order_id, "SC_77");
        assert_eq!(result.response_status.as_deref(), Some("ACCEPTED"));
        assert!(router.is_connected("ESU25_FUT_CME").await);

        let received = server.await.unwrap();
        let v: serde_json::Value = serde_json::from_str(received.trim()).unwrap();
        assert_eq!(v["action"], "PLACE_ORDER");
        assert_eq!(v["side"], "BUY");
    }

    #[tokio::test]
    async fn silent_bridge_gets_a_synthetic_id() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept and read but never respond.
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let router = OrderRouter::new(config(port, port));
        let result = router.place_order(&request("ESU25_FUT_CME")).await.unwrap();
        assert!(!result.paper);
        assert!(result.order_id.starts_with("SC_"));
        assert!(result.response_status.is_none());
    }

    #[tokio::test]
    async fn cancel_serialises_the_contract() {
        let router = OrderRouter::new(config(1, 2));
        // Push the symbol into paper mode first.
        let _ = router.place_order(&request("ESU25_FUT_CME")).await.unwrap();
        // Paper cancel succeeds without a connection.
        router
            .cancel_order("ESU25_FUT_CME", "PAPER_123")
            .await
            .unwrap();
    }
}
