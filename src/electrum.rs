//! Electrum gateway: a line-delimited JSON-RPC client over TCP or TLS.
//!
//! One persistent connection is shared by all callers. Initialization is
//! lazy: the first RPC connects, and concurrent callers wait on the same
//! attempt. Responses are matched to callers by request id; frames with
//! an unknown id are discarded and malformed frames are logged and
//! skipped so a noisy server cannot poison the connection.

use crate::primitives::address::Address;
use crate::primitives::hash::sha256;
use crate::primitives::script::Script;
use crate::primitives::transaction::Transaction;
use crate::types::{ElectrumConfig, Protocol};
use crate::{Result, WalletError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Timeout for establishing and handshaking a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const PROTOCOL_VERSION: &str = "1.4";

/// Confirmed and mempool balance of a script, in satoshis.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    #[serde(default)]
    pub unconfirmed: i64,
}

/// One entry of `blockchain.scripthash.listunspent`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnspentRef {
    pub tx_hash: String,
    pub tx_pos: u32,
    pub value: u64,
    #[serde(default)]
    pub height: i64,
}

/// One entry of `blockchain.scripthash.get_history`, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: String,
    #[serde(default)]
    pub height: i64,
}

/// The chain operations the rest of the wallet consumes. Implemented by
/// [`ElectrumClient`] and by test doubles.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current fee rate in sat/vB, floored at 1.
    async fn estimate_fee_per_vbyte(&self) -> Result<u64>;
    async fn script_balance(&self, address: &Address) -> Result<Balance>;
    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentRef>>;
    async fn transaction_get(&self, txid: &str) -> Result<Transaction>;
    /// Broadcast a raw transaction, returning the txid reported by the
    /// server.
    async fn broadcast(&self, raw_hex: &str) -> Result<String>;
    async fn history(&self, address: &Address) -> Result<Vec<HistoryEntry>>;
}

/// The Electrum addressing primitive: `reverse(SHA-256(script))` hex.
pub fn electrum_script_hash(script: &Script) -> String {
    let mut digest = sha256(script.as_bytes());
    digest.reverse();
    hex::encode(digest)
}

/// Convert an estimatefee answer (BTC per kB) to sat/vB, floored at 1.
/// Servers answer -1 when they have no estimate.
fn fee_rate_sat_per_vbyte(btc_per_kb: f64) -> u64 {
    if btc_per_kb <= 0.0 {
        return 1;
    }
    ((btc_per_kb * 100_000.0).round() as u64).max(1)
}

trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// One live socket with its reader/writer tasks.
struct Connection {
    writer_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader_handle: JoinHandle<()>,
}

impl Connection {
    async fn open(config: &ElectrumConfig) -> Result<Arc<Self>> {
        let endpoint = format!("{}:{}", config.host, config.port);
        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| WalletError::ConnectTimeout)?
            .map_err(|e| WalletError::Network(format!("connect to {}: {}", endpoint, e)))?;

        let stream: Box<dyn RawStream> = match config.protocol {
            Protocol::Tcp => Box::new(tcp),
            Protocol::Tls => {
                let connector = native_tls::TlsConnector::new()
                    .map_err(|e| WalletError::Network(format!("TLS setup: {}", e)))?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let tls = timeout(CONNECT_TIMEOUT, connector.connect(&config.host, tcp))
                    .await
                    .map_err(|_| WalletError::ConnectTimeout)?
                    .map_err(|e| WalletError::Network(format!("TLS handshake: {}", e)))?;
                Box::new(tls)
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (writer_tx, writer_rx) = mpsc::channel::<String>(32);

        let reader_handle = spawn_reader(read_half, pending.clone(), alive.clone());
        spawn_writer(write_half, writer_rx, alive.clone());

        let conn = Arc::new(Connection {
            writer_tx,
            pending,
            next_id: AtomicU64::new(0),
            alive,
            reader_handle,
        });

        // Handshake before the connection is handed out.
        conn.call(
            "server.version",
            json!([concat!("tapwallet ", env!("CARGO_PKG_VERSION")), PROTOCOL_VERSION]),
            CONNECT_TIMEOUT,
        )
        .await?;

        spawn_keepalive(Arc::downgrade(&conn), config.persistence.ping_period_ms);

        Ok(conn)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn call(&self, method: &str, params: Value, timeout_duration: Duration) -> Result<Value> {
        if !self.is_alive() {
            return Err(WalletError::Network("connection closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, response_tx);

        if self.writer_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(WalletError::Network("connection task has died".to_string()));
        }

        match timeout(timeout_duration, response_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WalletError::Network(
                "connection dropped the response".to_string(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(WalletError::RequestTimeout)
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

fn spawn_reader(
    read_half: tokio::io::ReadHalf<Box<dyn RawStream>>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let value: Value = match serde_json::from_str(&line) {
                        Ok(value) => value,
                        Err(_) => {
                            log::warn!("discarding malformed frame: {}", line);
                            continue;
                        }
                    };

                    let id = match value.get("id").and_then(Value::as_u64) {
                        Some(id) => id,
                        None => {
                            log::debug!("discarding frame without request id");
                            continue;
                        }
                    };

                    let sender = pending.lock().await.remove(&id);
                    match sender {
                        Some(sender) => {
                            let outcome = if let Some(error) = value.get("error") {
                                let message = error
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                                    .unwrap_or_else(|| error.to_string());
                                Err(WalletError::Rpc(message))
                            } else {
                                Ok(value.get("result").cloned().unwrap_or(Value::Null))
                            };
                            let _ = sender.send(outcome);
                        }
                        None => log::debug!("discarding response for unknown id {}", id),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("electrum socket read failed: {}", e);
                    break;
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        let mut pending = pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(WalletError::Network(
                "connection closed".to_string(),
            )));
        }
    })
}

fn spawn_writer(
    mut write_half: tokio::io::WriteHalf<Box<dyn RawStream>>,
    mut writer_rx: mpsc::Receiver<String>,
    alive: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(mut frame) = writer_rx.recv().await {
            frame.push('\n');
            if write_half.write_all(frame.as_bytes()).await.is_err()
                || write_half.flush().await.is_err()
            {
                alive.store(false, Ordering::SeqCst);
                break;
            }
        }
    });
}

fn spawn_keepalive(conn: std::sync::Weak<Connection>, period_ms: u64) {
    tokio::spawn(async move {
        let period = Duration::from_millis(period_ms.max(1));
        loop {
            sleep(period).await;
            match conn.upgrade() {
                Some(conn) if conn.is_alive() => {
                    if let Err(e) = conn.call("server.ping", json!([]), CONNECT_TIMEOUT).await {
                        log::debug!("keepalive ping failed: {}", e);
                    }
                }
                _ => break,
            }
        }
    });
}

/// Electrum-backed [`ChainSource`] with lazy initialization and
/// transparent reconnection.
pub struct ElectrumClient {
    config: ElectrumConfig,
    conn: Mutex<Option<Arc<Connection>>>,
}

impl ElectrumClient {
    /// Create a client. No I/O happens until the first RPC.
    pub fn new(config: ElectrumConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ElectrumConfig {
        &self.config
    }

    /// Drop the current connection, if any.
    pub async fn close(&self) {
        *self.conn.lock().await = None;
    }

    /// Get a live connection, opening one if needed. Holding the lock
    /// across the attempt means at most one initialization runs and
    /// concurrent callers share its outcome.
    async fn ensure_ready(&self) -> Result<Arc<Connection>> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            if conn.is_alive() {
                return Ok(conn.clone());
            }
            log::info!("electrum connection lost, reconnecting");
            *guard = None;
        }

        let attempts = self.config.persistence.max_retry.max(1);
        let mut last_error = WalletError::ConnectTimeout;
        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(Duration::from_millis(self.config.persistence.retry_period_ms)).await;
            }
            match Connection::open(&self.config).await {
                Ok(conn) => {
                    *guard = Some(conn.clone());
                    return Ok(conn);
                }
                Err(e) => {
                    log::warn!(
                        "electrum connect attempt {}/{} failed: {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let conn = self.ensure_ready().await?;
        conn.call(
            method,
            params,
            Duration::from_millis(self.config.request_timeout_ms),
        )
        .await
    }

    fn parse<T: for<'de> Deserialize<'de>>(method: &str, value: Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| WalletError::Rpc(format!("{} answered unexpectedly: {}", method, e)))
    }
}

#[async_trait]
impl ChainSource for ElectrumClient {
    async fn estimate_fee_per_vbyte(&self) -> Result<u64> {
        let value = self.rpc("blockchain.estimatefee", json!([1])).await?;
        let btc_per_kb = value.as_f64().ok_or_else(|| {
            WalletError::Rpc("estimatefee answered with a non-number".to_string())
        })?;
        Ok(fee_rate_sat_per_vbyte(btc_per_kb))
    }

    async fn script_balance(&self, address: &Address) -> Result<Balance> {
        let script_hash = electrum_script_hash(&address.script_pubkey());
        let value = self
            .rpc("blockchain.scripthash.get_balance", json!([script_hash]))
            .await?;
        Self::parse("get_balance", value)
    }

    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentRef>> {
        let script_hash = electrum_script_hash(&address.script_pubkey());
        let value = self
            .rpc("blockchain.scripthash.listunspent", json!([script_hash]))
            .await?;
        Self::parse("listunspent", value)
    }

    async fn transaction_get(&self, txid: &str) -> Result<Transaction> {
        let value = self
            .rpc("blockchain.transaction.get", json!([txid]))
            .await?;
        let raw_hex = value
            .as_str()
            .ok_or_else(|| WalletError::Rpc("transaction.get answered with a non-string".to_string()))?;
        Transaction::decode(&hex::decode(raw_hex)?)
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String> {
        let value = self
            .rpc("blockchain.transaction.broadcast", json!([raw_hex]))
            .await?;
        let txid = value.as_str().ok_or_else(|| {
            WalletError::Rpc("broadcast answered with a non-string".to_string())
        })?;
        Ok(txid.to_string())
    }

    async fn history(&self, address: &Address) -> Result<Vec<HistoryEntry>> {
        let script_hash = electrum_script_hash(&address.script_pubkey());
        let value = self
            .rpc("blockchain.scripthash.get_history", json!([script_hash]))
            .await?;
        Self::parse("get_history", value)
    }
}
