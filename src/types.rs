//! Configuration and public data types.

use crate::primitives::address::Network;
use serde::{Deserialize, Serialize};

/// Transport protocol used to reach the Electrum server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Tls,
}

/// Reconnection and keepalive knobs for the Electrum connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Delay between reconnection attempts, in milliseconds.
    pub retry_period_ms: u64,
    /// Maximum number of connection attempts per initialization.
    pub max_retry: u32,
    /// Keepalive ping period, in milliseconds.
    pub ping_period_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_period_ms: 1_000,
            max_retry: 2,
            ping_period_ms: 120_000,
        }
    }
}

/// Configuration for an Electrum-backed account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectrumConfig {
    pub host: String,
    pub port: u16,
    pub network: Network,
    pub protocol: Protocol,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Per-RPC timeout, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ElectrumConfig {
    fn default() -> Self {
        Self {
            host: "electrum.blockstream.info".to_string(),
            port: 50001,
            network: Network::Mainnet,
            protocol: Protocol::Tcp,
            persistence: PersistenceConfig::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Direction of a value transfer relative to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

/// Direction filter for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionFilter {
    #[default]
    All,
    Incoming,
    Outgoing,
}

impl DirectionFilter {
    pub fn matches(&self, direction: TransferDirection) -> bool {
        match self {
            DirectionFilter::All => true,
            DirectionFilter::Incoming => direction == TransferDirection::Incoming,
            DirectionFilter::Outgoing => direction == TransferDirection::Outgoing,
        }
    }
}

/// Options for a history query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferQuery {
    #[serde(default)]
    pub direction: DirectionFilter,
    /// Maximum number of records to return. `None` means no limit.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Number of leading records to drop, after direction filtering.
    #[serde(default)]
    pub skip: usize,
}

/// One value transfer: a single output of a single transaction, seen from
/// this account's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub txid: String,
    /// This account's address.
    pub address: String,
    /// Index of the output within the transaction.
    pub vout: u32,
    /// Confirmation height, 0 while unconfirmed.
    pub height: u32,
    /// Output value in satoshis.
    pub value: u64,
    pub direction: TransferDirection,
    /// Total transaction fee, when every previous output resolved.
    pub fee: Option<u64>,
    /// The other side of the transfer. For incoming records this is the
    /// account's own address (the output pays the wallet).
    pub counterparty: Option<String>,
}

/// Result of quoting a payment without broadcasting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendQuote {
    pub txid: String,
    pub fee: u64,
    pub vsize: u64,
}

/// Result of a broadcast payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub txid: String,
    pub fee: u64,
}
