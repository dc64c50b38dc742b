//! Transfer history reconstruction.
//!
//! Electrum history is a list of transactions; callers want value
//! transfers. Every transaction is resolved into per-output records with
//! a direction, the total fee and a counterparty, which requires fetching
//! each input's previous transaction to learn its script and value. A
//! bounded cache keeps that fan-out to one fetch per transaction per
//! page.

use crate::electrum::ChainSource;
use crate::primitives::address::Address;
use crate::primitives::transaction::{Transaction, TxOut};
use crate::types::{Transfer, TransferDirection, TransferQuery};
use crate::Result;
use std::collections::{HashMap, VecDeque};

/// Upper bound on transactions kept around during one resolution.
const TX_CACHE_CAPACITY: usize = 256;

/// Small least-recently-used transaction cache. Purely a latency
/// optimization; eviction is never observable in the results.
struct TxCache {
    entries: HashMap<String, Transaction>,
    recency: VecDeque<String>,
    capacity: usize,
}

impl TxCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            capacity,
        }
    }

    async fn get(&mut self, chain: &dyn ChainSource, txid: &str) -> Result<Transaction> {
        if let Some(tx) = self.entries.get(txid) {
            let tx = tx.clone();
            self.touch(txid);
            return Ok(tx);
        }

        let tx = chain.transaction_get(txid).await?;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(txid.to_string(), tx.clone());
        self.recency.push_back(txid.to_string());
        Ok(tx)
    }

    fn touch(&mut self, txid: &str) {
        self.recency.retain(|key| key != txid);
        self.recency.push_back(txid.to_string());
    }
}

/// Resolve an address's Electrum history into transfer records.
///
/// The direction filter applies first; `skip` and `limit` then page
/// through the filtered record stream.
pub async fn resolve_transfers(
    chain: &dyn ChainSource,
    self_address: &Address,
    query: &TransferQuery,
) -> Result<Vec<Transfer>> {
    let entries = chain.history(self_address).await?;
    let network = self_address.network;
    let self_script = self_address.script_pubkey();
    let self_string = self_address.to_string();

    let limit = query.limit.unwrap_or(usize::MAX);
    let mut cache = TxCache::new(TX_CACHE_CAPACITY);
    let mut seen = 0usize;
    let mut records = Vec::new();

    'entries: for entry in &entries {
        if records.len() >= limit {
            break;
        }

        let tx = cache.get(chain, &entry.tx_hash).await?;
        let height = entry.height.max(0) as u32;

        // Resolve every input's previous output for scripts and values.
        let mut prev_outputs: Vec<Option<TxOut>> = Vec::with_capacity(tx.input.len());
        for input in &tx.input {
            let prev_txid = input.previous_output.txid_hex();
            match cache.get(chain, &prev_txid).await {
                Ok(prev_tx) => prev_outputs.push(
                    prev_tx
                        .output
                        .get(input.previous_output.vout as usize)
                        .cloned(),
                ),
                Err(e) => {
                    log::warn!("previous transaction {} unavailable: {}", prev_txid, e);
                    prev_outputs.push(None);
                }
            }
        }

        let fee = if prev_outputs.iter().all(Option::is_some) {
            let input_total: u64 = prev_outputs.iter().flatten().map(|out| out.value).sum();
            input_total.checked_sub(tx.total_output_value())
        } else {
            None
        };

        // A transaction is outgoing when it spends one of our outputs.
        let outgoing = prev_outputs
            .iter()
            .flatten()
            .any(|out| out.script_pubkey == self_script);

        for (vout, output) in tx.output.iter().enumerate() {
            let decoded = match Address::from_script(&output.script_pubkey, network) {
                Some(address) => address,
                None => continue,
            };
            let pays_self = decoded == *self_address;

            let (direction, counterparty) = match (outgoing, pays_self) {
                (false, true) => (TransferDirection::Incoming, Some(self_string.clone())),
                (true, false) => (TransferDirection::Outgoing, Some(decoded.to_string())),
                // Change back to ourselves is neither incoming nor
                // outgoing.
                (true, true) => continue,
                // Someone else's output on a transaction that merely pays
                // us elsewhere.
                (false, false) => continue,
            };

            if !query.direction.matches(direction) {
                continue;
            }
            seen += 1;
            if seen <= query.skip {
                continue;
            }

            records.push(Transfer {
                txid: entry.tx_hash.clone(),
                address: self_string.clone(),
                vout: vout as u32,
                height,
                value: output.value,
                direction,
                fee,
                counterparty,
            });
            if records.len() >= limit {
                break 'entries;
            }
        }
    }

    Ok(records)
}
