//! Shared test fixtures: a scripted chain backend and transaction
//! helpers.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tapwallet::electrum::{Balance, ChainSource, HistoryEntry, UnspentRef};
use tapwallet::keys::KeyMaterial;
use tapwallet::primitives::address::{Address, Network};
use tapwallet::primitives::script::Script;
use tapwallet::primitives::transaction::{OutPoint, Transaction, TxIn, TxOut};
use tapwallet::{Result, WalletError};

pub const TEST_PHRASE: &str =
    "cook voyage document eight skate token alien guide drink uncle term abuse";

pub fn test_keys(path_suffix: &str) -> KeyMaterial {
    KeyMaterial::from_mnemonic(TEST_PHRASE, path_suffix, Network::Regtest).unwrap()
}

pub fn counterparty_address() -> Address {
    Address::p2tr([0x7e; 32], Network::Regtest)
}

/// A chain source answering from fixed data. Requests are not inspected
/// per address; each test drives a single account.
#[derive(Default)]
pub struct MockChain {
    pub fee_rate: u64,
    pub confirmed: u64,
    pub unspent: Vec<UnspentRef>,
    pub history_entries: Vec<HistoryEntry>,
    pub transactions: Mutex<HashMap<String, Transaction>>,
    pub broadcasts: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            fee_rate: 1,
            ..Default::default()
        }
    }

    /// Register a transaction so `transaction_get` can serve it.
    pub fn register(&self, tx: &Transaction) -> String {
        let txid = tx.txid().unwrap();
        self.transactions
            .lock()
            .unwrap()
            .insert(txid.clone(), tx.clone());
        txid
    }

    /// Register a transaction and list its `vout` output as unspent.
    pub fn fund(&mut self, tx: &Transaction, vout: u32, height: i64) -> String {
        let txid = self.register(tx);
        self.unspent.push(UnspentRef {
            tx_hash: txid.clone(),
            tx_pos: vout,
            value: tx.output[vout as usize].value,
            height,
        });
        txid
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn estimate_fee_per_vbyte(&self) -> Result<u64> {
        Ok(self.fee_rate)
    }

    async fn script_balance(&self, _address: &Address) -> Result<Balance> {
        Ok(Balance {
            confirmed: self.confirmed,
            unconfirmed: 0,
        })
    }

    async fn list_unspent(&self, _address: &Address) -> Result<Vec<UnspentRef>> {
        Ok(self.unspent.clone())
    }

    async fn transaction_get(&self, txid: &str) -> Result<Transaction> {
        self.transactions
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| WalletError::Rpc(format!("unknown transaction {}", txid)))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String> {
        let tx = Transaction::decode(&hex::decode(raw_hex).map_err(WalletError::from)?)?;
        let txid = tx.txid()?;
        self.broadcasts.lock().unwrap().push(raw_hex.to_string());
        self.transactions.lock().unwrap().insert(txid.clone(), tx);
        Ok(txid)
    }

    async fn history(&self, _address: &Address) -> Result<Vec<HistoryEntry>> {
        Ok(self.history_entries.clone())
    }
}

/// Build a transaction spending the given outputs of previously built
/// transactions.
pub fn make_tx(inputs: &[(&Transaction, u32)], outputs: &[(u64, &Script)]) -> Transaction {
    let mut tx = Transaction::new();
    for (prev, vout) in inputs {
        let outpoint = OutPoint::from_txid_hex(&prev.txid().unwrap(), *vout).unwrap();
        tx.input.push(TxIn::new(outpoint, Script::new(), 0xffffffff));
    }
    for (value, script) in outputs {
        tx.output.push(TxOut::new(*value, (*script).clone()));
    }
    tx
}

/// A transaction out of thin air (its inputs are never resolved by the
/// code under test).
pub fn make_external_tx(seed_byte: u8, outputs: &[(u64, &Script)]) -> Transaction {
    let mut tx = Transaction::new();
    tx.input.push(TxIn::new(
        OutPoint::new([seed_byte; 32], 0),
        Script::new(),
        0xffffffff,
    ));
    for (value, script) in outputs {
        tx.output.push(TxOut::new(*value, (*script).clone()));
    }
    tx
}
