//! Unspent output selection.
//!
//! Selection is a first-fit walk of the server's unspent list in the
//! order it was returned; there is no coin-selection optimization. The
//! planner cannot know the final fee, so it only covers the requested
//! amount; the builder surfaces `InsufficientBalance` if the selection
//! falls short once the fee is known.

use crate::electrum::ChainSource;
use crate::primitives::address::Address;
use crate::primitives::script::Script;
use crate::primitives::transaction::OutPoint;
use crate::{Result, WalletError};

/// A spendable output with the previous output's script copied verbatim,
/// as the signature hash requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Script,
}

/// Select unspent outputs covering `target` satoshis.
///
/// Fails with `NoUnspent` when the address has nothing to spend. If the
/// whole list sums below `target`, everything collected is returned and
/// the shortfall is the builder's problem.
pub async fn collect_utxos(
    chain: &dyn ChainSource,
    address: &Address,
    target: u64,
) -> Result<Vec<Utxo>> {
    let unspent = chain.list_unspent(address).await?;
    if unspent.is_empty() {
        return Err(WalletError::NoUnspent);
    }

    let mut selected = Vec::new();
    let mut accumulated: u64 = 0;
    for entry in &unspent {
        if accumulated >= target {
            break;
        }

        let prev_tx = chain.transaction_get(&entry.tx_hash).await?;
        let prev_out = prev_tx
            .output
            .get(entry.tx_pos as usize)
            .ok_or_else(|| {
                WalletError::Rpc(format!(
                    "unspent output {}:{} does not exist in its transaction",
                    entry.tx_hash, entry.tx_pos
                ))
            })?;

        accumulated = accumulated.saturating_add(prev_out.value);
        selected.push(Utxo {
            outpoint: OutPoint::from_txid_hex(&entry.tx_hash, entry.tx_pos)?,
            value: prev_out.value,
            script_pubkey: prev_out.script_pubkey.clone(),
        });
    }

    log::debug!(
        "selected {} of {} unspent outputs ({} sats) for target {}",
        selected.len(),
        unspent.len(),
        accumulated,
        target
    );
    Ok(selected)
}
