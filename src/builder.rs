//! Payment assembly: dust and change policy, two-pass fee discovery,
//! key-path signing and final serialization.

use crate::keys::KeyMaterial;
use crate::planner::Utxo;
use crate::primitives::psbt::PartiallySignedTransaction;
use crate::primitives::script::Script;
use crate::primitives::taproot;
use crate::primitives::transaction::{Transaction, TxIn, TxOut};
use crate::primitives::address::Address;
use crate::{Result, WalletError};
use secp256k1::Message;

/// Minimum economically relayable output value.
pub const DUST_LIMIT: u64 = 546;
/// Fee never drops below this, whatever the rate says.
pub const MIN_FEE_FLOOR: u64 = 141;

const SEQUENCE_FINAL: u32 = 0xffffffff;

/// A fully signed, serialized payment.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub txid: String,
    pub raw_hex: String,
    pub fee: u64,
    pub vsize: u64,
}

/// Build and sign a payment spending `utxos`.
///
/// The fee is discovered in two passes: a zero-fee draft yields the
/// virtual size, `max(rate * vsize, MIN_FEE_FLOOR)` is the fee, and the
/// transaction is rebuilt with it. Change above the dust limit returns
/// to the account's own address; dust-level change is absorbed into the
/// fee.
pub fn build_signed(
    keys: &KeyMaterial,
    utxos: &[Utxo],
    recipient: &Address,
    amount: u64,
    fee_rate: u64,
) -> Result<BuiltTransaction> {
    if amount <= DUST_LIMIT {
        return Err(WalletError::AmountBelowDust);
    }

    let total_in: u64 = utxos.iter().map(|utxo| utxo.value).sum();
    let recipient_script = recipient.script_pubkey();
    let change_script = keys.address().script_pubkey();

    let draft = assemble(utxos, &recipient_script, &change_script, amount, total_in, 0)?;
    let fee_trial = (fee_rate * draft.vsize()?).max(MIN_FEE_FLOOR);

    let tx = assemble(
        utxos,
        &recipient_script,
        &change_script,
        amount,
        total_in,
        fee_trial,
    )?;

    let mut psbt = PartiallySignedTransaction::new(tx)?;
    let internal_key = keys.internal_key().serialize();
    for (index, utxo) in utxos.iter().enumerate() {
        psbt.set_input_utxo(
            index,
            TxOut::new(utxo.value, utxo.script_pubkey.clone()),
            internal_key,
        )?;
    }

    sign_key_path(keys, &mut psbt)?;

    let tx = psbt.extract_tx()?;
    let fee = total_in - tx.total_output_value();
    let built = BuiltTransaction {
        txid: tx.txid()?,
        raw_hex: hex::encode(tx.encode()?),
        fee,
        vsize: tx.vsize()?,
    };
    log::debug!(
        "built {} paying {} sats, fee {} sats over {} vbytes",
        built.txid,
        amount,
        built.fee,
        built.vsize
    );
    Ok(built)
}

/// Assemble the unsigned transaction for a given fee.
fn assemble(
    utxos: &[Utxo],
    recipient_script: &Script,
    change_script: &Script,
    amount: u64,
    total_in: u64,
    fee: u64,
) -> Result<Transaction> {
    let mut tx = Transaction::new();
    for utxo in utxos {
        tx.input
            .push(TxIn::new(utxo.outpoint.clone(), Script::new(), SEQUENCE_FINAL));
    }
    tx.output.push(TxOut::new(amount, recipient_script.clone()));

    let spent = amount
        .checked_add(fee)
        .ok_or(WalletError::InsufficientBalance)?;
    if total_in < spent {
        return Err(WalletError::InsufficientBalance);
    }
    let change = total_in - spent;
    if change > DUST_LIMIT {
        tx.output.push(TxOut::new(change, change_script.clone()));
    }
    // Change at or below the dust limit is left to the fee.

    Ok(tx)
}

/// Schnorr-sign every input with the tweaked key. The witness of a
/// key-path spend is a single 64-byte signature.
fn sign_key_path(keys: &KeyMaterial, psbt: &mut PartiallySignedTransaction) -> Result<()> {
    let prevouts = psbt.spent_outputs()?;
    let keypair = keys.tweaked_keypair()?;
    let secp = keys.secp();

    for index in 0..psbt.unsigned_tx.input.len() {
        let sighash = taproot::key_spend_sighash(&psbt.unsigned_tx, &prevouts, index)?;
        let message = Message::from_digest(sighash);
        let signature = secp.sign_schnorr_with_aux_rand(&message, &keypair, &[0u8; 32]);
        psbt.finalize_input(index, vec![signature.serialize().to_vec()])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::address::Network;
    use crate::primitives::transaction::OutPoint;

    const PHRASE: &str =
        "cook voyage document eight skate token alien guide drink uncle term abuse";

    fn test_keys() -> KeyMaterial {
        KeyMaterial::from_mnemonic(PHRASE, "0'/0/0", Network::Regtest).unwrap()
    }

    fn recipient() -> Address {
        Address::p2tr([0x7e; 32], Network::Regtest)
    }

    fn funding_utxo(keys: &KeyMaterial, value: u64) -> Utxo {
        Utxo {
            outpoint: OutPoint::new([0x15; 32], 0),
            value,
            script_pubkey: keys.address().script_pubkey(),
        }
    }

    #[test]
    fn test_basic_payment_shape() {
        let keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 1_000_000)];
        let built = build_signed(&keys, &utxos, &recipient(), 1_000, 1).unwrap();

        let tx = Transaction::decode(&hex::decode(&built.raw_hex).unwrap()).unwrap();
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value, 1_000);
        assert_eq!(tx.output[0].script_pubkey, recipient().script_pubkey());
        assert_eq!(tx.output[1].value, 998_859);
        assert_eq!(tx.output[1].script_pubkey, keys.address().script_pubkey());
        assert_eq!(built.fee, 141);
        assert_eq!(tx.txid().unwrap(), built.txid);
        // Witness is one 64-byte Schnorr signature per input.
        assert_eq!(tx.input[0].witness.len(), 1);
        assert_eq!(tx.input[0].witness[0].len(), 64);
    }

    #[test]
    fn test_fee_accounting_holds() {
        let keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 40_000), funding_utxo(&keys, 30_000)];
        let built = build_signed(&keys, &utxos, &recipient(), 60_000, 5).unwrap();

        let tx = Transaction::decode(&hex::decode(&built.raw_hex).unwrap()).unwrap();
        let total_in = 70_000u64;
        assert_eq!(total_in - tx.total_output_value(), built.fee);
        assert!(built.fee >= MIN_FEE_FLOOR);
        // No dust output ever appears.
        assert!(tx.output.iter().all(|output| output.value > DUST_LIMIT));
    }

    #[test]
    fn test_signatures_verify_against_address() {
        let keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 1_000_000)];
        let built = build_signed(&keys, &utxos, &recipient(), 2_000, 2).unwrap();

        let tx = Transaction::decode(&hex::decode(&built.raw_hex).unwrap()).unwrap();
        let prevouts: Vec<TxOut> = utxos
            .iter()
            .map(|utxo| TxOut::new(utxo.value, utxo.script_pubkey.clone()))
            .collect();

        let secp = secp256k1::Secp256k1::new();
        let output_key =
            secp256k1::XOnlyPublicKey::from_slice(&keys.address().output_key).unwrap();
        for (index, input) in tx.input.iter().enumerate() {
            let sighash = taproot::key_spend_sighash(&tx, &prevouts, index).unwrap();
            let message = Message::from_digest(sighash);
            let signature =
                secp256k1::schnorr::Signature::from_slice(&input.witness[0]).unwrap();
            assert!(secp.verify_schnorr(&signature, &message, &output_key).is_ok());
        }
    }

    #[test]
    fn test_deterministic_given_same_inputs() {
        let keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 1_000_000)];
        let a = build_signed(&keys, &utxos, &recipient(), 1_000, 1).unwrap();
        let b = build_signed(&keys, &utxos, &recipient(), 1_000, 1).unwrap();
        assert_eq!(a.raw_hex, b.raw_hex);
        assert_eq!(a.txid, b.txid);
    }

    #[test]
    fn test_dust_amount_rejected() {
        let keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 1_000_000)];
        assert!(matches!(
            build_signed(&keys, &utxos, &recipient(), 500, 1),
            Err(WalletError::AmountBelowDust)
        ));
        // The limit itself is also rejected.
        assert!(matches!(
            build_signed(&keys, &utxos, &recipient(), DUST_LIMIT, 1),
            Err(WalletError::AmountBelowDust)
        ));
    }

    #[test]
    fn test_insufficient_balance() {
        let keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 1_000_000)];
        assert!(matches!(
            build_signed(&keys, &utxos, &recipient(), 1_000_000_000_000, 1),
            Err(WalletError::InsufficientBalance)
        ));
        // Amount fits but the fee does not.
        assert!(matches!(
            build_signed(&keys, &utxos, &recipient(), 999_950, 1),
            Err(WalletError::InsufficientBalance)
        ));
    }

    #[test]
    fn test_dust_change_absorbed_into_fee() {
        let keys = test_keys();
        // total_in - amount - fee leaves change below the dust limit.
        let utxos = vec![funding_utxo(&keys, 10_000)];
        let built = build_signed(&keys, &utxos, &recipient(), 9_500, 1).unwrap();

        let tx = Transaction::decode(&hex::decode(&built.raw_hex).unwrap()).unwrap();
        assert_eq!(tx.output.len(), 1);
        assert_eq!(built.fee, 500);
        assert!(built.fee >= 141 || tx.output.len() == 1);
    }

    #[test]
    fn test_exact_spend_no_change() {
        let keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 101_141)];
        let built = build_signed(&keys, &utxos, &recipient(), 101_000, 1).unwrap();
        let tx = Transaction::decode(&hex::decode(&built.raw_hex).unwrap()).unwrap();
        assert_eq!(tx.output.len(), 1);
        assert_eq!(built.fee, 141);
    }

    #[test]
    fn test_disposed_keys_cannot_sign() {
        let mut keys = test_keys();
        let utxos = vec![funding_utxo(&keys, 1_000_000)];
        keys.dispose();
        assert!(matches!(
            build_signed(&keys, &utxos, &recipient(), 1_000, 1),
            Err(WalletError::Disposed)
        ));
    }
}
