//! BIP-341 Taproot key arithmetic and the key-path signature hash.

use super::hash::{sha256, tagged_hash, Hash256};
use super::transaction::{Transaction, TxOut};
use crate::{Result, WalletError};
use secp256k1::{Keypair, Scalar, Secp256k1, Verification, XOnlyPublicKey};

/// Default sighash type for key-path spends.
pub const SIGHASH_DEFAULT: u8 = 0x00;

const SIGHASH_EPOCH: u8 = 0x00;
const SPEND_TYPE_KEY_PATH: u8 = 0x00;

/// Tweak scalar for a key with an empty script tree:
/// `H_TapTweak(internal_pubkey || 0x00*32)`.
pub fn tap_tweak(internal_key: &XOnlyPublicKey) -> Hash256 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(&internal_key.serialize());
    tagged_hash("TapTweak", &data)
}

/// The output key the P2TR script commits to.
pub fn output_key<C: Verification>(
    secp: &Secp256k1<C>,
    internal_key: &XOnlyPublicKey,
) -> Result<XOnlyPublicKey> {
    let tweak =
        Scalar::from_be_bytes(tap_tweak(internal_key)).map_err(|_| WalletError::InvalidTweak)?;
    let (tweaked, _parity) = internal_key
        .add_tweak(secp, &tweak)
        .map_err(|_| WalletError::InvalidTweak)?;
    Ok(tweaked)
}

/// The keypair that signs for the output key. Applies the same tweak as
/// [`output_key`] so key-path signatures verify against the address.
pub fn tweaked_keypair<C: Verification>(
    secp: &Secp256k1<C>,
    keypair: &Keypair,
    internal_key: &XOnlyPublicKey,
) -> Result<Keypair> {
    let tweak =
        Scalar::from_be_bytes(tap_tweak(internal_key)).map_err(|_| WalletError::InvalidTweak)?;
    keypair
        .add_xonly_tweak(secp, &tweak)
        .map_err(|_| WalletError::InvalidTweak)
}

/// BIP-341 signature hash for a key-path spend with `SIGHASH_DEFAULT`.
///
/// `prevouts` must list the output being spent by every input, in input
/// order; the default sighash commits to all of them.
pub fn key_spend_sighash(
    tx: &Transaction,
    prevouts: &[TxOut],
    input_index: usize,
) -> Result<Hash256> {
    if prevouts.len() != tx.input.len() {
        return Err(WalletError::InvalidInput(
            "Previous outputs must match transaction inputs".to_string(),
        ));
    }
    if input_index >= tx.input.len() {
        return Err(WalletError::InvalidInput(
            "Input index out of bounds".to_string(),
        ));
    }

    use super::encode::Encodable;

    let mut prevouts_buf = Vec::new();
    let mut amounts_buf = Vec::new();
    let mut scripts_buf = Vec::new();
    let mut sequences_buf = Vec::new();
    for (input, prevout) in tx.input.iter().zip(prevouts) {
        input.previous_output.consensus_encode(&mut prevouts_buf)?;
        prevout.value.consensus_encode(&mut amounts_buf)?;
        prevout.script_pubkey.consensus_encode(&mut scripts_buf)?;
        input.sequence.consensus_encode(&mut sequences_buf)?;
    }

    let mut outputs_buf = Vec::new();
    for output in &tx.output {
        output.consensus_encode(&mut outputs_buf)?;
    }

    let mut msg = Vec::with_capacity(175);
    msg.push(SIGHASH_EPOCH);
    msg.push(SIGHASH_DEFAULT);
    msg.extend_from_slice(&tx.version.to_le_bytes());
    msg.extend_from_slice(&tx.lock_time.to_le_bytes());
    msg.extend_from_slice(&sha256(&prevouts_buf));
    msg.extend_from_slice(&sha256(&amounts_buf));
    msg.extend_from_slice(&sha256(&scripts_buf));
    msg.extend_from_slice(&sha256(&sequences_buf));
    msg.extend_from_slice(&sha256(&outputs_buf));
    msg.push(SPEND_TYPE_KEY_PATH);
    msg.extend_from_slice(&(input_index as u32).to_le_bytes());

    Ok(tagged_hash("TapSighash", &msg))
}
