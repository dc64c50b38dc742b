//! Account key material: BIP-86 derivation, message signatures and the
//! tweaked Taproot signing key. Secret bytes are wiped on dispose and the
//! struct refuses to sign afterwards.

use crate::bip39::{Mnemonic, Seed};
use crate::primitives::address::{Address, Network};
use crate::primitives::bip32::{ChildNumber, DerivationPath, ExtendedPrivKey};
use crate::primitives::hash::sha256;
use crate::primitives::taproot;
use crate::{Result, WalletError};
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Keypair, Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use zeroize::Zeroize;

const PURPOSE_TAPROOT: u32 = 86;

/// Keys and cached identifiers for one account.
pub struct KeyMaterial {
    secp: Secp256k1<All>,
    network: Network,
    path: String,
    secret: [u8; 32],
    chain_code: [u8; 32],
    public_key: PublicKey,
    internal_key: XOnlyPublicKey,
    address: Address,
    disposed: bool,
}

impl KeyMaterial {
    /// Derive account keys from a mnemonic phrase. The phrase is checked
    /// before any derivation happens.
    pub fn from_mnemonic(phrase: &str, path_suffix: &str, network: Network) -> Result<Self> {
        let mnemonic = Mnemonic::from_phrase(phrase)?;
        Self::from_seed(&mnemonic.to_seed(None), path_suffix, network)
    }

    /// Derive account keys from a 64-byte seed.
    pub fn from_seed(seed: &Seed, path_suffix: &str, network: Network) -> Result<Self> {
        let suffix = parse_suffix(path_suffix)?;
        let secp = Secp256k1::new();

        let full_path = suffix.prefixed_with(&[
            ChildNumber::Hardened(PURPOSE_TAPROOT),
            ChildNumber::Hardened(network.coin_type()),
        ]);

        let master = ExtendedPrivKey::new_master_from_seed(seed.as_bytes())?;
        let child = master.derive_path(&secp, &full_path)?;

        let public_key = PublicKey::from_secret_key(&secp, &child.private_key);
        let (internal_key, _parity) = public_key.x_only_public_key();
        let output_key = taproot::output_key(&secp, &internal_key)?;
        let address = Address::p2tr(output_key.serialize(), network);

        Ok(KeyMaterial {
            secp,
            network,
            path: format!("m/{}", full_path),
            secret: child.private_key.secret_bytes(),
            chain_code: child.chain_code.0,
            public_key,
            internal_key,
            address,
            disposed: false,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The absolute derivation path, e.g. `m/86'/1'/0'/0/0`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The account's Taproot address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Compressed 33-byte public key of the child node.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// X-only internal key the output key is tweaked from.
    pub fn internal_key(&self) -> &XOnlyPublicKey {
        &self.internal_key
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn secret_key(&self) -> Result<SecretKey> {
        if self.disposed {
            return Err(WalletError::Disposed);
        }
        SecretKey::from_slice(&self.secret).map_err(|_| WalletError::Disposed)
    }

    /// Sign an arbitrary message: ECDSA over SHA-256 of the UTF-8 bytes,
    /// returned as compact hex.
    pub fn sign_message(&self, message: &str) -> Result<String> {
        let secret = self.secret_key()?;
        let digest = Message::from_digest(sha256(message.as_bytes()));
        let signature = self.secp.sign_ecdsa(&digest, &secret);
        Ok(hex::encode(signature.serialize_compact()))
    }

    /// Verify a compact hex signature over a message. A signature that
    /// does not parse is an error; one that parses but does not match is
    /// `false`.
    pub fn verify_message(&self, message: &str, signature_hex: &str) -> Result<bool> {
        if self.disposed {
            return Err(WalletError::Disposed);
        }
        let bytes = hex::decode(signature_hex)
            .map_err(|e| WalletError::MalformedSignature(e.to_string()))?;
        let signature = Signature::from_compact(&bytes)
            .map_err(|e| WalletError::MalformedSignature(e.to_string()))?;
        let digest = Message::from_digest(sha256(message.as_bytes()));
        Ok(self
            .secp
            .verify_ecdsa(&digest, &signature, &self.public_key)
            .is_ok())
    }

    /// The keypair for key-path spends: child key plus the taproot tweak.
    pub fn tweaked_keypair(&self) -> Result<Keypair> {
        let secret = self.secret_key()?;
        let keypair = Keypair::from_secret_key(&self.secp, &secret);
        taproot::tweaked_keypair(&self.secp, &keypair, &self.internal_key)
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Overwrite the secret key and chain code with zeros. Signing
    /// operations fail with `Disposed` from here on.
    pub fn dispose(&mut self) {
        self.secret.zeroize();
        self.chain_code.zeroize();
        self.disposed = true;
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.chain_code.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("network", &self.network)
            .field("path", &self.path)
            .field("address", &self.address.to_string())
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Validate the account-relative path suffix: exactly three components,
/// the first hardened, e.g. `0'/0/5`.
fn parse_suffix(path_suffix: &str) -> Result<DerivationPath> {
    let path: DerivationPath = path_suffix.parse()?;
    if path.len() != 3 {
        return Err(WalletError::InvalidPath(format!(
            "expected account'/change/index, got `{}`",
            path_suffix
        )));
    }
    if !path.components()[0].is_hardened() {
        return Err(WalletError::InvalidPath(format!(
            "account component must be hardened in `{}`",
            path_suffix
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "cook voyage document eight skate token alien guide drink uncle term abuse";

    fn regtest_keys() -> KeyMaterial {
        KeyMaterial::from_mnemonic(PHRASE, "0'/0/0", Network::Regtest).unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = regtest_keys();
        let b = regtest_keys();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.path(), "m/86'/1'/0'/0/0");
    }

    #[test]
    fn test_regtest_address_prefix() {
        let keys = regtest_keys();
        assert!(keys.address().to_string().starts_with("bcrt1p"));
        assert_eq!(keys.public_key().serialize().len(), 33);
    }

    #[test]
    fn test_network_changes_address_and_path() {
        let regtest = regtest_keys();
        let mainnet = KeyMaterial::from_mnemonic(PHRASE, "0'/0/0", Network::Mainnet).unwrap();
        assert_eq!(mainnet.path(), "m/86'/0'/0'/0/0");
        assert!(mainnet.address().to_string().starts_with("bc1p"));
        assert_ne!(mainnet.address().output_key, regtest.address().output_key);
    }

    #[test]
    fn test_index_changes_address() {
        let first = regtest_keys();
        let second = KeyMaterial::from_mnemonic(PHRASE, "0'/0/1", Network::Regtest).unwrap();
        assert_ne!(first.address(), second.address());
    }

    #[test]
    fn test_invalid_phrase_rejected() {
        let result = KeyMaterial::from_mnemonic("not a phrase", "0'/0/0", Network::Regtest);
        assert!(matches!(result, Err(WalletError::InvalidSeedPhrase(_))));
    }

    #[test]
    fn test_invalid_suffix_rejected() {
        for suffix in ["0/0/0", "0'", "0'/0", "0'/x/0", "0'/0/0/0"] {
            let result = KeyMaterial::from_mnemonic(PHRASE, suffix, Network::Regtest);
            assert!(
                matches!(result, Err(WalletError::InvalidPath(_))),
                "suffix `{}` should be rejected",
                suffix
            );
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let keys = regtest_keys();
        let signature = keys.sign_message("hello world").unwrap();
        assert!(keys.verify_message("hello world", &signature).unwrap());
        assert!(!keys.verify_message("hello worlds", &signature).unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage_signature() {
        let keys = regtest_keys();
        assert!(matches!(
            keys.verify_message("hello", "zz"),
            Err(WalletError::MalformedSignature(_))
        ));
        assert!(matches!(
            keys.verify_message("hello", "0011"),
            Err(WalletError::MalformedSignature(_))
        ));
    }

    #[test]
    fn test_tweaked_keypair_matches_address() {
        let keys = regtest_keys();
        let tweaked = keys.tweaked_keypair().unwrap();
        let (tweaked_pub, _) = tweaked.x_only_public_key();
        assert_eq!(tweaked_pub.serialize(), keys.address().output_key);
    }

    #[test]
    fn test_dispose_blocks_signing() {
        let mut keys = regtest_keys();
        let signature = keys.sign_message("before").unwrap();
        keys.dispose();
        assert!(keys.is_disposed());
        assert!(matches!(keys.sign_message("after"), Err(WalletError::Disposed)));
        assert!(matches!(
            keys.verify_message("before", &signature),
            Err(WalletError::Disposed)
        ));
        assert!(matches!(keys.tweaked_keypair(), Err(WalletError::Disposed)));
    }
}
