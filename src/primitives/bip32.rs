//! BIP32 Hierarchical Deterministic Keys.

use crate::{Result, WalletError};
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, Signing};
use sha2::Sha512;
use std::fmt;
use std::str::FromStr;

const BIP32_MASTER_KEY: &[u8] = b"Bitcoin seed";
const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCode(pub [u8; 32]);

/// One step of a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildNumber {
    Normal(u32),
    Hardened(u32),
}

impl ChildNumber {
    pub fn is_hardened(&self) -> bool {
        matches!(self, ChildNumber::Hardened(_))
    }

    fn to_raw(self) -> u32 {
        match self {
            ChildNumber::Normal(index) => index,
            ChildNumber::Hardened(index) => index | HARDENED_OFFSET,
        }
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildNumber::Normal(index) => write!(f, "{}", index),
            ChildNumber::Hardened(index) => write!(f, "{}'", index),
        }
    }
}

impl FromStr for ChildNumber {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        let (digits, hardened) = match s.strip_suffix('\'') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WalletError::InvalidPath(format!(
                "invalid path component `{}`",
                s
            )));
        }
        let index: u32 = digits
            .parse()
            .map_err(|_| WalletError::InvalidPath(format!("index out of range in `{}`", s)))?;
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidPath(format!(
                "index out of range in `{}`",
                s
            )));
        }
        Ok(if hardened {
            ChildNumber::Hardened(index)
        } else {
            ChildNumber::Normal(index)
        })
    }
}

/// A sequence of child numbers, e.g. `0'/0/5`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    pub fn new(components: Vec<ChildNumber>) -> Self {
        DerivationPath(components)
    }

    pub fn components(&self) -> &[ChildNumber] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prepend components, e.g. the `86'/coin'` prefix.
    pub fn prefixed_with(&self, prefix: &[ChildNumber]) -> DerivationPath {
        let mut components = prefix.to_vec();
        components.extend_from_slice(&self.0);
        DerivationPath(components)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", component)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix("m/").unwrap_or(s);
        if trimmed.is_empty() {
            return Err(WalletError::InvalidPath("empty path".to_string()));
        }
        let components = trimmed
            .split('/')
            .map(ChildNumber::from_str)
            .collect::<Result<Vec<_>>>()?;
        Ok(DerivationPath(components))
    }
}

/// HMAC-SHA-512 over concatenated chunks, split into the 32-byte key
/// half and the 32-byte chain-code half. Both master and child
/// derivation are instances of this.
fn hmac_sha512_halves(key: &[u8], chunks: &[&[u8]]) -> ([u8; 32], [u8; 32]) {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key length");
    for chunk in chunks {
        mac.update(chunk);
    }
    let digest = mac.finalize().into_bytes();

    let mut key_half = [0u8; 32];
    let mut chain_half = [0u8; 32];
    key_half.copy_from_slice(&digest[..32]);
    chain_half.copy_from_slice(&digest[32..]);
    (key_half, chain_half)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPrivKey {
    pub private_key: SecretKey,
    pub chain_code: ChainCode,
}

impl ExtendedPrivKey {
    /// Create a new master key from a seed.
    pub fn new_master_from_seed(seed: &[u8]) -> Result<Self> {
        let (key_half, chain_half) = hmac_sha512_halves(BIP32_MASTER_KEY, &[seed]);
        let private_key = SecretKey::from_slice(&key_half).map_err(|e| {
            WalletError::InvalidInput(format!("seed yields no valid master key: {}", e))
        })?;
        Ok(ExtendedPrivKey {
            private_key,
            chain_code: ChainCode(chain_half),
        })
    }

    /// Derive one child. Hardened children commit to the parent private
    /// key, normal children to the parent public key.
    pub fn derive_child<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        child: ChildNumber,
    ) -> Result<Self> {
        let index_bytes = child.to_raw().to_be_bytes();
        let (tweak_half, chain_half) = match child {
            ChildNumber::Hardened(_) => {
                // 0x00 pad before the 32 secret bytes.
                let mut padded_secret = [0u8; 33];
                padded_secret[1..].copy_from_slice(&self.private_key.secret_bytes());
                hmac_sha512_halves(&self.chain_code.0, &[&padded_secret, &index_bytes])
            }
            ChildNumber::Normal(_) => {
                let parent_pubkey =
                    PublicKey::from_secret_key(secp, &self.private_key).serialize();
                hmac_sha512_halves(&self.chain_code.0, &[&parent_pubkey, &index_bytes])
            }
        };

        let tweak = Scalar::from_be_bytes(tweak_half)
            .map_err(|_| WalletError::InvalidInput("Derived key out of range".to_string()))?;
        let private_key = self
            .private_key
            .add_tweak(&tweak)
            .map_err(|_| WalletError::InvalidInput("Derived key is invalid".to_string()))?;

        Ok(ExtendedPrivKey {
            private_key,
            chain_code: ChainCode(chain_half),
        })
    }

    /// Derive along a full path.
    pub fn derive_path<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        path: &DerivationPath,
    ) -> Result<Self> {
        let mut node = self.clone();
        for &child in path.components() {
            node = node.derive_child(secp, child)?;
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bip32_vector2_master_and_first_child() {
        // BIP32 test vector 2: a 64-byte seed, the master node, and the
        // unhardened child m/0.
        let seed = hex::decode(
            "fffcf9f6f3f0edeae7e4e1dedbd8d5d2cfccc9c6c3c0bdbab7b4b1aeaba8a5a2\
             9f9c999693908d8a8784817e7b7875726f6c696663605d5a5754514e4b484542",
        )
        .unwrap();
        let master = ExtendedPrivKey::new_master_from_seed(&seed).unwrap();
        assert_eq!(
            hex::encode(master.private_key.secret_bytes()),
            "4b03d6fc340455b363f51020ad3ecca4f0850280cf436c70c727923f6db46c3e"
        );
        assert_eq!(
            hex::encode(master.chain_code.0),
            "60499f801b896d83179a4374aeb7822aaeaceaa0db1f85ee3e904c4defbd9689"
        );

        let secp = Secp256k1::new();
        let child = master.derive_child(&secp, ChildNumber::Normal(0)).unwrap();
        assert_eq!(
            hex::encode(child.private_key.secret_bytes()),
            "abe74a98f6c7eabee0428f53798f0ab8aa1bd37873999041703c742f15ac7e1e"
        );
        // Different seed, different node.
        assert_ne!(master.private_key, child.private_key);
    }

    #[test]
    fn test_bip32_vector1_hardened_child() {
        // BIP32 test vector 1, chain m/0'
        let secp = Secp256k1::new();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedPrivKey::new_master_from_seed(&seed).unwrap();
        let child = master
            .derive_child(&secp, ChildNumber::Hardened(0))
            .unwrap();

        assert_eq!(
            hex::encode(child.private_key.secret_bytes()),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
        assert_eq!(
            hex::encode(child.chain_code.0),
            "47fdacbd0f1097043b78c63c20c34ef4ed9a111d980047ad16282c7ae6236141"
        );
    }

    #[test]
    fn test_bip32_vector1_mixed_path() {
        // BIP32 test vector 1, chain m/0'/1
        let secp = Secp256k1::new();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedPrivKey::new_master_from_seed(&seed).unwrap();
        let path: DerivationPath = "0'/1".parse().unwrap();
        let node = master.derive_path(&secp, &path).unwrap();

        assert_eq!(
            hex::encode(node.private_key.secret_bytes()),
            "3c6cb8d0f6a264c91ea8b5030fadaa8e538b020f0a387421a12de9319dc93368"
        );
    }

    #[test]
    fn test_path_parsing() {
        let path: DerivationPath = "86'/1'/0'/0/5".parse().unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(path.components()[0], ChildNumber::Hardened(86));
        assert_eq!(path.components()[4], ChildNumber::Normal(5));
        assert_eq!(path.to_string(), "86'/1'/0'/0/5");

        // "m/" prefix is tolerated.
        let with_m: DerivationPath = "m/0'/0/0".parse().unwrap();
        assert_eq!(with_m.len(), 3);
    }

    #[test]
    fn test_path_parsing_rejects_junk() {
        assert!("0'/a/0".parse::<DerivationPath>().is_err());
        assert!("".parse::<DerivationPath>().is_err());
        assert!("0'//0".parse::<DerivationPath>().is_err());
        assert!("0'/0/-1".parse::<DerivationPath>().is_err());
        assert!("0''/0/0".parse::<DerivationPath>().is_err());
        // Index at or past the hardened bit.
        assert!("2147483648/0/0".parse::<DerivationPath>().is_err());
    }

    #[test]
    fn test_prefixed_with() {
        let suffix: DerivationPath = "0'/0/0".parse().unwrap();
        let full = suffix.prefixed_with(&[ChildNumber::Hardened(86), ChildNumber::Hardened(1)]);
        assert_eq!(full.to_string(), "86'/1'/0'/0/0");
    }
}
