//! Bech32m Taproot addresses. This wallet produces and understands P2TR
//! addresses only.

use super::script::Script;
use crate::{Result, WalletError};
use bech32::{self, FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bitcoin network types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Get the human-readable part for Bech32 addresses
    pub fn bech32_hrp(&self) -> &'static str {
        match self {
            Network::Mainnet => "bc",
            Network::Testnet => "tb",
            Network::Regtest => "bcrt",
        }
    }

    /// BIP-44 coin type used in derivation paths.
    pub fn coin_type(&self) -> u32 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet | Network::Regtest => 1,
        }
    }

    fn from_hrp(hrp: &str) -> Result<Self> {
        match hrp {
            "bc" => Ok(Network::Mainnet),
            "tb" => Ok(Network::Testnet),
            "bcrt" => Ok(Network::Regtest),
            _ => Err(WalletError::InvalidInput(format!("Unknown HRP: {}", hrp))),
        }
    }
}

/// A Pay-to-Taproot address: network plus the 32-byte output key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub network: Network,
    pub output_key: [u8; 32],
}

impl Address {
    /// Create a P2TR address from a taproot output key
    pub fn p2tr(output_key: [u8; 32], network: Network) -> Self {
        Address {
            network,
            output_key,
        }
    }

    /// Get the script pubkey for this address
    pub fn script_pubkey(&self) -> Script {
        Script::new_p2tr(&self.output_key)
    }

    /// Recover the address committed to by a script, if it is P2TR.
    pub fn from_script(script: &Script, network: Network) -> Option<Self> {
        script
            .taproot_output_key()
            .map(|output_key| Address { network, output_key })
    }

    fn to_bech32m(&self) -> Result<String> {
        let mut data = vec![bech32::u5::try_from_u8(1).unwrap()]; // witness version 1
        data.extend_from_slice(&self.output_key.to_base32());
        bech32::encode(self.network.bech32_hrp(), data, Variant::Bech32m)
            .map_err(|e| WalletError::InvalidInput(format!("Bech32m encoding error: {}", e)))
    }

    fn from_bech32m(s: &str) -> Result<Self> {
        let (hrp, data, variant) = bech32::decode(s)
            .map_err(|e| WalletError::InvalidInput(format!("Bech32 decode error: {}", e)))?;

        let network = Network::from_hrp(&hrp)?;

        if data.is_empty() {
            return Err(WalletError::InvalidInput("Empty witness program".to_string()));
        }

        let witness_version = data[0].to_u8();
        let program = Vec::<u8>::from_base32(&data[1..])
            .map_err(|e| WalletError::InvalidInput(format!("Base32 decode error: {}", e)))?;

        match (witness_version, program.len(), variant) {
            (1, 32, Variant::Bech32m) => {
                let mut output_key = [0u8; 32];
                output_key.copy_from_slice(&program);
                Ok(Address {
                    network,
                    output_key,
                })
            }
            _ => Err(WalletError::InvalidInput(format!(
                "Not a taproot address: version={}, length={}, variant={:?}",
                witness_version,
                program.len(),
                variant
            ))),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_bech32m() {
            Ok(addr) => write!(f, "{}", addr),
            Err(_) => write!(f, "<invalid_address>"),
        }
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bech32m(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parameters() {
        assert_eq!(Network::Mainnet.bech32_hrp(), "bc");
        assert_eq!(Network::Testnet.bech32_hrp(), "tb");
        assert_eq!(Network::Regtest.bech32_hrp(), "bcrt");
        assert_eq!(Network::Mainnet.coin_type(), 0);
        assert_eq!(Network::Testnet.coin_type(), 1);
        assert_eq!(Network::Regtest.coin_type(), 1);
    }

    #[test]
    fn test_bip350_p2tr_vector() {
        // BIP-350 test vector: witness v1 program from the BIP-341 examples.
        let addr = Address::from_str(
            "bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0",
        )
        .unwrap();
        assert_eq!(addr.network, Network::Mainnet);
        assert_eq!(
            hex::encode(addr.output_key),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(
            addr.to_string(),
            "bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0"
        );
    }

    #[test]
    fn test_round_trip_all_networks() {
        let key = [0x42; 32];
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            let addr = Address::p2tr(key, network);
            let encoded = addr.to_string();
            assert!(encoded.starts_with(&format!("{}1p", network.bech32_hrp())));
            assert_eq!(Address::from_str(&encoded).unwrap(), addr);
        }
    }

    #[test]
    fn test_script_pubkey_round_trip() {
        let addr = Address::p2tr([0x42; 32], Network::Regtest);
        let script = addr.script_pubkey();
        assert!(script.is_p2tr());
        assert_eq!(Address::from_script(&script, Network::Regtest), Some(addr));
    }

    #[test]
    fn test_rejects_non_taproot() {
        // v0 P2WPKH address must be refused.
        assert!(Address::from_str("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").is_err());
        // Unknown HRP.
        assert!(Address::from_str("xx1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0").is_err());
        // Not bech32 at all.
        assert!(Address::from_str("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").is_err());
    }
}
