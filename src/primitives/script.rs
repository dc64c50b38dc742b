//! Bitcoin output scripts. Only the patterns this wallet produces and
//! recognizes are modelled; there is no script interpreter.

use super::encode::{read_varint, write_varint, Decodable, Encodable};
use crate::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const OP_1: u8 = 0x51;
const PUSH_32: u8 = 0x20;

/// Bitcoin script
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Script(pub Vec<u8>);

impl Script {
    /// Create a new empty script
    pub fn new() -> Self {
        Script(Vec::new())
    }

    /// Create a script from bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }

    /// Get the script bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the script length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the script is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Create a P2TR script for the given 32-byte output key:
    /// `OP_1 <32-byte key>`.
    pub fn new_p2tr(output_key: &[u8; 32]) -> Self {
        let mut script = Vec::with_capacity(34);
        script.push(OP_1);
        script.push(PUSH_32);
        script.extend_from_slice(output_key);
        Script(script)
    }

    /// Check if this is a P2TR script pattern
    pub fn is_p2tr(&self) -> bool {
        self.0.len() == 34 && self.0[0] == OP_1 && self.0[1] == PUSH_32
    }

    /// Extract the 32-byte output key from a P2TR script
    pub fn taproot_output_key(&self) -> Option<[u8; 32]> {
        if self.is_p2tr() {
            let mut key = [0u8; 32];
            key.copy_from_slice(&self.0[2..34]);
            Some(key)
        } else {
            None
        }
    }

    /// Validate script size
    pub fn validate(&self) -> Result<()> {
        if self.0.len() > 10_000 {
            return Err(WalletError::InvalidInput("Script too large".to_string()));
        }
        Ok(())
    }
}

impl Default for Script {
    fn default() -> Self {
        Script::new()
    }
}

impl Encodable for Script {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.0.len() as u64)?;
        Ok(writer.write_all(&self.0)?)
    }
}

impl Decodable for Script {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let len = read_varint(reader)? as usize;
        if len > 10_000 {
            return Err(WalletError::InvalidInput("Script too large".to_string()));
        }
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        Ok(Script::from_bytes(bytes))
    }
}
