//! Bitcoin transaction data structures with SegWit witness support.

use super::encode::{read_varint, write_varint, Decodable, Encodable};
use super::hash::sha256d;
use super::script::Script;
use crate::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// Reference to an output of a previous transaction.
///
/// `txid` is kept in wire (little-endian) byte order; the human-readable
/// big-endian hex form is produced by [`OutPoint::txid_hex`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OutPoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// Parse an outpoint from the display (big-endian hex) form of a txid.
    pub fn from_txid_hex(txid_hex: &str, vout: u32) -> Result<Self> {
        let bytes = hex::decode(txid_hex)?;
        if bytes.len() != 32 {
            return Err(WalletError::InvalidInput(
                "Transaction id must be 32 bytes".to_string(),
            ));
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&bytes);
        txid.reverse();
        Ok(OutPoint { txid, vout })
    }

    /// Display (big-endian) hex form of the txid.
    pub fn txid_hex(&self) -> String {
        let mut bytes = self.txid;
        bytes.reverse();
        hex::encode(bytes)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.txid.consensus_encode(writer)?;
        self.vout.consensus_encode(writer)
    }
}

impl Decodable for OutPoint {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(OutPoint {
            txid: <[u8; 32]>::consensus_decode(reader)?,
            vout: u32::consensus_decode(reader)?,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Witness stack. Not covered by the legacy (txid) serialization.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn new(previous_output: OutPoint, script_sig: Script, sequence: u32) -> Self {
        TxIn {
            previous_output,
            script_sig,
            sequence,
            witness: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: u64, script_pubkey: Script) -> Self {
        TxOut {
            value,
            script_pubkey,
        }
    }
}

impl Encodable for TxOut {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.value.consensus_encode(writer)?;
        self.script_pubkey.consensus_encode(writer)
    }
}

impl Decodable for TxOut {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(TxOut {
            value: u64::consensus_decode(reader)?,
            script_pubkey: Script::consensus_decode(reader)?,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub lock_time: u32,
    pub input: Vec<TxIn>,
    pub output: Vec<TxOut>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            version: 2,
            lock_time: 0,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn has_witness(&self) -> bool {
        self.input.iter().any(|input| !input.witness.is_empty())
    }

    /// One serialization core for both framings. With witnesses, the
    /// BIP-144 marker and flag follow the version and the witness stacks
    /// sit between outputs and lock time.
    fn serialize_into<W: Write>(&self, writer: &mut W, with_witness: bool) -> Result<()> {
        self.version.consensus_encode(writer)?;
        if with_witness {
            writer.write_all(&[SEGWIT_MARKER, SEGWIT_FLAG])?;
        }
        write_varint(writer, self.input.len() as u64)?;
        for input in &self.input {
            input.previous_output.consensus_encode(writer)?;
            input.script_sig.consensus_encode(writer)?;
            input.sequence.consensus_encode(writer)?;
        }
        self.output.consensus_encode(writer)?;
        if with_witness {
            for input in &self.input {
                input.witness.consensus_encode(writer)?;
            }
        }
        self.lock_time.consensus_encode(writer)
    }

    /// Serialize without witness data. This is the form the txid commits to.
    pub fn encode_no_witness(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf, false)?;
        Ok(buf)
    }

    /// Serialize in wire format. Uses BIP-144 framing when any input
    /// carries a witness.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf, self.has_witness())?;
        Ok(buf)
    }

    /// Decode from wire format, accepting both legacy and SegWit framing.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let tx = Self::decode_from(&mut cursor)?;
        if (cursor.position() as usize) != data.len() {
            return Err(WalletError::InvalidInput(
                "Trailing bytes after transaction".to_string(),
            ));
        }
        Ok(tx)
    }

    fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let version = i32::consensus_decode(reader)?;

        let mut segwit = false;
        let mut input_count = read_varint(reader)?;
        if input_count == 0 {
            // Segwit marker; the next byte is the flag.
            let mut flag = [0u8; 1];
            reader.read_exact(&mut flag)?;
            if flag[0] != SEGWIT_FLAG {
                return Err(WalletError::InvalidInput(
                    "Unknown transaction witness flag".to_string(),
                ));
            }
            segwit = true;
            input_count = read_varint(reader)?;
        }

        let mut input = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let previous_output = OutPoint::consensus_decode(reader)?;
            let script_sig = Script::consensus_decode(reader)?;
            let sequence = u32::consensus_decode(reader)?;
            input.push(TxIn::new(previous_output, script_sig, sequence));
        }

        let output = Vec::<TxOut>::consensus_decode(reader)?;

        if segwit {
            for item in input.iter_mut() {
                item.witness = Vec::<Vec<u8>>::consensus_decode(reader)?;
            }
        }

        let lock_time = u32::consensus_decode(reader)?;

        Ok(Transaction {
            version,
            lock_time,
            input,
            output,
        })
    }

    /// Transaction id: double SHA-256 of the witness-stripped
    /// serialization, displayed big-endian.
    pub fn txid(&self) -> Result<String> {
        let mut digest = sha256d(&self.encode_no_witness()?);
        digest.reverse();
        Ok(hex::encode(digest))
    }

    /// BIP-141 weight: base size times three plus total size.
    pub fn weight(&self) -> Result<u64> {
        let base = self.encode_no_witness()?.len() as u64;
        let total = self.encode()?.len() as u64;
        Ok(base * 3 + total)
    }

    /// Virtual size: weight divided by four, rounded up.
    pub fn vsize(&self) -> Result<u64> {
        Ok((self.weight()? + 3) / 4)
    }

    pub fn total_output_value(&self) -> u64 {
        self.output.iter().map(|output| output.value).sum()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new()
    }
}
