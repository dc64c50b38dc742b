//! Consensus serialization.
//!
//! Wire values are little-endian; variable-length collections carry a
//! CompactSize count. Encoders write into any `io::Write` sink and report
//! nothing on success, which keeps the call sites to a chain of `?`s.

use crate::{Result, WalletError};
use std::io::{Read, Write};

pub trait Encodable {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()>;

    fn consensus_encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.consensus_encode(&mut buf)?;
        Ok(buf)
    }
}

pub trait Decodable: Sized {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self>;

    fn consensus_decode_from_slice(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let value = Self::consensus_decode(&mut cursor)?;
        if (cursor.position() as usize) != data.len() {
            return Err(WalletError::InvalidInput(
                "Trailing bytes after consensus object".to_string(),
            ));
        }
        Ok(value)
    }
}

/// Write a CompactSize prefix: one tag byte, then zero, two, four or
/// eight bytes of little-endian payload depending on magnitude.
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    match value {
        0..=0xfc => writer.write_all(&[value as u8])?,
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x1_0000..=0xffff_ffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a CompactSize prefix.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let width = match read_byte(reader)? {
        tag @ 0..=0xfc => return Ok(tag as u64),
        0xfd => 2,
        0xfe => 4,
        _ => 8,
    };
    read_le_uint(reader, width)
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_le_uint<R: Read>(reader: &mut R, width: usize) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf[..width])?;
    Ok(u64::from_le_bytes(buf))
}

macro_rules! impl_le_int_codec {
    ($($int:ty),* $(,)?) => {$(
        impl Encodable for $int {
            fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()> {
                Ok(writer.write_all(&self.to_le_bytes())?)
            }
        }

        impl Decodable for $int {
            fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
                let mut buf = [0u8; std::mem::size_of::<$int>()];
                reader.read_exact(&mut buf)?;
                Ok(<$int>::from_le_bytes(buf))
            }
        }
    )*};
}

impl_le_int_codec!(u32, i32, u64);

impl Encodable for [u8; 32] {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        Ok(writer.write_all(self)?)
    }
}

impl Decodable for [u8; 32] {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 32];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// Length-prefixed byte strings (witness items).
impl Encodable for Vec<u8> {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.len() as u64)?;
        Ok(writer.write_all(self)?)
    }
}

impl Decodable for Vec<u8> {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let len = read_varint(reader)?;
        if len > 4_000_000 {
            return Err(WalletError::InvalidInput("Byte string too long".to_string()));
        }
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.len() as u64)?;
        self.iter().try_for_each(|item| item.consensus_encode(writer))
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let count = read_varint(reader)?;
        if count > 1_000_000 {
            return Err(WalletError::InvalidInput("List too long".to_string()));
        }
        (0..count).map(|_| T::consensus_decode(reader)).collect()
    }
}
