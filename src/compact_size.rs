//! Bitcoin CompactSize (VarInt) and cursor helpers shared by the Elements transaction and
//! PSET codecs. Elements keeps Bitcoin's length framing, so one implementation serves both.

use alloc::vec::Vec;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::error::DecodeError;

/// Upper bound for any length prefix we accept (scripts, proofs, PSET values).
pub const MAX_VEC_SIZE: u64 = 4_000_000;

/// Encodes `n` as Bitcoin CompactSize and appends to `buf`.
/// 0–252: 1 byte; 253–0xFFFF: 0xFD + 2B LE; 0x10000–0xFFFFFFFF: 0xFE + 4B LE;
/// else 0xFF + 8B LE.
#[inline]
pub fn write_compact_size(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=252 => buf.push(n as u8),
        253..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Appends a CompactSize length prefix followed by `bytes`.
#[inline]
pub fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Reads a CompactSize from the front of `data`, advancing the cursor.
pub fn read_compact_size(data: &mut &[u8]) -> Result<u64, DecodeError> {
    let tag = read_u8(data)?;
    let n = match tag {
        0xfd => LittleEndian::read_u16(take(data, 2)?) as u64,
        0xfe => LittleEndian::read_u32(take(data, 4)?) as u64,
        0xff => LittleEndian::read_u64(take(data, 8)?),
        b => b as u64,
    };
    Ok(n)
}

/// Reads a CompactSize used as a length, bounded by [`MAX_VEC_SIZE`].
pub fn read_length(data: &mut &[u8]) -> Result<usize, DecodeError> {
    let n = read_compact_size(data)?;
    if n > MAX_VEC_SIZE {
        return Err(DecodeError::OversizedLength(n));
    }
    Ok(n as usize)
}

/// Reads a CompactSize-prefixed byte vector.
pub fn read_var_bytes(data: &mut &[u8]) -> Result<Vec<u8>, DecodeError> {
    let len = read_length(data)?;
    Ok(take(data, len)?.to_vec())
}

/// Splits `n` bytes off the front of `data`.
#[inline]
pub fn take<'a>(data: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if data.len() < n {
        return Err(DecodeError::IncompleteData);
    }
    let (head, rest) = data.split_at(n);
    *data = rest;
    Ok(head)
}

#[inline]
pub fn read_u8(data: &mut &[u8]) -> Result<u8, DecodeError> {
    Ok(take(data, 1)?[0])
}

#[inline]
pub fn read_u32_le(data: &mut &[u8]) -> Result<u32, DecodeError> {
    Ok(LittleEndian::read_u32(take(data, 4)?))
}

#[inline]
pub fn read_array_32(data: &mut &[u8]) -> Result<[u8; 32], DecodeError> {
    let mut out = [0u8; 32];
    out.copy_from_slice(take(data, 32)?);
    Ok(out)
}
