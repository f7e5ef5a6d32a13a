//! Elements transaction consensus codec.
//!
//! Elements keeps Bitcoin's framing (CompactSize lengths, LE integers) but always writes a
//! flags byte after the version, carries confidential asset/value/nonce per output, and
//! appends per-input and per-output witnesses (rangeproofs, surjection proofs) at the end.
//! The txid hashes the serialization with flags = 0 and no witness section.

use alloc::vec::Vec;

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{OutPoint, Txid};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::compact_size::{
    read_array_32, read_compact_size, read_u32_le, read_u8, read_var_bytes, take,
    write_compact_size, write_var_bytes,
};
use crate::error::DecodeError;

/// Explicit 32-byte asset tag, internal byte order.
pub type AssetId = [u8; 32];

/// Prevout index bit signalling an asset issuance on the input.
const OUTPOINT_ISSUANCE_FLAG: u32 = 1 << 31;
/// Prevout index bit signalling a peg-in input.
const OUTPOINT_PEGIN_FLAG: u32 = 1 << 30;
const OUTPOINT_INDEX_MASK: u32 = 0x3fff_ffff;

/// P2TR script prefix: OP_1 (0x51) push 32 bytes (0x20).
const P2TR_SCRIPT_PREFIX: &[u8] = &[0x51, 0x20];

/// Output asset: explicit tag or Pedersen generator commitment (prefix 0x0a / 0x0b).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Null,
    Explicit(AssetId),
    Confidential([u8; 33]),
}

/// Output value: explicit amount (8 bytes big-endian on the wire) or commitment (0x08 / 0x09).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Null,
    Explicit(u64),
    Confidential([u8; 33]),
}

/// Output nonce: explicit 32 bytes or ECDH public key (0x02 / 0x03).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nonce {
    Null,
    Explicit([u8; 32]),
    Confidential([u8; 33]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetIssuance {
    pub blinding_nonce: [u8; 32],
    pub asset_entropy: [u8; 32],
    pub amount: Value,
    pub inflation_keys: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxInWitness {
    pub amount_rangeproof: Vec<u8>,
    pub inflation_keys_rangeproof: Vec<u8>,
    pub script_witness: Vec<Vec<u8>>,
    pub pegin_witness: Vec<Vec<u8>>,
}

impl TxInWitness {
    pub fn is_empty(&self) -> bool {
        self.amount_rangeproof.is_empty()
            && self.inflation_keys_rangeproof.is_empty()
            && self.script_witness.is_empty()
            && self.pegin_witness.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutWitness {
    pub surjection_proof: Vec<u8>,
    pub rangeproof: Vec<u8>,
}

impl TxOutWitness {
    pub fn is_empty(&self) -> bool {
        self.surjection_proof.is_empty() && self.rangeproof.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Previous output with the issuance / peg-in flag bits stripped from `vout`.
    pub previous_output: OutPoint,
    pub is_pegin: bool,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    pub asset_issuance: Option<AssetIssuance>,
    pub witness: TxInWitness,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub asset: Asset,
    pub value: Value,
    pub nonce: Nonce,
    pub script_pubkey: Vec<u8>,
    pub witness: TxOutWitness,
}

impl TxOut {
    pub fn explicit_value(&self) -> Option<u64> {
        match self.value {
            Value::Explicit(v) => Some(v),
            _ => None,
        }
    }

    pub fn explicit_asset(&self) -> Option<AssetId> {
        match self.asset {
            Asset::Explicit(a) => Some(a),
            _ => None,
        }
    }
}

/// Returns the 32-byte segwit v1 program of a `51 20 <32 bytes>` script.
pub fn witness_program_v1(script: &[u8]) -> Option<[u8; 32]> {
    if script.len() == 34 && script.starts_with(P2TR_SCRIPT_PREFIX) {
        script[2..34].try_into().ok()
    } else {
        None
    }
}

/// Builds the `51 20 <key>` script for an x-only output key.
pub fn p2tr_script(output_key: &[u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    script.extend_from_slice(P2TR_SCRIPT_PREFIX);
    script.extend_from_slice(output_key);
    script
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub lock_time: u32,
    pub input: Vec<TxIn>,
    pub output: Vec<TxOut>,
}

impl Transaction {
    /// Decodes a hex string (funding transactions arrive this way).
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(s.trim()).map_err(|_| DecodeError::InvalidHex)?;
        Self::decode(&bytes)
    }

    /// Decodes a full Elements transaction; trailing bytes are rejected.
    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        let version = read_u32_le(&mut data)?;
        let flags = read_u8(&mut data)?;
        if flags > 1 {
            return Err(DecodeError::InvalidPrefix(flags));
        }

        let input_count = read_compact_size(&mut data)?;
        let mut input = Vec::with_capacity(bounded_capacity(input_count, data.len()));
        for _ in 0..input_count {
            input.push(decode_txin(&mut data)?);
        }

        let output_count = read_compact_size(&mut data)?;
        let mut output = Vec::with_capacity(bounded_capacity(output_count, data.len()));
        for _ in 0..output_count {
            output.push(decode_txout(&mut data)?);
        }

        let lock_time = read_u32_le(&mut data)?;

        if flags & 1 == 1 {
            for txin in input.iter_mut() {
                txin.witness = TxInWitness {
                    amount_rangeproof: read_var_bytes(&mut data)?,
                    inflation_keys_rangeproof: read_var_bytes(&mut data)?,
                    script_witness: read_witness_stack(&mut data)?,
                    pegin_witness: read_witness_stack(&mut data)?,
                };
            }
            for txout in output.iter_mut() {
                txout.witness = TxOutWitness {
                    surjection_proof: read_var_bytes(&mut data)?,
                    rangeproof: read_var_bytes(&mut data)?,
                };
            }
        }

        if !data.is_empty() {
            return Err(DecodeError::TrailingData(data.len()));
        }

        Ok(Self {
            version,
            lock_time,
            input,
            output,
        })
    }

    fn has_witness(&self) -> bool {
        self.input.iter().any(|i| !i.witness.is_empty())
            || self.output.iter().any(|o| !o.witness.is_empty())
    }

    /// Consensus serialization. With `include_witness == false` the flags byte is 0.
    pub fn serialize(&self, include_witness: bool) -> Vec<u8> {
        let with_witness = include_witness && self.has_witness();
        let mut out = Vec::with_capacity(128);

        let mut buf4 = [0u8; 4];
        LittleEndian::write_u32(&mut buf4, self.version);
        out.extend_from_slice(&buf4);
        out.push(u8::from(with_witness));

        write_compact_size(&mut out, self.input.len() as u64);
        for txin in &self.input {
            encode_txin(txin, &mut out);
        }

        write_compact_size(&mut out, self.output.len() as u64);
        for txout in &self.output {
            encode_txout(txout, &mut out);
        }

        LittleEndian::write_u32(&mut buf4, self.lock_time);
        out.extend_from_slice(&buf4);

        if with_witness {
            for txin in &self.input {
                write_var_bytes(&mut out, &txin.witness.amount_rangeproof);
                write_var_bytes(&mut out, &txin.witness.inflation_keys_rangeproof);
                write_witness_stack(&mut out, &txin.witness.script_witness);
                write_witness_stack(&mut out, &txin.witness.pegin_witness);
            }
            for txout in &self.output {
                write_var_bytes(&mut out, &txout.witness.surjection_proof);
                write_var_bytes(&mut out, &txout.witness.rangeproof);
            }
        }

        out
    }

    /// Double-SHA256 of the witness-stripped serialization.
    pub fn txid(&self) -> Txid {
        let hash = sha256d::Hash::hash(&self.serialize(false));
        Txid::from_byte_array(hash.to_byte_array())
    }
}

/// Caps pre-allocation by the bytes actually available (count-bomb protection).
fn bounded_capacity(count: u64, remaining: usize) -> usize {
    core::cmp::min(count, remaining as u64) as usize
}

fn decode_txin(data: &mut &[u8]) -> Result<TxIn, DecodeError> {
    let txid = Txid::from_byte_array(read_array_32(data)?);
    let raw_vout = read_u32_le(data)?;
    let script_sig = read_var_bytes(data)?;
    let sequence = read_u32_le(data)?;

    // The null prevout (coinbase) keeps 0xffffffff verbatim; flags only apply otherwise.
    let (vout, has_issuance, is_pegin) = if raw_vout == u32::MAX {
        (raw_vout, false, false)
    } else {
        (
            raw_vout & OUTPOINT_INDEX_MASK,
            raw_vout & OUTPOINT_ISSUANCE_FLAG != 0,
            raw_vout & OUTPOINT_PEGIN_FLAG != 0,
        )
    };

    let asset_issuance = if has_issuance {
        Some(AssetIssuance {
            blinding_nonce: read_array_32(data)?,
            asset_entropy: read_array_32(data)?,
            amount: decode_value(data)?,
            inflation_keys: decode_value(data)?,
        })
    } else {
        None
    };

    Ok(TxIn {
        previous_output: OutPoint { txid, vout },
        is_pegin,
        script_sig,
        sequence,
        asset_issuance,
        witness: TxInWitness::default(),
    })
}

fn encode_txin(txin: &TxIn, out: &mut Vec<u8>) {
    out.extend_from_slice(&txin.previous_output.txid.to_byte_array());
    let mut vout = txin.previous_output.vout;
    if vout != u32::MAX {
        if txin.asset_issuance.is_some() {
            vout |= OUTPOINT_ISSUANCE_FLAG;
        }
        if txin.is_pegin {
            vout |= OUTPOINT_PEGIN_FLAG;
        }
    }
    out.extend_from_slice(&vout.to_le_bytes());
    write_var_bytes(out, &txin.script_sig);
    out.extend_from_slice(&txin.sequence.to_le_bytes());
    if let Some(issuance) = &txin.asset_issuance {
        out.extend_from_slice(&issuance.blinding_nonce);
        out.extend_from_slice(&issuance.asset_entropy);
        encode_value(&issuance.amount, out);
        encode_value(&issuance.inflation_keys, out);
    }
}

fn decode_txout(data: &mut &[u8]) -> Result<TxOut, DecodeError> {
    let asset = decode_asset(data)?;
    let value = decode_value(data)?;
    let nonce = decode_nonce(data)?;
    let script_pubkey = read_var_bytes(data)?;
    Ok(TxOut {
        asset,
        value,
        nonce,
        script_pubkey,
        witness: TxOutWitness::default(),
    })
}

fn encode_txout(txout: &TxOut, out: &mut Vec<u8>) {
    encode_asset(&txout.asset, out);
    encode_value(&txout.value, out);
    encode_nonce(&txout.nonce, out);
    write_var_bytes(out, &txout.script_pubkey);
}

fn read_commitment(prefix: u8, data: &mut &[u8]) -> Result<[u8; 33], DecodeError> {
    let mut commitment = [0u8; 33];
    commitment[0] = prefix;
    commitment[1..].copy_from_slice(take(data, 32)?);
    Ok(commitment)
}

pub(crate) fn decode_asset(data: &mut &[u8]) -> Result<Asset, DecodeError> {
    match read_u8(data)? {
        0x00 => Ok(Asset::Null),
        0x01 => Ok(Asset::Explicit(read_array_32(data)?)),
        p @ (0x0a | 0x0b) => Ok(Asset::Confidential(read_commitment(p, data)?)),
        p => Err(DecodeError::InvalidPrefix(p)),
    }
}

pub(crate) fn encode_asset(asset: &Asset, out: &mut Vec<u8>) {
    match asset {
        Asset::Null => out.push(0x00),
        Asset::Explicit(id) => {
            out.push(0x01);
            out.extend_from_slice(id);
        }
        Asset::Confidential(c) => out.extend_from_slice(c),
    }
}

pub(crate) fn decode_value(data: &mut &[u8]) -> Result<Value, DecodeError> {
    match read_u8(data)? {
        0x00 => Ok(Value::Null),
        0x01 => Ok(Value::Explicit(BigEndian::read_u64(take(data, 8)?))),
        p @ (0x08 | 0x09) => Ok(Value::Confidential(read_commitment(p, data)?)),
        p => Err(DecodeError::InvalidPrefix(p)),
    }
}

pub(crate) fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0x00),
        Value::Explicit(v) => {
            out.push(0x01);
            let mut buf = [0u8; 8];
            BigEndian::write_u64(&mut buf, *v);
            out.extend_from_slice(&buf);
        }
        Value::Confidential(c) => out.extend_from_slice(c),
    }
}

fn decode_nonce(data: &mut &[u8]) -> Result<Nonce, DecodeError> {
    match read_u8(data)? {
        0x00 => Ok(Nonce::Null),
        0x01 => Ok(Nonce::Explicit(read_array_32(data)?)),
        p @ (0x02 | 0x03) => Ok(Nonce::Confidential(read_commitment(p, data)?)),
        p => Err(DecodeError::InvalidPrefix(p)),
    }
}

fn encode_nonce(nonce: &Nonce, out: &mut Vec<u8>) {
    match nonce {
        Nonce::Null => out.push(0x00),
        Nonce::Explicit(n) => {
            out.push(0x01);
            out.extend_from_slice(n);
        }
        Nonce::Confidential(c) => out.extend_from_slice(c),
    }
}

fn read_witness_stack(data: &mut &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    let count = read_compact_size(data)?;
    let mut items = Vec::with_capacity(bounded_capacity(count, data.len()));
    for _ in 0..count {
        items.push(read_var_bytes(data)?);
    }
    Ok(items)
}

fn write_witness_stack(out: &mut Vec<u8>, items: &[Vec<u8>]) {
    write_compact_size(out, items.len() as u64);
    for item in items {
        write_var_bytes(out, item);
    }
}
