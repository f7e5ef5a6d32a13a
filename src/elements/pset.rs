//! Partially Signed Elements Transaction (PSET, version 2) codec.
//!
//! Wire format: magic `pset\xff`, then a global map, one map per input and one per output.
//! Each map is a run of `<CompactSize keylen><key><CompactSize valuelen><value>` pairs closed
//! by a zero byte; the first CompactSize of a key is its type. Elements fields live under the
//! proprietary type `0xfc` with identifier `pset`. Only the fields the tree validator reads are
//! interpreted; everything else is carried through untouched.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Txid};
use byteorder::{ByteOrder, LittleEndian};

use crate::compact_size::{
    read_compact_size, read_var_bytes, take, write_compact_size, write_var_bytes,
};
use crate::elements::transaction::{
    Asset, AssetId, Nonce, Transaction, TxIn, TxInWitness, TxOut, TxOutWitness, Value,
};
use crate::error::DecodeError;

/// `pset` followed by the 0xff separator.
pub const PSET_MAGIC: [u8; 5] = [0x70, 0x73, 0x65, 0x74, 0xff];
/// Hex form of [`PSET_MAGIC`]; a string starting with it is taken as hex, otherwise base64.
const PSET_MAGIC_HEX: &str = "70736574ff";
const PSET_VERSION: u32 = 2;
const PROPRIETARY_PREFIX: &[u8] = b"pset";

// Global keys
pub const PSBT_GLOBAL_TX_VERSION: u8 = 0x02;
pub const PSBT_GLOBAL_FALLBACK_LOCKTIME: u8 = 0x03;
pub const PSBT_GLOBAL_INPUT_COUNT: u8 = 0x04;
pub const PSBT_GLOBAL_OUTPUT_COUNT: u8 = 0x05;
pub const PSBT_GLOBAL_VERSION: u8 = 0xfb;

// Input keys
pub const PSBT_IN_PREVIOUS_TXID: u8 = 0x0e;
pub const PSBT_IN_OUTPUT_INDEX: u8 = 0x0f;
pub const PSBT_IN_SEQUENCE: u8 = 0x10;
pub const PSBT_IN_REQUIRED_TIME_LOCKTIME: u8 = 0x11;
pub const PSBT_IN_REQUIRED_HEIGHT_LOCKTIME: u8 = 0x12;
pub const PSBT_IN_TAP_LEAF_SCRIPT: u8 = 0x15;

// Output keys
pub const PSBT_OUT_AMOUNT: u8 = 0x03;
pub const PSBT_OUT_SCRIPT: u8 = 0x04;

const PSBT_PROPRIETARY: u8 = 0xfc;

// Elements proprietary output subtypes
pub const PSBT_ELEMENTS_OUT_VALUE_COMMITMENT: u8 = 0x01;
pub const PSBT_ELEMENTS_OUT_ASSET: u8 = 0x02;
pub const PSBT_ELEMENTS_OUT_ASSET_COMMITMENT: u8 = 0x03;
pub const PSBT_ELEMENTS_OUT_ECDH_PUBKEY: u8 = 0x07;

/// One `PSBT_IN_TAP_LEAF_SCRIPT` entry: control block (key data) and script + leaf version (value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapLeafScript {
    pub control_block: Vec<u8>,
    pub script: Vec<u8>,
    pub leaf_version: u8,
}

/// Raw key/value pair the codec does not interpret.
pub type UnknownPair = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsetInput {
    pub previous_txid: Txid,
    pub previous_output_index: u32,
    pub sequence: Option<u32>,
    pub required_time_locktime: Option<u32>,
    pub required_height_locktime: Option<u32>,
    /// In wire (key) order.
    pub tap_leaf_scripts: Vec<TapLeafScript>,
    pub unknown: Vec<UnknownPair>,
}

impl PsetInput {
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_txid: previous_output.txid,
            previous_output_index: previous_output.vout,
            sequence: None,
            required_time_locktime: None,
            required_height_locktime: None,
            tap_leaf_scripts: Vec::new(),
            unknown: Vec::new(),
        }
    }

    pub fn previous_output(&self) -> OutPoint {
        OutPoint {
            txid: self.previous_txid,
            vout: self.previous_output_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsetOutput {
    /// Explicit amount; absent when the output carries a value commitment.
    pub amount: Option<u64>,
    pub script_pubkey: Vec<u8>,
    /// Explicit asset tag; absent when the output carries an asset commitment.
    pub asset: Option<AssetId>,
    pub value_commitment: Option<[u8; 33]>,
    pub asset_commitment: Option<[u8; 33]>,
    pub ecdh_pubkey: Option<[u8; 33]>,
    pub unknown: Vec<UnknownPair>,
}

impl PsetOutput {
    /// Unblinded output paying `amount` of `asset` to `script_pubkey`.
    pub fn explicit(amount: u64, asset: AssetId, script_pubkey: Vec<u8>) -> Self {
        Self {
            amount: Some(amount),
            script_pubkey,
            asset: Some(asset),
            value_commitment: None,
            asset_commitment: None,
            ecdh_pubkey: None,
            unknown: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pset {
    pub tx_version: u32,
    pub fallback_locktime: Option<u32>,
    pub inputs: Vec<PsetInput>,
    pub outputs: Vec<PsetOutput>,
    pub unknown: Vec<UnknownPair>,
}

impl FromStr for Pset {
    type Err = DecodeError;

    /// Accepts base64 (canonical transport) or hex (detected by the hex-encoded magic).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bytes = if s.len() >= PSET_MAGIC_HEX.len()
            && s.as_bytes()[..PSET_MAGIC_HEX.len()].eq_ignore_ascii_case(PSET_MAGIC_HEX.as_bytes())
        {
            hex::decode(s).map_err(|_| DecodeError::InvalidHex)?
        } else {
            BASE64.decode(s).map_err(|_| DecodeError::InvalidBase64)?
        };
        Self::decode(&bytes)
    }
}

impl Pset {
    pub fn decode(mut data: &[u8]) -> Result<Self, DecodeError> {
        if take(&mut data, PSET_MAGIC.len())? != PSET_MAGIC {
            return Err(DecodeError::InvalidMagic);
        }

        // ---------------------------------------------------------
        // 1. Global map
        // ---------------------------------------------------------
        let mut tx_version = None;
        let mut fallback_locktime = None;
        let mut input_count = None;
        let mut output_count = None;
        let mut pset_version = None;
        let mut unknown = Vec::new();

        for (key, value) in read_map(&mut data)? {
            let (key_type, key_data) = split_key(&key)?;
            match key_type {
                PSBT_GLOBAL_TX_VERSION if key_data.is_empty() => {
                    tx_version = Some(read_u32_field(&value, key_type)?)
                }
                PSBT_GLOBAL_FALLBACK_LOCKTIME if key_data.is_empty() => {
                    fallback_locktime = Some(read_u32_field(&value, key_type)?)
                }
                PSBT_GLOBAL_INPUT_COUNT if key_data.is_empty() => {
                    input_count = Some(read_count_field(&value, key_type)?)
                }
                PSBT_GLOBAL_OUTPUT_COUNT if key_data.is_empty() => {
                    output_count = Some(read_count_field(&value, key_type)?)
                }
                PSBT_GLOBAL_VERSION if key_data.is_empty() => {
                    pset_version = Some(read_u32_field(&value, key_type)?)
                }
                _ => unknown.push((key, value)),
            }
        }

        let version = pset_version.ok_or(DecodeError::MissingField(PSBT_GLOBAL_VERSION))?;
        if version != PSET_VERSION {
            return Err(DecodeError::UnsupportedPsetVersion(version));
        }
        let tx_version = tx_version.ok_or(DecodeError::MissingField(PSBT_GLOBAL_TX_VERSION))?;
        let input_count = input_count.ok_or(DecodeError::MissingField(PSBT_GLOBAL_INPUT_COUNT))?;
        let output_count =
            output_count.ok_or(DecodeError::MissingField(PSBT_GLOBAL_OUTPUT_COUNT))?;

        // Every map is at least its separator byte; reject counts the data cannot hold.
        if input_count.saturating_add(output_count) > data.len() {
            return Err(DecodeError::IncompleteData);
        }

        // ---------------------------------------------------------
        // 2. Input maps
        // ---------------------------------------------------------
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(decode_input(read_map(&mut data)?)?);
        }

        // ---------------------------------------------------------
        // 3. Output maps
        // ---------------------------------------------------------
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(decode_output(read_map(&mut data)?)?);
        }

        if !data.is_empty() {
            return Err(DecodeError::TrailingData(data.len()));
        }

        Ok(Self {
            tx_version,
            fallback_locktime,
            inputs,
            outputs,
            unknown,
        })
    }

    /// Serializes back to PSET bytes. Interpreted fields come first, then unknown pairs.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&PSET_MAGIC);

        write_pair(&mut out, &[PSBT_GLOBAL_TX_VERSION], &self.tx_version.to_le_bytes());
        if let Some(locktime) = self.fallback_locktime {
            write_pair(&mut out, &[PSBT_GLOBAL_FALLBACK_LOCKTIME], &locktime.to_le_bytes());
        }
        write_pair(&mut out, &[PSBT_GLOBAL_INPUT_COUNT], &compact_bytes(self.inputs.len() as u64));
        write_pair(
            &mut out,
            &[PSBT_GLOBAL_OUTPUT_COUNT],
            &compact_bytes(self.outputs.len() as u64),
        );
        write_pair(&mut out, &[PSBT_GLOBAL_VERSION], &PSET_VERSION.to_le_bytes());
        write_unknown(&mut out, &self.unknown);
        out.push(0x00);

        for input in &self.inputs {
            write_pair(&mut out, &[PSBT_IN_PREVIOUS_TXID], &input.previous_txid.to_byte_array());
            let index = input.previous_output_index.to_le_bytes();
            write_pair(&mut out, &[PSBT_IN_OUTPUT_INDEX], &index);
            if let Some(sequence) = input.sequence {
                write_pair(&mut out, &[PSBT_IN_SEQUENCE], &sequence.to_le_bytes());
            }
            if let Some(t) = input.required_time_locktime {
                write_pair(&mut out, &[PSBT_IN_REQUIRED_TIME_LOCKTIME], &t.to_le_bytes());
            }
            if let Some(h) = input.required_height_locktime {
                write_pair(&mut out, &[PSBT_IN_REQUIRED_HEIGHT_LOCKTIME], &h.to_le_bytes());
            }
            for leaf in &input.tap_leaf_scripts {
                let mut key = Vec::with_capacity(1 + leaf.control_block.len());
                key.push(PSBT_IN_TAP_LEAF_SCRIPT);
                key.extend_from_slice(&leaf.control_block);
                let mut value = leaf.script.clone();
                value.push(leaf.leaf_version);
                write_pair(&mut out, &key, &value);
            }
            write_unknown(&mut out, &input.unknown);
            out.push(0x00);
        }

        for output in &self.outputs {
            if let Some(amount) = output.amount {
                write_pair(&mut out, &[PSBT_OUT_AMOUNT], &amount.to_le_bytes());
            }
            write_pair(&mut out, &[PSBT_OUT_SCRIPT], &output.script_pubkey);
            if let Some(c) = &output.value_commitment {
                write_pair(&mut out, &proprietary_key(PSBT_ELEMENTS_OUT_VALUE_COMMITMENT), c);
            }
            if let Some(asset) = &output.asset {
                write_pair(&mut out, &proprietary_key(PSBT_ELEMENTS_OUT_ASSET), asset);
            }
            if let Some(c) = &output.asset_commitment {
                write_pair(&mut out, &proprietary_key(PSBT_ELEMENTS_OUT_ASSET_COMMITMENT), c);
            }
            if let Some(pk) = &output.ecdh_pubkey {
                write_pair(&mut out, &proprietary_key(PSBT_ELEMENTS_OUT_ECDH_PUBKEY), pk);
            }
            write_unknown(&mut out, &output.unknown);
            out.push(0x00);
        }

        out
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.encode())
    }

    /// Builds the unsigned Elements transaction this PSET describes.
    pub fn unsigned_tx(&self) -> Result<Transaction, DecodeError> {
        let input = self
            .inputs
            .iter()
            .map(|i| TxIn {
                previous_output: i.previous_output(),
                is_pegin: false,
                script_sig: Vec::new(),
                sequence: i.sequence.unwrap_or(u32::MAX),
                asset_issuance: None,
                witness: TxInWitness::default(),
            })
            .collect();

        let output = self
            .outputs
            .iter()
            .map(|o| TxOut {
                asset: match (o.asset_commitment, o.asset) {
                    (Some(c), _) => Asset::Confidential(c),
                    (None, Some(a)) => Asset::Explicit(a),
                    (None, None) => Asset::Null,
                },
                value: match (o.value_commitment, o.amount) {
                    (Some(c), _) => Value::Confidential(c),
                    (None, Some(v)) => Value::Explicit(v),
                    (None, None) => Value::Null,
                },
                nonce: o.ecdh_pubkey.map_or(Nonce::Null, Nonce::Confidential),
                script_pubkey: o.script_pubkey.clone(),
                witness: TxOutWitness::default(),
            })
            .collect();

        Ok(Transaction {
            version: self.tx_version,
            lock_time: self.compute_locktime()?,
            input,
            output,
        })
    }

    /// Txid of [`Pset::unsigned_tx`].
    pub fn txid(&self) -> Result<Txid, DecodeError> {
        Ok(self.unsigned_tx()?.txid())
    }

    /// PSBTv2 locktime selection: height when every constraining input allows height, time
    /// when every one allows time, the fallback when no input constrains.
    fn compute_locktime(&self) -> Result<u32, DecodeError> {
        let constraining: Vec<&PsetInput> = self
            .inputs
            .iter()
            .filter(|i| i.required_time_locktime.is_some() || i.required_height_locktime.is_some())
            .collect();
        if constraining.is_empty() {
            return Ok(self.fallback_locktime.unwrap_or(0));
        }
        if constraining.iter().all(|i| i.required_height_locktime.is_some()) {
            return Ok(constraining
                .iter()
                .filter_map(|i| i.required_height_locktime)
                .max()
                .unwrap_or(0));
        }
        if constraining.iter().all(|i| i.required_time_locktime.is_some()) {
            return Ok(constraining
                .iter()
                .filter_map(|i| i.required_time_locktime)
                .max()
                .unwrap_or(0));
        }
        Err(DecodeError::InvalidField(PSBT_IN_REQUIRED_TIME_LOCKTIME))
    }
}

fn decode_input(pairs: Vec<UnknownPair>) -> Result<PsetInput, DecodeError> {
    let mut previous_txid = None;
    let mut previous_output_index = None;
    let mut sequence = None;
    let mut required_time_locktime = None;
    let mut required_height_locktime = None;
    let mut tap_leaf_scripts = Vec::new();
    let mut unknown = Vec::new();

    for (key, value) in pairs {
        let (key_type, key_data) = split_key(&key)?;
        match key_type {
            PSBT_IN_PREVIOUS_TXID if key_data.is_empty() => {
                let bytes: [u8; 32] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| DecodeError::InvalidField(key_type))?;
                previous_txid = Some(Txid::from_byte_array(bytes));
            }
            PSBT_IN_OUTPUT_INDEX if key_data.is_empty() => {
                previous_output_index = Some(read_u32_field(&value, key_type)?)
            }
            PSBT_IN_SEQUENCE if key_data.is_empty() => {
                sequence = Some(read_u32_field(&value, key_type)?)
            }
            PSBT_IN_REQUIRED_TIME_LOCKTIME if key_data.is_empty() => {
                required_time_locktime = Some(read_u32_field(&value, key_type)?)
            }
            PSBT_IN_REQUIRED_HEIGHT_LOCKTIME if key_data.is_empty() => {
                required_height_locktime = Some(read_u32_field(&value, key_type)?)
            }
            PSBT_IN_TAP_LEAF_SCRIPT => {
                // Control block: 33 + 32*m bytes. Value: script || leaf version.
                if key_data.len() < 33 || (key_data.len() - 33) % 32 != 0 {
                    return Err(DecodeError::InvalidField(key_type));
                }
                let (leaf_version, script) = value
                    .split_last()
                    .ok_or(DecodeError::InvalidField(key_type))?;
                tap_leaf_scripts.push(TapLeafScript {
                    control_block: key_data.to_vec(),
                    script: script.to_vec(),
                    leaf_version: *leaf_version,
                });
            }
            _ => unknown.push((key, value)),
        }
    }

    Ok(PsetInput {
        previous_txid: previous_txid.ok_or(DecodeError::MissingField(PSBT_IN_PREVIOUS_TXID))?,
        previous_output_index: previous_output_index
            .ok_or(DecodeError::MissingField(PSBT_IN_OUTPUT_INDEX))?,
        sequence,
        required_time_locktime,
        required_height_locktime,
        tap_leaf_scripts,
        unknown,
    })
}

fn decode_output(pairs: Vec<UnknownPair>) -> Result<PsetOutput, DecodeError> {
    let mut amount = None;
    let mut script_pubkey = None;
    let mut asset = None;
    let mut value_commitment: Option<[u8; 33]> = None;
    let mut asset_commitment: Option<[u8; 33]> = None;
    let mut ecdh_pubkey: Option<[u8; 33]> = None;
    let mut unknown = Vec::new();

    for (key, value) in pairs {
        let (key_type, key_data) = split_key(&key)?;
        match key_type {
            PSBT_OUT_AMOUNT if key_data.is_empty() => {
                if value.len() != 8 {
                    return Err(DecodeError::InvalidField(key_type));
                }
                amount = Some(LittleEndian::read_u64(&value));
            }
            PSBT_OUT_SCRIPT if key_data.is_empty() => script_pubkey = Some(value),
            PSBT_PROPRIETARY => match elements_subtype(key_data) {
                Some(PSBT_ELEMENTS_OUT_VALUE_COMMITMENT) => {
                    value_commitment =
                        Some(read_array_field(&value, PSBT_ELEMENTS_OUT_VALUE_COMMITMENT)?)
                }
                Some(PSBT_ELEMENTS_OUT_ASSET) => {
                    asset = Some(read_array_field::<32>(&value, PSBT_ELEMENTS_OUT_ASSET)?)
                }
                Some(PSBT_ELEMENTS_OUT_ASSET_COMMITMENT) => {
                    asset_commitment =
                        Some(read_array_field(&value, PSBT_ELEMENTS_OUT_ASSET_COMMITMENT)?)
                }
                Some(PSBT_ELEMENTS_OUT_ECDH_PUBKEY) => {
                    ecdh_pubkey =
                        Some(read_array_field(&value, PSBT_ELEMENTS_OUT_ECDH_PUBKEY)?)
                }
                _ => unknown.push((key, value)),
            },
            _ => unknown.push((key, value)),
        }
    }

    if amount.is_none() && value_commitment.is_none() {
        return Err(DecodeError::MissingField(PSBT_OUT_AMOUNT));
    }
    if asset.is_none() && asset_commitment.is_none() {
        return Err(DecodeError::MissingField(PSBT_ELEMENTS_OUT_ASSET));
    }

    Ok(PsetOutput {
        amount,
        script_pubkey: script_pubkey.ok_or(DecodeError::MissingField(PSBT_OUT_SCRIPT))?,
        asset,
        value_commitment,
        asset_commitment,
        ecdh_pubkey,
        unknown,
    })
}

/// Reads one map up to its zero separator, rejecting duplicate keys.
fn read_map(data: &mut &[u8]) -> Result<Vec<UnknownPair>, DecodeError> {
    let mut pairs = Vec::new();
    let mut seen = BTreeSet::new();
    loop {
        let key = read_var_bytes(data)?;
        if key.is_empty() {
            return Ok(pairs);
        }
        let value = read_var_bytes(data)?;
        if !seen.insert(key.clone()) {
            return Err(DecodeError::DuplicateKey(key[0]));
        }
        pairs.push((key, value));
    }
}

/// Splits a key into its (single-byte) type and key data. Multi-byte types are never ours.
fn split_key(key: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    let mut cursor = key;
    let key_type = read_compact_size(&mut cursor)?;
    let key_type = u8::try_from(key_type).unwrap_or(u8::MAX);
    Ok((key_type, cursor))
}

/// Subtype of an Elements proprietary key (`<len>pset<subtype>`), if the identifier matches.
fn elements_subtype(mut key_data: &[u8]) -> Option<u8> {
    let prefix = read_var_bytes(&mut key_data).ok()?;
    if prefix != PROPRIETARY_PREFIX {
        return None;
    }
    let subtype = read_compact_size(&mut key_data).ok()?;
    if !key_data.is_empty() {
        return None;
    }
    u8::try_from(subtype).ok()
}

fn proprietary_key(subtype: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(7);
    key.push(PSBT_PROPRIETARY);
    write_var_bytes(&mut key, PROPRIETARY_PREFIX);
    write_compact_size(&mut key, subtype as u64);
    key
}

fn read_u32_field(value: &[u8], key_type: u8) -> Result<u32, DecodeError> {
    if value.len() != 4 {
        return Err(DecodeError::InvalidField(key_type));
    }
    Ok(LittleEndian::read_u32(value))
}

fn read_count_field(value: &[u8], key_type: u8) -> Result<usize, DecodeError> {
    let mut cursor = value;
    let n = read_compact_size(&mut cursor).map_err(|_| DecodeError::InvalidField(key_type))?;
    if !cursor.is_empty() {
        return Err(DecodeError::InvalidField(key_type));
    }
    usize::try_from(n).map_err(|_| DecodeError::OversizedLength(n))
}

fn read_array_field<const N: usize>(value: &[u8], key_type: u8) -> Result<[u8; N], DecodeError> {
    value.try_into().map_err(|_| DecodeError::InvalidField(key_type))
}

fn compact_bytes(n: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    write_compact_size(&mut buf, n);
    buf
}

fn write_pair(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    write_var_bytes(out, key);
    write_var_bytes(out, value);
}

fn write_unknown(out: &mut Vec<u8>, pairs: &[UnknownPair]) {
    for (key, value) in pairs {
        write_pair(out, key, value);
    }
}
