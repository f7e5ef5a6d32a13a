//! Tapscript leaf codec for congestion-tree nodes.
//!
//! Every node input commits to exactly two leaves:
//! - **sweep**: `<authority> OP_CHECKSIGVERIFY <sequence> OP_CHECKSEQUENCEVERIFY`, the
//!   unilateral path for the settlement authority after a relative timeout.
//! - **branch**: one introspection clause per child output, checking asset, value and
//!   scriptPubKey of outputs 0 (left) and optionally 1 (right).
//!
//! Recognition is exact-pattern over the minimal-push instruction stream. There is no
//! script interpreter here: only these two shapes are ever produced by a tree builder.

use alloc::vec::Vec;

use bitcoin::blockdata::opcodes::all::{
    OP_CHECKSIGVERIFY, OP_CSV, OP_EQUAL, OP_EQUALVERIFY, OP_PUSHNUM_1,
};
use bitcoin::blockdata::opcodes::Opcode;
use bitcoin::relative::LockTime;
use bitcoin::script::{Builder, Instruction};
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::{Script, Sequence};

use crate::error::ValidationError;

// Elements introspection opcodes (re-purposed OP_SUCCESS slots).
pub const OP_INSPECTINPUTASSET: u8 = 0xc8;
pub const OP_PUSHCURRENTINPUTINDEX: u8 = 0xcd;
pub const OP_INSPECTOUTPUTASSET: u8 = 0xce;
pub const OP_INSPECTOUTPUTVALUE: u8 = 0xcf;
pub const OP_INSPECTOUTPUTSCRIPTPUBKEY: u8 = 0xd1;

/// Output slots a branch leaf may constrain: 0 = left, 1 = right.
const MAX_BRANCH_CLAUSES: u8 = 2;
/// BIP-68 time-based granularity.
const SEQUENCE_GRANULARITY_SECONDS: u32 = 512;
/// CSV accepts script numbers up to 5 bytes.
const MAX_SCRIPTNUM_LEN: usize = 5;

/// Sweep leaf parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepScript {
    pub authority_key: XOnlyPublicKey,
    pub timeout_seconds: u32,
}

/// Branch leaf parameters. A one-child branch leaves the right side empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchScript {
    pub left_key: XOnlyPublicKey,
    pub left_amount: u64,
    pub right_key: Option<XOnlyPublicKey>,
    pub right_amount: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapscriptKind {
    Sweep(SweepScript),
    Branch(BranchScript),
    Other,
}

/// Classifies a leaf script as sweep, branch or neither.
///
/// The first two instructions decide the candidate shape; once a script commits to a
/// shape, any deviation is an error rather than [`TapscriptKind::Other`].
pub fn classify(script: &[u8]) -> Result<TapscriptKind, ValidationError> {
    let (tokens, malformed) = tokenize(script);

    match tokens.as_slice() {
        [Token::Push(key), Token::Op(op), ..]
            if key.len() == 32 && *op == OP_CHECKSIGVERIFY.to_u8() =>
        {
            if malformed {
                return Err(ValidationError::InvalidSweepScript);
            }
            parse_sweep(&tokens).map(TapscriptKind::Sweep)
        }
        [first, Token::Op(op), ..]
            if small_index(first).is_some() && *op == OP_INSPECTOUTPUTASSET =>
        {
            if malformed {
                return Err(ValidationError::InvalidBranchScript);
            }
            parse_branch(&tokens).map(TapscriptKind::Branch)
        }
        _ => Ok(TapscriptKind::Other),
    }
}

impl SweepScript {
    /// Encodes the leaf. `timeout_seconds` must be a whole number of 512-second units
    /// that fits BIP-68's 16-bit field.
    pub fn to_script(&self) -> Result<Vec<u8>, ValidationError> {
        let sequence = sweep_sequence(self.timeout_seconds)?;
        Ok(Builder::new()
            .push_x_only_key(&self.authority_key)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_int(i64::from(sequence.to_consensus_u32()))
            .push_opcode(OP_CSV)
            .into_script()
            .into_bytes())
    }
}

impl BranchScript {
    /// Branch leaf for a single child (left output + fee).
    pub fn single(key: XOnlyPublicKey, amount: u64) -> Self {
        Self {
            left_key: key,
            left_amount: amount,
            right_key: None,
            right_amount: None,
        }
    }

    /// Branch leaf for two children (left + right + fee).
    pub fn pair(left: (XOnlyPublicKey, u64), right: (XOnlyPublicKey, u64)) -> Self {
        Self {
            left_key: left.0,
            left_amount: left.1,
            right_key: Some(right.0),
            right_amount: Some(right.1),
        }
    }

    /// Number of outputs the spending child must have, fee output included.
    pub fn expected_outputs(&self) -> usize {
        if self.right_key.is_some() {
            3
        } else {
            2
        }
    }

    pub fn to_script(&self) -> Vec<u8> {
        let mut clauses = Vec::with_capacity(2);
        clauses.push((self.left_key, self.left_amount));
        if let (Some(key), Some(amount)) = (self.right_key, self.right_amount) {
            clauses.push((key, amount));
        }

        let last = clauses.len() - 1;
        let mut builder = Builder::new();
        for (index, (key, amount)) in clauses.into_iter().enumerate() {
            let slot = index as i64;
            builder = builder
                .push_int(slot)
                .push_opcode(Opcode::from(OP_INSPECTOUTPUTASSET))
                .push_opcode(OP_PUSHNUM_1)
                .push_opcode(OP_EQUALVERIFY)
                .push_opcode(Opcode::from(OP_PUSHCURRENTINPUTINDEX))
                .push_opcode(Opcode::from(OP_INSPECTINPUTASSET))
                .push_opcode(OP_PUSHNUM_1)
                .push_opcode(OP_EQUALVERIFY)
                .push_opcode(OP_EQUALVERIFY)
                .push_int(slot)
                .push_opcode(Opcode::from(OP_INSPECTOUTPUTVALUE))
                .push_opcode(OP_PUSHNUM_1)
                .push_opcode(OP_EQUALVERIFY)
                .push_slice(amount.to_le_bytes())
                .push_opcode(OP_EQUALVERIFY)
                .push_int(slot)
                .push_opcode(Opcode::from(OP_INSPECTOUTPUTSCRIPTPUBKEY))
                .push_opcode(OP_PUSHNUM_1)
                .push_opcode(OP_EQUALVERIFY)
                .push_x_only_key(&key)
                .push_opcode(if index == last { OP_EQUAL } else { OP_EQUALVERIFY });
        }
        builder.into_script().into_bytes()
    }
}

/// BIP-68 time-based sequence for a sweep delay.
pub fn sweep_sequence(timeout_seconds: u32) -> Result<Sequence, ValidationError> {
    if timeout_seconds % SEQUENCE_GRANULARITY_SECONDS != 0 {
        return Err(ValidationError::InvalidSweepTimeout);
    }
    let units = u16::try_from(timeout_seconds / SEQUENCE_GRANULARITY_SECONDS)
        .map_err(|_| ValidationError::InvalidSweepTimeout)?;
    Ok(Sequence::from_512_second_intervals(units))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Push(&'a [u8]),
    Op(u8),
}

/// Splits `script` into tokens, stopping at the first non-minimal or truncated push.
/// The flag reports whether the stream was cut short.
fn tokenize(script: &[u8]) -> (Vec<Token<'_>>, bool) {
    let mut tokens = Vec::new();
    for instruction in Script::from_bytes(script).instructions_minimal() {
        match instruction {
            Ok(Instruction::PushBytes(bytes)) => tokens.push(Token::Push(bytes.as_bytes())),
            Ok(Instruction::Op(op)) => tokens.push(Token::Op(op.to_u8())),
            Err(_) => return (tokens, true),
        }
    }
    (tokens, false)
}

/// Output index encoded as `OP_0` or `OP_1..OP_16`.
fn small_index(token: &Token<'_>) -> Option<u8> {
    match *token {
        Token::Push(bytes) if bytes.is_empty() => Some(0),
        Token::Op(op) if (OP_PUSHNUM_1.to_u8()..=0x60).contains(&op) => {
            Some(op - OP_PUSHNUM_1.to_u8() + 1)
        }
        _ => None,
    }
}

/// Cursor over a token stream that fails with a fixed error on any mismatch.
struct Matcher<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
    err: ValidationError,
}

impl<'t, 'a> Matcher<'t, 'a> {
    fn new(tokens: &'t [Token<'a>], err: ValidationError) -> Self {
        Self {
            tokens,
            pos: 0,
            err,
        }
    }

    fn advance(&mut self) -> Result<Token<'a>, ValidationError> {
        let token = *self.tokens.get(self.pos).ok_or(self.err)?;
        self.pos += 1;
        Ok(token)
    }

    fn op(&mut self, expected: u8) -> Result<(), ValidationError> {
        match self.advance()? {
            Token::Op(op) if op == expected => Ok(()),
            _ => Err(self.err),
        }
    }

    fn ops(&mut self, expected: &[u8]) -> Result<(), ValidationError> {
        expected.iter().try_for_each(|op| self.op(*op))
    }

    fn push(&mut self, len: usize) -> Result<&'a [u8], ValidationError> {
        match self.advance()? {
            Token::Push(bytes) if bytes.len() == len => Ok(bytes),
            _ => Err(self.err),
        }
    }

    fn index(&mut self, expected: u8) -> Result<(), ValidationError> {
        let token = self.advance()?;
        match small_index(&token) {
            Some(i) if i == expected => Ok(()),
            _ => Err(self.err),
        }
    }

    fn x_only_key(&mut self) -> Result<XOnlyPublicKey, ValidationError> {
        let bytes = self.push(32)?;
        XOnlyPublicKey::from_slice(bytes).map_err(|_| self.err)
    }

    fn is_done(&self) -> bool {
        self.pos == self.tokens.len()
    }
}

fn parse_sweep(tokens: &[Token<'_>]) -> Result<SweepScript, ValidationError> {
    let err = ValidationError::InvalidSweepScript;
    let mut m = Matcher::new(tokens, err);

    let authority_key = m.x_only_key()?;
    m.op(OP_CHECKSIGVERIFY.to_u8())?;
    let sequence = match m.advance()? {
        Token::Push(bytes) => read_scriptnum(bytes).ok_or(err)?,
        _ => return Err(err),
    };
    m.op(OP_CSV.to_u8())?;
    if !m.is_done() {
        return Err(err);
    }

    let sequence = u32::try_from(sequence).map_err(|_| err)?;
    let timeout_seconds = match Sequence::from_consensus(sequence).to_relative_lock_time() {
        Some(LockTime::Time(time)) => u32::from(time.value()) * SEQUENCE_GRANULARITY_SECONDS,
        _ => return Err(err),
    };
    // Bits outside the type flag and the 16-bit value must be clear.
    if sweep_sequence(timeout_seconds).map(Sequence::to_consensus_u32) != Ok(sequence) {
        return Err(err);
    }

    Ok(SweepScript {
        authority_key,
        timeout_seconds,
    })
}

fn parse_branch(tokens: &[Token<'_>]) -> Result<BranchScript, ValidationError> {
    let err = ValidationError::InvalidBranchScript;
    let mut m = Matcher::new(tokens, err);
    let mut clauses: Vec<(XOnlyPublicKey, u64)> = Vec::with_capacity(2);

    for slot in 0..MAX_BRANCH_CLAUSES {
        let one = OP_PUSHNUM_1.to_u8();
        let equalverify = OP_EQUALVERIFY.to_u8();

        m.index(slot)?;
        m.ops(&[
            OP_INSPECTOUTPUTASSET,
            one,
            equalverify,
            OP_PUSHCURRENTINPUTINDEX,
            OP_INSPECTINPUTASSET,
            one,
            equalverify,
            equalverify,
        ])?;

        m.index(slot)?;
        m.ops(&[OP_INSPECTOUTPUTVALUE, one, equalverify])?;
        let amount = m.push(8)?;
        m.op(equalverify)?;

        m.index(slot)?;
        m.ops(&[OP_INSPECTOUTPUTSCRIPTPUBKEY, one, equalverify])?;
        let key = m.x_only_key()?;

        let mut le = [0u8; 8];
        le.copy_from_slice(amount);
        clauses.push((key, u64::from_le_bytes(le)));

        match m.advance()? {
            Token::Op(op) if op == OP_EQUAL.to_u8() => break,
            Token::Op(op) if op == equalverify && slot + 1 < MAX_BRANCH_CLAUSES => continue,
            _ => return Err(err),
        }
    }
    if !m.is_done() {
        return Err(err);
    }

    match clauses.as_slice() {
        [left] => Ok(BranchScript::single(left.0, left.1)),
        [left, right] => Ok(BranchScript::pair(*left, *right)),
        _ => Err(err),
    }
}

/// Minimally encoded, non-negative CScriptNum of at most [`MAX_SCRIPTNUM_LEN`] bytes.
fn read_scriptnum(bytes: &[u8]) -> Option<i64> {
    let (last, _) = bytes.split_last()?;
    if bytes.len() > MAX_SCRIPTNUM_LEN {
        return None;
    }
    // Negative numbers never encode a sequence.
    if last & 0x80 != 0 {
        return None;
    }
    // Minimality: a zero top byte is only allowed to carry the sign of the byte below.
    if *last == 0 && (bytes.len() == 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
        return None;
    }
    Some(
        bytes
            .iter()
            .rev()
            .fold(0i64, |acc, b| (acc << 8) | i64::from(*b)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};

    fn key(seed: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).expect("valid secret");
        Keypair::from_secret_key(&secp, &sk).x_only_public_key().0
    }

    #[test]
    fn sweep_script_layout() {
        let sweep = SweepScript {
            authority_key: key(1),
            timeout_seconds: 512 * 2,
        };
        let script = sweep.to_script().expect("encodable timeout");
        assert_eq!(script[0], 0x20);
        assert_eq!(&script[1..33], &key(1).serialize());
        assert_eq!(script[33], OP_CHECKSIGVERIFY.to_u8());
        // 0x00400002 as a 3-byte script number.
        assert_eq!(&script[34..38], &[0x03, 0x02, 0x00, 0x40]);
        assert_eq!(script[38], OP_CSV.to_u8());
        assert_eq!(classify(&script), Ok(TapscriptKind::Sweep(sweep)));
    }

    #[test]
    fn sweep_timeout_must_be_whole_512_second_units() {
        let sweep = SweepScript {
            authority_key: key(1),
            timeout_seconds: 1000,
        };
        assert_eq!(sweep.to_script(), Err(ValidationError::InvalidSweepTimeout));

        let too_long = SweepScript {
            timeout_seconds: 512 * (u16::MAX as u32 + 1),
            ..sweep
        };
        assert_eq!(too_long.to_script(), Err(ValidationError::InvalidSweepTimeout));
    }

    #[test]
    fn block_based_sequence_is_not_a_sweep() {
        let script = Builder::new()
            .push_x_only_key(&key(1))
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_int(144)
            .push_opcode(OP_CSV)
            .into_script()
            .into_bytes();
        assert_eq!(classify(&script), Err(ValidationError::InvalidSweepScript));
    }

    #[test]
    fn sweep_sequence_with_reserved_bits_rejected() {
        let script = |sequence: &[u8]| {
            let mut bytes = Builder::new()
                .push_x_only_key(&key(1))
                .push_opcode(OP_CHECKSIGVERIFY)
                .into_script()
                .into_bytes();
            bytes.push(sequence.len() as u8);
            bytes.extend_from_slice(sequence);
            bytes.push(OP_CSV.to_u8());
            bytes
        };
        let canonical = SweepScript {
            authority_key: key(1),
            timeout_seconds: 1024,
        };
        assert_eq!(
            classify(&script(&[0x02, 0x00, 0x40])),
            Ok(TapscriptKind::Sweep(canonical))
        );
        // 0x00410002: bit 16 set next to the time flag.
        assert_eq!(
            classify(&script(&[0x02, 0x00, 0x41])),
            Err(ValidationError::InvalidSweepScript)
        );
    }

    #[test]
    fn sweep_with_trailing_opcode_rejected() {
        let mut script = SweepScript {
            authority_key: key(1),
            timeout_seconds: 1024,
        }
        .to_script()
        .expect("encodable");
        script.push(OP_EQUAL.to_u8());
        assert_eq!(classify(&script), Err(ValidationError::InvalidSweepScript));
    }

    #[test]
    fn branch_pair_roundtrip() {
        let branch = BranchScript::pair((key(2), 5_000), (key(3), 7_000));
        let script = branch.to_script();
        assert_eq!(classify(&script), Ok(TapscriptKind::Branch(branch)));
        assert_eq!(branch.expected_outputs(), 3);
    }

    #[test]
    fn branch_single_roundtrip() {
        let branch = BranchScript::single(key(2), 1);
        let script = branch.to_script();
        // OP_0 opens the clause, OP_EQUAL closes it.
        assert_eq!(script[0], 0x00);
        assert_eq!(script[1], OP_INSPECTOUTPUTASSET);
        assert_eq!(*script.last().expect("non-empty"), OP_EQUAL.to_u8());
        assert_eq!(classify(&script), Ok(TapscriptKind::Branch(branch)));
        assert_eq!(branch.expected_outputs(), 2);
    }

    #[test]
    fn branch_with_wrong_clause_index_rejected() {
        // Right clause reuses index 0.
        let mut script = BranchScript::single(key(2), 1).to_script();
        let last = script.len() - 1;
        script[last] = OP_EQUALVERIFY.to_u8();
        script.extend(BranchScript::single(key(3), 1).to_script());
        assert_eq!(classify(&script), Err(ValidationError::InvalidBranchScript));
    }

    #[test]
    fn branch_with_open_last_clause_rejected() {
        let mut script = BranchScript::single(key(2), 1).to_script();
        let last = script.len() - 1;
        script[last] = OP_EQUALVERIFY.to_u8();
        assert_eq!(classify(&script), Err(ValidationError::InvalidBranchScript));
    }

    #[test]
    fn branch_with_invalid_key_rejected() {
        let mut script = BranchScript::single(key(2), 1).to_script();
        let key_start = script.len() - 33;
        // x = p is not on the curve.
        script[key_start..key_start + 32].copy_from_slice(&[0xff; 32]);
        assert_eq!(classify(&script), Err(ValidationError::InvalidBranchScript));
    }

    #[test]
    fn truncated_candidate_is_invalid_not_other() {
        let script = BranchScript::single(key(2), 1).to_script();
        let cut = &script[..script.len() - 10];
        assert_eq!(classify(cut), Err(ValidationError::InvalidBranchScript));
    }

    #[test]
    fn unrelated_scripts_are_other() {
        assert_eq!(classify(&[]), Ok(TapscriptKind::Other));
        assert_eq!(classify(&[0x51, 0x87]), Ok(TapscriptKind::Other));
        let checksig = Builder::new()
            .push_x_only_key(&key(1))
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_CHECKSIG)
            .into_script()
            .into_bytes();
        assert_eq!(classify(&checksig), Ok(TapscriptKind::Other));
    }

    #[test]
    fn scriptnum_minimality() {
        assert_eq!(read_scriptnum(&[0x02, 0x00, 0x40]), Some(0x0040_0002));
        assert_eq!(read_scriptnum(&[0x02, 0x00, 0x40, 0x00]), None);
        assert_eq!(read_scriptnum(&[0xff, 0x00]), Some(0xff));
        assert_eq!(read_scriptnum(&[0x81]), None);
        assert_eq!(read_scriptnum(&[]), None);
    }
}
