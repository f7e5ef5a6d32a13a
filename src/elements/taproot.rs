//! Elements taproot commitments (BIP-341 structure, Elements tagged hashes).
//!
//! Elements domain-separates every taproot hash: `TapLeaf/elements`, `TapBranch/elements` and
//! `TapTweak/elements` replace the Bitcoin tags, and tapscript leaves use version `0xc4`.
//! The output-key tweak itself is plain secp256k1 x-only point tweaking.

use alloc::vec::Vec;

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{self, Parity, Scalar, Secp256k1, Verification, XOnlyPublicKey};

use crate::compact_size::write_compact_size;
use crate::elements::pset::PSBT_IN_TAP_LEAF_SCRIPT;
use crate::error::DecodeError;

/// Elements tapscript leaf version.
pub const TAPROOT_LEAF_TAPSCRIPT: u8 = 0xc4;
const TAPROOT_LEAF_MASK: u8 = 0xfe;
const TAPROOT_CONTROL_BASE_SIZE: usize = 33;
const TAPROOT_CONTROL_NODE_SIZE: usize = 32;
const TAPROOT_CONTROL_MAX_NODE_COUNT: usize = 128;

const TAP_LEAF_TAG: &[u8] = b"TapLeaf/elements";
const TAP_BRANCH_TAG: &[u8] = b"TapBranch/elements";
const TAP_TWEAK_TAG: &[u8] = b"TapTweak/elements";

/// A leaf, branch, or root hash of a taproot script tree.
pub type TapNodeHash = [u8; 32];

/// Decoded taproot control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    pub leaf_version: u8,
    pub output_key_parity: Parity,
    pub internal_key: XOnlyPublicKey,
    /// Sibling hashes from the leaf up to the root.
    pub merkle_branch: Vec<TapNodeHash>,
}

impl ControlBlock {
    /// Parses `[leaf_version | parity] || internal_key(32) || path(32 * m)`, m <= 128.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let invalid = DecodeError::InvalidField(PSBT_IN_TAP_LEAF_SCRIPT);
        if bytes.len() < TAPROOT_CONTROL_BASE_SIZE
            || (bytes.len() - TAPROOT_CONTROL_BASE_SIZE) % TAPROOT_CONTROL_NODE_SIZE != 0
        {
            return Err(invalid);
        }
        let node_count = (bytes.len() - TAPROOT_CONTROL_BASE_SIZE) / TAPROOT_CONTROL_NODE_SIZE;
        if node_count > TAPROOT_CONTROL_MAX_NODE_COUNT {
            return Err(invalid);
        }

        let leaf_version = bytes[0] & TAPROOT_LEAF_MASK;
        let output_key_parity = if bytes[0] & 1 == 1 {
            Parity::Odd
        } else {
            Parity::Even
        };
        let internal_key = XOnlyPublicKey::from_slice(&bytes[1..TAPROOT_CONTROL_BASE_SIZE])
            .map_err(|_| invalid)?;
        let merkle_branch = bytes[TAPROOT_CONTROL_BASE_SIZE..]
            .chunks_exact(TAPROOT_CONTROL_NODE_SIZE)
            .map(|chunk| {
                let mut node = [0u8; 32];
                node.copy_from_slice(chunk);
                node
            })
            .collect();

        Ok(Self {
            leaf_version,
            output_key_parity,
            internal_key,
            merkle_branch,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            TAPROOT_CONTROL_BASE_SIZE + TAPROOT_CONTROL_NODE_SIZE * self.merkle_branch.len(),
        );
        let parity_bit = match self.output_key_parity {
            Parity::Even => 0,
            Parity::Odd => 1,
        };
        out.push(self.leaf_version | parity_bit);
        out.extend_from_slice(&self.internal_key.serialize());
        for node in &self.merkle_branch {
            out.extend_from_slice(node);
        }
        out
    }
}

/// Tagged hash: SHA256(SHA256(tag) || SHA256(tag) || data...).
fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let tag_hash = sha256::Hash::hash(tag).to_byte_array();
    let mut engine = sha256::Hash::engine();
    engine.input(&tag_hash);
    engine.input(&tag_hash);
    for part in parts {
        engine.input(part);
    }
    sha256::Hash::from_engine(engine).to_byte_array()
}

/// Leaf hash of `script` under `leaf_version`.
pub fn leaf_hash(leaf_version: u8, script: &[u8]) -> TapNodeHash {
    let mut prefix = Vec::with_capacity(10);
    prefix.push(leaf_version & TAPROOT_LEAF_MASK);
    write_compact_size(&mut prefix, script.len() as u64);
    tagged_hash(TAP_LEAF_TAG, &[prefix.as_slice(), script])
}

/// Branch hash of two children, lexicographically ordered.
pub fn branch_hash(a: &TapNodeHash, b: &TapNodeHash) -> TapNodeHash {
    if a <= b {
        tagged_hash(TAP_BRANCH_TAG, &[&a[..], &b[..]])
    } else {
        tagged_hash(TAP_BRANCH_TAG, &[&b[..], &a[..]])
    }
}

/// Recomputes the script-tree root implied by `control_block` for `leaf_script`.
pub fn script_tree_root(control_block: &ControlBlock, leaf_script: &[u8]) -> TapNodeHash {
    control_block.merkle_branch.iter().fold(
        leaf_hash(control_block.leaf_version, leaf_script),
        |node, sibling| branch_hash(&node, sibling),
    )
}

/// Tweaks `internal_key` by the script-tree `root`: `P + H_TapTweak(P || root) * G`.
pub fn taproot_output_key<C: Verification>(
    secp: &Secp256k1<C>,
    internal_key: &XOnlyPublicKey,
    root: &TapNodeHash,
) -> Result<(XOnlyPublicKey, Parity), secp256k1::Error> {
    let tweak = tagged_hash(TAP_TWEAK_TAG, &[&internal_key.serialize()[..], &root[..]]);
    let scalar = Scalar::from_be_bytes(tweak).map_err(|_| secp256k1::Error::InvalidTweak)?;
    internal_key.add_tweak(secp, &scalar)
}
