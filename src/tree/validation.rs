//! Congestion tree validation.
//!
//! Checks that a tree is a well-formed decomposition of the funding transaction's shared
//! output: one root spending that output, every node a one-input PSET with a fee output,
//! every child committed to by its parent output through a NUMS-keyed taproot tree holding
//! exactly a sweep leaf and a branch leaf, and value and asset conserved at every step.
//!
//! Validation is sequential and fail-fast: the first violated check is returned.

use alloc::string::ToString;
use alloc::vec::Vec;
use core::str::FromStr;

use bitcoin::secp256k1::{PublicKey, Secp256k1, VerifyOnly, XOnlyPublicKey};
use bitcoin::Txid;
use tracing::{debug, trace};

use crate::elements::pset::{Pset, PsetOutput};
use crate::elements::taproot::{script_tree_root, taproot_output_key, ControlBlock};
use crate::elements::transaction::{witness_program_v1, AssetId, Transaction};
use crate::error::{DecodeError, ValidationError};
use crate::script::{classify, BranchScript, SweepScript, TapscriptKind};
use crate::tree::{CongestionTree, Node, TreeIndex};

/// Compressed NUMS point used as the internal key of every node output, so only the
/// committed script paths can spend.
pub const UNSPENDABLE_POINT: &str =
    "0250929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

/// Funding transaction output capitalizing the tree.
pub const SHARED_OUTPUT_INDEX: u32 = 0;

/// Protocol parameters a tree is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationParams {
    /// Internal key every control block must carry.
    pub unspendable_key: XOnlyPublicKey,
    /// Key the sweep leaf must pay to.
    pub authority_key: XOnlyPublicKey,
    /// Relative timeout the sweep leaf must enforce.
    pub sweep_timeout_seconds: u32,
}

impl ValidationParams {
    /// Parameters using [`UNSPENDABLE_POINT`] as the internal key.
    pub fn new(authority_key: impl Into<XOnlyPublicKey>, sweep_timeout_seconds: u32) -> Self {
        Self {
            unspendable_key: unspendable_key(),
            authority_key: authority_key.into(),
            sweep_timeout_seconds,
        }
    }

    pub fn with_unspendable_key(mut self, key: impl Into<XOnlyPublicKey>) -> Self {
        self.unspendable_key = key.into();
        self
    }
}

/// [`UNSPENDABLE_POINT`] as an x-only key.
pub fn unspendable_key() -> XOnlyPublicKey {
    PublicKey::from_str(UNSPENDABLE_POINT)
        .expect("UNSPENDABLE_POINT is a valid compressed point")
        .x_only_public_key()
        .0
}

/// Validates `tree` against the funding transaction `funding_tx_hex`.
pub fn validate_congestion_tree(
    tree: &CongestionTree,
    funding_tx_hex: &str,
    params: &ValidationParams,
) -> Result<(), ValidationError> {
    TreeValidator::new(*params).validate(tree, funding_tx_hex)
}

/// Reusable validator: parameters plus a verification-only secp256k1 context.
pub struct TreeValidator {
    params: ValidationParams,
    secp: Secp256k1<VerifyOnly>,
}

impl TreeValidator {
    pub fn new(params: ValidationParams) -> Self {
        Self {
            params,
            secp: Secp256k1::verification_only(),
        }
    }

    pub fn params(&self) -> &ValidationParams {
        &self.params
    }

    pub fn validate(
        &self,
        tree: &CongestionTree,
        funding_tx_hex: &str,
    ) -> Result<(), ValidationError> {
        match self.validate_tree(tree, funding_tx_hex) {
            Ok(()) => {
                debug!(nodes = tree.node_count(), "congestion tree accepted");
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "congestion tree rejected");
                Err(err)
            }
        }
    }

    fn validate_tree(
        &self,
        tree: &CongestionTree,
        funding_tx_hex: &str,
    ) -> Result<(), ValidationError> {
        let funding = Transaction::from_hex(funding_tx_hex)
            .map_err(ValidationError::InvalidFundingTransaction)?;
        let shared_output = funding
            .output
            .get(SHARED_OUTPUT_INDEX as usize)
            .ok_or(ValidationError::InvalidFundingTransaction(
                DecodeError::MissingOutput(SHARED_OUTPUT_INDEX),
            ))?;
        let shared_value = shared_output
            .explicit_value()
            .ok_or(ValidationError::InvalidFundingTransaction(DecodeError::NotExplicit))?;
        let funding_txid = funding.txid();

        if tree.node_count() == 0 {
            return Err(ValidationError::EmptyTree);
        }
        let root = match tree.levels().first().map(Vec::as_slice) {
            Some([root]) => root,
            Some(level) => return Err(ValidationError::InvalidRootLevel(level.len())),
            None => return Err(ValidationError::EmptyTree),
        };

        let index = TreeIndex::new(tree);
        if index.leaves().is_empty() {
            return Err(ValidationError::NoLeaves);
        }

        self.validate_root(root, &funding_txid, shared_value)?;

        for (level, nodes) in tree.levels().iter().enumerate() {
            for node in nodes {
                trace!(level, txid = %node.txid, "validating node");
                self.validate_node(node, &index).map_err(|err| {
                    debug!(level, txid = %node.txid, error = %err, "node rejected");
                    err
                })?;
            }
        }
        Ok(())
    }

    fn validate_root(
        &self,
        root: &Node,
        funding_txid: &Txid,
        shared_value: u64,
    ) -> Result<(), ValidationError> {
        let pset = Pset::from_str(&root.tx).map_err(ValidationError::InvalidRootTransaction)?;
        let input = match pset.inputs.as_slice() {
            [input] => input,
            inputs => return Err(ValidationError::WrongInputCount(inputs.len())),
        };
        if input.previous_txid != *funding_txid
            || input.previous_output_index != SHARED_OUTPUT_INDEX
        {
            return Err(ValidationError::WrongFundingReference);
        }
        if sum_amounts(&pset.outputs) != Some(shared_value) {
            return Err(ValidationError::AmountMismatch);
        }
        Ok(())
    }

    fn validate_node(&self, node: &Node, index: &TreeIndex<'_>) -> Result<(), ValidationError> {
        if node.tx.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }
        if node.txid.is_empty() {
            return Err(ValidationError::EmptyTxid);
        }
        if node.parent_txid.is_empty() {
            return Err(ValidationError::EmptyParentTxid);
        }

        let pset = Pset::from_str(&node.tx).map_err(ValidationError::InvalidNodeTransaction)?;
        let txid = pset.txid().map_err(ValidationError::InvalidNodeTransaction)?;
        if !same_txid(&node.txid, &txid) {
            return Err(ValidationError::TxidMismatch);
        }

        let input = match pset.inputs.as_slice() {
            [input] => input,
            inputs => return Err(ValidationError::WrongInputCount(inputs.len())),
        };
        if !same_txid(&node.parent_txid, &input.previous_txid) {
            return Err(ValidationError::WrongParentReference);
        }
        if input.tap_leaf_scripts.len() != 2 {
            return Err(ValidationError::WrongTapscriptCount(input.tap_leaf_scripts.len()));
        }
        match pset.outputs.last() {
            Some(fee) if fee.script_pubkey.is_empty() => {}
            _ => return Err(ValidationError::MissingFeeOutput),
        }

        let children = index.children(&node.txid);
        if node.leaf && children.len() > 1 {
            return Err(ValidationError::LeafHasChildren(children.len()));
        }
        for (slot, child) in children.into_iter().enumerate() {
            trace!(parent = %node.txid, child = %child.txid, slot, "validating child");
            self.validate_child(&pset, slot, child)?;
        }
        Ok(())
    }

    /// Checks that `child` spends parent output `slot` through a committed sweep/branch pair
    /// and conserves its value and asset.
    fn validate_child(
        &self,
        parent: &Pset,
        slot: usize,
        child: &Node,
    ) -> Result<(), ValidationError> {
        let parent_output = parent
            .outputs
            .get(slot)
            .ok_or(ValidationError::InvalidTaprootScript)?;
        let parent_key = witness_program_v1(&parent_output.script_pubkey)
            .ok_or(ValidationError::InvalidTaprootScript)?;

        let child_pset =
            Pset::from_str(&child.tx).map_err(ValidationError::InvalidChildTransaction)?;
        let input = child_pset
            .inputs
            .first()
            .ok_or(ValidationError::WrongInputCount(0))?;

        let mut sweep_found = false;
        let mut branch_found = false;
        for leaf in &input.tap_leaf_scripts {
            let control_block = ControlBlock::decode(&leaf.control_block)
                .map_err(ValidationError::InvalidChildTransaction)?;
            if control_block.internal_key != self.params.unspendable_key {
                return Err(ValidationError::InternalKeyMismatch);
            }

            let root = script_tree_root(&control_block, &leaf.script);
            let (output_key, _) = taproot_output_key(&self.secp, &control_block.internal_key, &root)
                .map_err(|_| ValidationError::InvalidTaprootScript)?;
            if output_key.serialize() != parent_key {
                return Err(ValidationError::InvalidTaprootScript);
            }

            match classify(&leaf.script)? {
                TapscriptKind::Sweep(sweep) => {
                    self.check_sweep(&sweep)?;
                    sweep_found = true;
                }
                TapscriptKind::Branch(branch) => {
                    check_branch(&branch, &child_pset.outputs)?;
                    branch_found = true;
                }
                TapscriptKind::Other => {}
            }
        }
        if !sweep_found {
            return Err(ValidationError::MissingSweepScript);
        }
        if !branch_found {
            return Err(ValidationError::MissingBranchScript);
        }

        let parent_asset = asset_tag(parent_output);
        if child_pset
            .outputs
            .iter()
            .any(|output| asset_tag(output) != parent_asset)
        {
            return Err(ValidationError::AssetMismatch);
        }
        match (sum_amounts(&child_pset.outputs), parent_output.amount) {
            (Some(sum), Some(spent)) if sum == spent => Ok(()),
            _ => Err(ValidationError::AmountMismatch),
        }
    }

    fn check_sweep(&self, sweep: &SweepScript) -> Result<(), ValidationError> {
        if sweep.authority_key != self.params.authority_key {
            return Err(ValidationError::InvalidAuthorityKey);
        }
        if sweep.timeout_seconds != self.params.sweep_timeout_seconds {
            return Err(ValidationError::InvalidSweepTimeout);
        }
        Ok(())
    }
}

fn check_branch(branch: &BranchScript, outputs: &[PsetOutput]) -> Result<(), ValidationError> {
    let expected = branch.expected_outputs();
    if outputs.len() != expected {
        return Err(ValidationError::WrongOutputCount {
            expected,
            found: outputs.len(),
        });
    }

    if !pays(&outputs[0], &branch.left_key, branch.left_amount) {
        return Err(ValidationError::InvalidLeftOutput);
    }
    if let (Some(key), Some(amount)) = (branch.right_key, branch.right_amount) {
        if !pays(&outputs[1], &key, amount) {
            return Err(ValidationError::InvalidRightOutput);
        }
    }
    Ok(())
}

/// Output is an explicit `amount` to the taproot key `key`.
fn pays(output: &PsetOutput, key: &XOnlyPublicKey, amount: u64) -> bool {
    witness_program_v1(&output.script_pubkey) == Some(key.serialize())
        && output.amount == Some(amount)
}

/// Explicit tag or commitment, whichever the output carries.
fn asset_tag(output: &PsetOutput) -> (Option<AssetId>, Option<[u8; 33]>) {
    (output.asset, output.asset_commitment)
}

/// Sum of explicit amounts; `None` on a blinded amount or overflow.
fn sum_amounts(outputs: &[PsetOutput]) -> Option<u64> {
    outputs
        .iter()
        .try_fold(0u64, |acc, output| acc.checked_add(output.amount?))
}

/// Txid strings must equal the canonical display form (lowercase, display order); tree
/// linkage is keyed by these strings.
fn same_txid(display: &str, txid: &Txid) -> bool {
    display == txid.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::pset::PsetInput;
    use alloc::vec;
    use bitcoin::hashes::Hash;
    use bitcoin::OutPoint;

    #[test]
    fn unspendable_key_parses() {
        let key = unspendable_key();
        assert_eq!(
            hex::encode(key.serialize()),
            "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0"
        );
    }

    #[test]
    fn sum_amounts_rejects_blinded_and_overflow() {
        let asset = [1u8; 32];
        let a = PsetOutput::explicit(u64::MAX, asset, vec![]);
        let b = PsetOutput::explicit(1, asset, vec![]);
        assert_eq!(sum_amounts(&[b.clone(), b.clone()]), Some(2));
        assert_eq!(sum_amounts(&[a, b.clone()]), None);

        let mut blinded = b;
        blinded.amount = None;
        blinded.value_commitment = Some([0x08; 33]);
        assert_eq!(sum_amounts(&[blinded]), None);
    }

    #[test]
    fn same_txid_uses_display_order() {
        let txid = Txid::from_byte_array([0xab; 32]);
        assert!(same_txid(&alloc::format!("{}", txid), &txid));
        assert!(!same_txid(&alloc::format!("{}", txid).to_uppercase(), &txid));
        assert!(!same_txid("not-a-txid", &txid));
        assert!(!same_txid("", &txid));
    }

    #[test]
    fn funding_shared_output_must_exist() {
        let funding = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![],
            output: vec![],
        };
        let params = ValidationParams::new(unspendable_key(), 512);
        let hex = hex::encode(funding.serialize(false));
        assert_eq!(
            validate_congestion_tree(&CongestionTree::default(), &hex, &params),
            Err(ValidationError::InvalidFundingTransaction(DecodeError::MissingOutput(0)))
        );
    }

    #[test]
    fn branch_output_count_checked_before_outputs() {
        let key = unspendable_key();
        let branch = BranchScript::single(key, 10);
        let outputs = vec![PsetOutput::explicit(10, [0u8; 32], vec![])];
        assert_eq!(
            check_branch(&branch, &outputs),
            Err(ValidationError::WrongOutputCount {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn root_must_spend_shared_output() {
        let validator = TreeValidator::new(ValidationParams::new(unspendable_key(), 512));
        let funding_txid = Txid::from_byte_array([7u8; 32]);
        let pset = Pset {
            tx_version: 2,
            fallback_locktime: None,
            inputs: vec![PsetInput::new(OutPoint::new(funding_txid, 1))],
            outputs: vec![PsetOutput::explicit(100, [0u8; 32], vec![])],
            unknown: vec![],
        };
        let root = Node {
            txid: alloc::string::String::from("unused"),
            parent_txid: alloc::format!("{}", funding_txid),
            tx: pset.to_base64(),
            leaf: true,
        };
        assert_eq!(
            validator.validate_root(&root, &funding_txid, 100),
            Err(ValidationError::WrongFundingReference)
        );
    }
}
