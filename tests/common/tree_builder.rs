//! Builds valid congestion trees with real keys, real Elements taproot commitments and real
//! PSET encodings.
//!
//! Two phases: a [`PlanNode`] tree states every output amount explicitly (so tests can skew
//! one amount without touching the rest), then [`Fixture::realize`] commits bottom-up and
//! assigns txids top-down.

#![allow(dead_code)]

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Keypair, Parity, Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::{OutPoint, Txid};

use congestion_tree::elements::pset::{Pset, PsetInput, PsetOutput, TapLeafScript};
use congestion_tree::elements::taproot::{
    branch_hash, leaf_hash, taproot_output_key, ControlBlock, TAPROOT_LEAF_TAPSCRIPT,
};
use congestion_tree::elements::transaction::{
    p2tr_script, Asset, AssetId, Nonce, Transaction, TxIn, TxInWitness, TxOut, TxOutWitness,
    Value,
};
use congestion_tree::{
    unspendable_key, BranchScript, CongestionTree, Node, SweepScript, ValidationParams,
};

/// Liquid policy asset tag (any 32 bytes do for validation).
pub const ASSET: AssetId = [0x6f; 32];
pub const SWEEP_TIMEOUT_SECONDS: u32 = 512 * 2 * 24 * 7;

pub fn keypair(seed: u8) -> Keypair {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[seed; 32]).expect("seed is a valid secret key");
    Keypair::from_secret_key(&secp, &sk)
}

pub fn key(seed: u8) -> XOnlyPublicKey {
    keypair(seed).x_only_public_key().0
}

#[derive(Debug, Clone)]
pub enum PlanOutput {
    /// Terminal payout to a user key.
    Receiver { key: XOnlyPublicKey, amount: u64 },
    /// Output spent by a child node.
    Child { node: Box<PlanNode>, amount: u64 },
}

impl PlanOutput {
    pub fn amount(&self) -> u64 {
        match self {
            Self::Receiver { amount, .. } | Self::Child { amount, .. } => *amount,
        }
    }

    pub fn amount_mut(&mut self) -> &mut u64 {
        match self {
            Self::Receiver { amount, .. } | Self::Child { amount, .. } => amount,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanNode {
    /// One or two outputs; the fee output is appended on realization.
    pub outputs: Vec<PlanOutput>,
    pub fee: u64,
}

impl PlanNode {
    /// Balanced binary tree over `receivers`. The larger half goes left so child nodes
    /// always occupy the leading output slots.
    pub fn balanced(receivers: &[(XOnlyPublicKey, u64)]) -> Self {
        assert!(!receivers.is_empty(), "at least one receiver");
        let outputs = if receivers.len() <= 2 {
            receivers
                .iter()
                .map(|&(key, amount)| PlanOutput::Receiver { key, amount })
                .collect()
        } else {
            let (left, right) = receivers.split_at((receivers.len() + 1) / 2);
            vec![Self::half(left), Self::half(right)]
        };
        Self { outputs, fee: 0 }
    }

    fn half(receivers: &[(XOnlyPublicKey, u64)]) -> PlanOutput {
        match receivers {
            [(key, amount)] => PlanOutput::Receiver {
                key: *key,
                amount: *amount,
            },
            _ => {
                let node = Self::balanced(receivers);
                PlanOutput::Child {
                    amount: node.total(),
                    node: Box::new(node),
                }
            }
        }
    }

    /// A node with a single output spent by `child`.
    pub fn chain(child: PlanNode) -> Self {
        Self {
            outputs: vec![PlanOutput::Child {
                amount: child.total(),
                node: Box::new(child),
            }],
            fee: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.outputs.iter().map(PlanOutput::amount).sum::<u64>() + self.fee
    }

    /// No output is spent by a child node.
    pub fn is_leaf(&self) -> bool {
        self.outputs
            .iter()
            .all(|o| matches!(o, PlanOutput::Receiver { .. }))
    }

    /// Child plan at `slot`, if that output is spent by a node.
    pub fn child_mut(&mut self, slot: usize) -> Option<&mut PlanNode> {
        match self.outputs.get_mut(slot) {
            Some(PlanOutput::Child { node, .. }) => Some(node),
            _ => None,
        }
    }
}

/// Bottom-up commitment of a plan node.
struct Committed {
    output_key: XOnlyPublicKey,
    leaves: Vec<TapLeafScript>,
    outputs: Vec<PsetOutput>,
    children: Vec<(usize, Committed)>,
    leaf: bool,
}

/// A realized tree plus everything needed to validate it.
pub struct Fixture {
    pub secp: Secp256k1<All>,
    pub authority: XOnlyPublicKey,
    pub sweep_timeout_seconds: u32,
    pub funding: Transaction,
    pub funding_hex: String,
    pub tree: CongestionTree,
}

impl Fixture {
    /// Balanced tree paying `amounts` to distinct keys.
    pub fn with_amounts(amounts: &[u64]) -> Self {
        let receivers: Vec<(XOnlyPublicKey, u64)> = amounts
            .iter()
            .enumerate()
            .map(|(i, &amount)| (key(10 + i as u8), amount))
            .collect();
        Self::realize(&PlanNode::balanced(&receivers))
    }

    pub fn realize(plan: &PlanNode) -> Self {
        let secp = Secp256k1::new();
        let authority = key(1);
        let committed = commit(&secp, &authority, SWEEP_TIMEOUT_SECONDS, plan);

        let funding = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([0x11; 32]), 0),
                is_pegin: false,
                script_sig: vec![],
                sequence: u32::MAX,
                asset_issuance: None,
                witness: TxInWitness::default(),
            }],
            output: vec![TxOut {
                asset: Asset::Explicit(ASSET),
                value: Value::Explicit(plan.total()),
                nonce: Nonce::Null,
                script_pubkey: p2tr_script(&committed.output_key.serialize()),
                witness: TxOutWitness::default(),
            }],
        };

        let mut levels: Vec<Vec<Node>> = Vec::new();
        emit(&committed, OutPoint::new(funding.txid(), 0), 0, &mut levels);

        Self {
            secp,
            authority,
            sweep_timeout_seconds: SWEEP_TIMEOUT_SECONDS,
            funding_hex: hex::encode(funding.serialize(true)),
            funding,
            tree: CongestionTree::new(levels),
        }
    }

    pub fn params(&self) -> ValidationParams {
        ValidationParams::new(self.authority, self.sweep_timeout_seconds)
    }

    pub fn node(&self, level: usize, i: usize) -> &Node {
        &self.tree.0[level][i]
    }

    pub fn node_mut(&mut self, level: usize, i: usize) -> &mut Node {
        &mut self.tree.0[level][i]
    }
}

fn commit(
    secp: &Secp256k1<All>,
    authority: &XOnlyPublicKey,
    timeout_seconds: u32,
    plan: &PlanNode,
) -> Committed {
    let mut outputs = Vec::with_capacity(plan.outputs.len() + 1);
    let mut children = Vec::new();
    let mut paid: Vec<(XOnlyPublicKey, u64)> = Vec::with_capacity(2);

    for (slot, output) in plan.outputs.iter().enumerate() {
        let (key, amount) = match output {
            PlanOutput::Receiver { key, amount } => (*key, *amount),
            PlanOutput::Child { node, amount } => {
                let child = commit(secp, authority, timeout_seconds, node);
                let key = child.output_key;
                children.push((slot, child));
                (key, *amount)
            }
        };
        outputs.push(PsetOutput::explicit(amount, ASSET, p2tr_script(&key.serialize())));
        paid.push((key, amount));
    }
    outputs.push(PsetOutput::explicit(plan.fee, ASSET, vec![]));

    let branch = match paid.as_slice() {
        [left] => BranchScript::single(left.0, left.1),
        [left, right] => BranchScript::pair(*left, *right),
        _ => panic!("plan nodes have one or two outputs"),
    };
    let sweep = SweepScript {
        authority_key: *authority,
        timeout_seconds,
    };

    let sweep_script = sweep.to_script().expect("fixture timeout is encodable");
    let branch_script = branch.to_script();
    let (output_key, parity) = commitment(secp, &sweep_script, &branch_script);

    let leaves = vec![
        tap_leaf(parity, &sweep_script, &branch_script),
        tap_leaf(parity, &branch_script, &sweep_script),
    ];

    Committed {
        output_key,
        leaves,
        outputs,
        children,
        leaf: plan.is_leaf(),
    }
}

/// Output key committing to the two-leaf tree {a, b} under the NUMS internal key.
pub fn commitment(secp: &Secp256k1<All>, a: &[u8], b: &[u8]) -> (XOnlyPublicKey, Parity) {
    let root = branch_hash(
        &leaf_hash(TAPROOT_LEAF_TAPSCRIPT, a),
        &leaf_hash(TAPROOT_LEAF_TAPSCRIPT, b),
    );
    taproot_output_key(secp, &unspendable_key(), &root).expect("tweak")
}

/// Leaf `script` with a control block proving it against sibling `other`.
pub fn tap_leaf(parity: Parity, script: &[u8], other: &[u8]) -> TapLeafScript {
    let control_block = ControlBlock {
        leaf_version: TAPROOT_LEAF_TAPSCRIPT,
        output_key_parity: parity,
        internal_key: unspendable_key(),
        merkle_branch: vec![leaf_hash(TAPROOT_LEAF_TAPSCRIPT, other)],
    };
    TapLeafScript {
        control_block: control_block.encode(),
        script: script.to_vec(),
        leaf_version: TAPROOT_LEAF_TAPSCRIPT,
    }
}

fn emit(node: &Committed, prevout: OutPoint, depth: usize, levels: &mut Vec<Vec<Node>>) {
    let mut input = PsetInput::new(prevout);
    input.tap_leaf_scripts = node.leaves.clone();
    let pset = Pset {
        tx_version: 2,
        fallback_locktime: None,
        inputs: vec![input],
        outputs: node.outputs.clone(),
        unknown: vec![],
    };
    let txid = pset.txid().expect("fixture PSET is complete");

    if levels.len() <= depth {
        levels.push(Vec::new());
    }
    levels[depth].push(Node {
        txid: txid.to_string(),
        parent_txid: prevout.txid.to_string(),
        tx: pset.to_base64(),
        leaf: node.leaf,
    });

    for (slot, child) in &node.children {
        emit(child, OutPoint::new(txid, *slot as u32), depth + 1, levels);
    }
}

/// Decodes a node's PSET, applies `f`, and stores it back (base64). The stored txid is left
/// as is; call [`refresh_txid`] to make it match again.
pub fn edit_pset(node: &mut Node, f: impl FnOnce(&mut Pset)) {
    let mut pset: Pset = node.tx.parse().expect("fixture PSET decodes");
    f(&mut pset);
    node.tx = pset.to_base64();
}

pub fn refresh_txid(node: &mut Node) {
    let pset: Pset = node.tx.parse().expect("fixture PSET decodes");
    node.txid = pset.txid().expect("txid").to_string();
}

/// Re-commits root output `slot` to the leaf pair {`sweep`, `branch`} and relinks every
/// level-1 node to the new root txid. Level-1 nodes must be leaves.
pub fn recommit_root_child(f: &mut Fixture, slot: usize, sweep: &[u8], branch: &[u8]) {
    let (output_key, parity) = commitment(&f.secp, sweep, branch);
    let root = f.node_mut(0, 0);
    edit_pset(root, |p| {
        p.outputs[slot].script_pubkey = p2tr_script(&output_key.serialize());
    });
    refresh_txid(root);
    let root_txid: Txid = root.txid.parse().expect("root txid");

    for node in f.tree.0[1].iter_mut() {
        edit_pset(node, |p| {
            let input = &mut p.inputs[0];
            input.previous_txid = root_txid;
            if input.previous_output_index as usize == slot {
                input.tap_leaf_scripts = vec![
                    tap_leaf(parity, sweep, branch),
                    tap_leaf(parity, branch, sweep),
                ];
            }
        });
        node.parent_txid = root_txid.to_string();
        refresh_txid(node);
    }
}

/// Leaf scripts `(sweep, branch)` committed in a node's input.
pub fn leaf_scripts(node: &Node) -> (Vec<u8>, Vec<u8>) {
    let pset: Pset = node.tx.parse().expect("fixture PSET decodes");
    let leaves = &pset.inputs[0].tap_leaf_scripts;
    (leaves[0].script.clone(), leaves[1].script.clone())
}

/// Re-encodes every node's PSET as hex instead of base64.
pub fn to_hex_encoding(tree: &mut CongestionTree) {
    for node in tree.0.iter_mut().flatten() {
        let pset: Pset = node.tx.parse().expect("fixture PSET decodes");
        node.tx = hex::encode(pset.encode());
    }
}
