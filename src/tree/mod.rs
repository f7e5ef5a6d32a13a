//! Congestion tree model.
//!
//! A tree is a list of levels; level 0 holds the root, which spends the funding
//! transaction's shared output. Parent/child linkage is by `parent_txid`, and a node's
//! position among its siblings selects the parent output it spends (0 = left, 1 = right).

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use borsh::{BorshDeserialize, BorshSerialize};

pub mod validation;

pub use validation::{validate_congestion_tree, TreeValidator, ValidationParams};

/// One transaction of the tree.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(
    feature = "export-json",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Node {
    /// Display-order txid of the node's unsigned transaction.
    pub txid: String,
    pub parent_txid: String,
    /// PSET, base64 or hex.
    pub tx: String,
    /// Terminal node: no further branching.
    pub leaf: bool,
}

/// Levels of nodes, root level first.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(
    feature = "export-json",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct CongestionTree(pub Vec<Vec<Node>>);

impl CongestionTree {
    pub fn new(levels: Vec<Vec<Node>>) -> Self {
        Self(levels)
    }

    pub fn levels(&self) -> &[Vec<Node>] {
        &self.0
    }

    pub fn node_count(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// The single node of level 0, if the tree has exactly one there.
    pub fn root(&self) -> Option<&Node> {
        match self.0.first().map(Vec::as_slice) {
            Some([root]) => Some(root),
            _ => None,
        }
    }

    /// Every node, level-major.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.0.iter().flatten()
    }

    /// Nodes spending from `txid`, in tree order. Builds a [`TreeIndex`]; prefer the
    /// index directly for repeated lookups.
    pub fn children(&self, txid: &str) -> Vec<&Node> {
        TreeIndex::new(self).children(txid)
    }

    /// Childless nodes, regardless of their `leaf` flag.
    pub fn leaves(&self) -> Vec<&Node> {
        TreeIndex::new(self).leaves()
    }

    /// Parses the JSON form: an array of levels of `{txid, parentTxid, tx, leaf}`.
    #[cfg(feature = "export-json")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[cfg(feature = "export-json")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Vec<Vec<Node>>> for CongestionTree {
    fn from(levels: Vec<Vec<Node>>) -> Self {
        Self(levels)
    }
}

/// Arena view of a tree: nodes in level-major order plus a `parent_txid` lookup.
#[derive(Debug)]
pub struct TreeIndex<'a> {
    nodes: Vec<&'a Node>,
    by_parent: BTreeMap<&'a str, Vec<usize>>,
}

impl<'a> TreeIndex<'a> {
    pub fn new(tree: &'a CongestionTree) -> Self {
        let nodes: Vec<&Node> = tree.nodes().collect();
        let mut by_parent: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            by_parent.entry(node.parent_txid.as_str()).or_default().push(i);
        }
        Self { nodes, by_parent }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, txid: &str) -> Vec<&'a Node> {
        self.by_parent
            .get(txid)
            .map(|ids| ids.iter().map(|&i| self.nodes[i]).collect())
            .unwrap_or_default()
    }

    pub fn child_count(&self, txid: &str) -> usize {
        self.by_parent.get(txid).map_or(0, Vec::len)
    }

    pub fn leaves(&self) -> Vec<&'a Node> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| !self.by_parent.contains_key(n.txid.as_str()))
            .collect()
    }
}
