//! Shared test helpers: a congestion tree builder producing valid fixtures.

mod tree_builder;

pub use tree_builder::{
    commitment, edit_pset, key, keypair, leaf_scripts, recommit_root_child, refresh_txid,
    tap_leaf, to_hex_encoding, Fixture, PlanNode, PlanOutput, ASSET, SWEEP_TIMEOUT_SECONDS,
};
