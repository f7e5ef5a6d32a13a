#![no_std]

#[cfg(feature = "std")]
extern crate std;

// Needed for Vec and String
extern crate alloc;

pub mod compact_size;
pub mod elements;
pub mod error;
pub mod round;
pub mod script;
pub mod tree;

pub use error::{DecodeError, ValidationError};
pub use round::{Round, RoundError, RoundEvent};
pub use script::{classify, BranchScript, SweepScript, TapscriptKind};
pub use tree::validation::{unspendable_key, SHARED_OUTPUT_INDEX, UNSPENDABLE_POINT};
pub use tree::{
    validate_congestion_tree, CongestionTree, Node, TreeIndex, TreeValidator, ValidationParams,
};
