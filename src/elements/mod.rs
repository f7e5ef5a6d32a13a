//! Elements/Liquid transaction plumbing: the consensus transaction codec, PSET v2, and the
//! Elements flavour of taproot commitments.

pub mod pset;
pub mod taproot;
pub mod transaction;

pub use pset::{Pset, PsetInput, PsetOutput, TapLeafScript};
pub use taproot::{ControlBlock, TapNodeHash, TAPROOT_LEAF_TAPSCRIPT};
pub use transaction::{Asset, AssetId, Transaction, TxIn, TxOut, Value};
