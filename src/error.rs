// src/error.rs

/// Failures of the Elements transaction / PSET codec.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte stream ended before a field could be fully read.
    IncompleteData,

    /// Input string was not valid hex.
    InvalidHex,

    /// Input string was not valid base64.
    InvalidBase64,

    /// PSET magic bytes were not `pset\xff`.
    InvalidMagic,

    /// PSET global version was not 2.
    UnsupportedPsetVersion(u32),

    /// The same key appeared twice in one PSET map.
    DuplicateKey(u8),

    /// A required PSET field (by key type) was absent.
    MissingField(u8),

    /// A PSET field (by key type) had a malformed value.
    InvalidField(u8),

    /// Unknown confidential asset/value/nonce prefix byte.
    InvalidPrefix(u8),

    /// A length or count did not fit the platform or exceeded a sanity bound.
    OversizedLength(u64),

    /// Bytes were left over after a full parse (cursor desynchronization).
    TrailingData(usize),

    /// The transaction has no output at this index.
    MissingOutput(u32),

    /// A value or asset that must be explicit is blinded.
    NotExplicit,
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::IncompleteData => write!(f, "Incomplete transaction data"),
            Self::InvalidHex => write!(f, "Invalid hex encoding"),
            Self::InvalidBase64 => write!(f, "Invalid base64 encoding"),
            Self::InvalidMagic => write!(f, "Invalid PSET magic bytes"),
            Self::UnsupportedPsetVersion(v) => write!(f, "Unsupported PSET version: {}", v),
            Self::DuplicateKey(k) => write!(f, "Duplicate PSET key: 0x{:02x}", k),
            Self::MissingField(k) => write!(f, "Missing PSET field: 0x{:02x}", k),
            Self::InvalidField(k) => write!(f, "Invalid PSET field: 0x{:02x}", k),
            Self::InvalidPrefix(p) => write!(f, "Invalid confidential prefix: 0x{:02x}", p),
            Self::OversizedLength(n) => write!(f, "Length {} exceeds limit", n),
            Self::TrailingData(n) => write!(f, "Trailing data: {} bytes left after parse", n),
            Self::MissingOutput(i) => write!(f, "Missing output at index {}", i),
            Self::NotExplicit => write!(f, "Confidential value where an explicit one is required"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Why a congestion tree was rejected. The first violated check wins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValidationError {
    // --- Structural ---
    /// The funding transaction could not be decoded, or its shared output is unusable.
    InvalidFundingTransaction(DecodeError),
    /// The tree has no nodes.
    EmptyTree,
    /// Level 0 must hold exactly one node; holds this many.
    InvalidRootLevel(usize),
    /// No node of the tree is childless.
    NoLeaves,
    /// The root PSET could not be decoded.
    InvalidRootTransaction(DecodeError),
    /// A node PSET could not be decoded.
    InvalidNodeTransaction(DecodeError),
    /// A child PSET could not be decoded.
    InvalidChildTransaction(DecodeError),
    /// Node field `tx` is empty.
    EmptyTransaction,
    /// Node field `txid` is empty.
    EmptyTxid,
    /// Node field `parent_txid` is empty.
    EmptyParentTxid,
    /// Transaction must have exactly one input.
    WrongInputCount(usize),
    /// Branch-encoded shape requires `expected` outputs.
    WrongOutputCount { expected: usize, found: usize },
    /// The last output does not have an empty script.
    MissingFeeOutput,

    // --- Linkage ---
    /// The node's unsigned transaction hashes to a different txid.
    TxidMismatch,
    /// The node input does not spend from `parent_txid`.
    WrongParentReference,
    /// The root input does not spend the funding shared output.
    WrongFundingReference,
    /// A node flagged as leaf has more than one child.
    LeafHasChildren(usize),

    // --- Cryptographic commitment ---
    /// Input must carry exactly two tapscript leaves.
    WrongTapscriptCount(usize),
    /// Control block internal key is not the unspendable point.
    InternalKeyMismatch,
    /// Taproot output key mismatch, or the spent output is not a v1 witness program.
    InvalidTaprootScript,
    /// No sweep leaf among the child's tapscripts.
    MissingSweepScript,
    /// No branch leaf among the child's tapscripts.
    MissingBranchScript,
    /// Script started as a sweep leaf but deviated from the pattern.
    InvalidSweepScript,
    /// Script started as a branch leaf but deviated from the pattern.
    InvalidBranchScript,

    // --- Economic ---
    /// Output values do not sum to the spent value.
    AmountMismatch,
    /// An output carries a different asset than the spent output.
    AssetMismatch,
    /// Sweep leaf is not spendable by the configured authority.
    InvalidAuthorityKey,
    /// Sweep leaf timeout differs from the configured one.
    InvalidSweepTimeout,
    /// Output 0 does not match the branch-encoded left recipient/amount.
    InvalidLeftOutput,
    /// Output 1 does not match the branch-encoded right recipient/amount.
    InvalidRightOutput,
}

impl core::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidFundingTransaction(e) => write!(f, "Invalid funding transaction: {}", e),
            Self::EmptyTree => write!(f, "Empty congestion tree"),
            Self::InvalidRootLevel(n) => {
                write!(f, "Root level must have only one node, found {}", n)
            }
            Self::NoLeaves => write!(f, "No leaves in the tree"),
            Self::InvalidRootTransaction(e) => write!(f, "Invalid root transaction: {}", e),
            Self::InvalidNodeTransaction(e) => write!(f, "Invalid node transaction: {}", e),
            Self::InvalidChildTransaction(e) => write!(f, "Invalid child transaction: {}", e),
            Self::EmptyTransaction => write!(f, "Node transaction is empty"),
            Self::EmptyTxid => write!(f, "Node txid is empty"),
            Self::EmptyParentTxid => write!(f, "Node parent txid is empty"),
            Self::WrongInputCount(n) => {
                write!(f, "Transaction should have only one input, found {}", n)
            }
            Self::WrongOutputCount { expected, found } => write!(
                f,
                "Transaction should have {} outputs, found {}",
                expected, found
            ),
            Self::MissingFeeOutput => write!(f, "Missing fee output"),
            Self::TxidMismatch => write!(f, "Node txid differs from node transaction"),
            Self::WrongParentReference => {
                write!(f, "Parent txid should be the input of the node transaction")
            }
            Self::WrongFundingReference => {
                write!(f, "Root input should be the funding shared outpoint")
            }
            Self::LeafHasChildren(n) => {
                write!(f, "Leaf node should have max 1 child, found {}", n)
            }
            Self::WrongTapscriptCount(n) => {
                write!(f, "Input should have two tapscript leaves, found {}", n)
            }
            Self::InternalKeyMismatch => write!(f, "Taproot internal key is not unspendable"),
            Self::InvalidTaprootScript => write!(f, "Invalid taproot script"),
            Self::MissingSweepScript => write!(f, "Missing sweep tapscript"),
            Self::MissingBranchScript => write!(f, "Missing branch tapscript"),
            Self::InvalidSweepScript => write!(f, "Invalid sweep script"),
            Self::InvalidBranchScript => write!(f, "Invalid branch script"),
            Self::AmountMismatch => write!(f, "Children amount is different from parent amount"),
            Self::AssetMismatch => write!(f, "Invalid output asset"),
            Self::InvalidAuthorityKey => write!(f, "Invalid settlement authority key"),
            Self::InvalidSweepTimeout => write!(f, "Invalid sweep timeout"),
            Self::InvalidLeftOutput => write!(f, "Invalid left output"),
            Self::InvalidRightOutput => write!(f, "Invalid right output"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}
