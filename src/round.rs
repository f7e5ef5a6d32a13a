//! Round lifecycle events and the event-sourced round aggregate.
//!
//! A round collects payments, then proposes a congestion tree plus funding transaction for
//! finalization. The tree is validated before `RoundFinalizationStarted` is recorded; a
//! rejected tree fails the round. Events are the source of truth: [`Round::from_events`]
//! rebuilds the same state a live round reached.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::ValidationError;
use crate::tree::{validate_congestion_tree, CongestionTree, ValidationParams};

/// Payout of a payment.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(
    feature = "export-json",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Receiver {
    pub pubkey: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(
    feature = "export-json",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Payment {
    pub id: String,
    /// Outpoints (`txid:vout`) of the VTXOs being spent.
    pub inputs: Vec<String>,
    pub receivers: Vec<Receiver>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[cfg_attr(
    feature = "export-json",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "type", rename_all = "camelCase")
)]
pub enum RoundEvent {
    RoundStarted {
        id: String,
        timestamp: i64,
    },
    RoundFinalizationStarted {
        id: String,
        congestion_tree: CongestionTree,
        connectors: Vec<String>,
        pool_tx: String,
    },
    RoundFinalized {
        id: String,
        txid: String,
        forfeit_txs: Vec<String>,
        timestamp: i64,
    },
    RoundFailed {
        id: String,
        err: String,
        timestamp: i64,
    },
    PaymentsRegistered {
        id: String,
        payments: Vec<Payment>,
    },
    PaymentsClaimed {
        id: String,
        payments: Vec<Payment>,
    },
}

impl RoundEvent {
    /// Id of the round the event belongs to.
    pub fn round_id(&self) -> &str {
        match self {
            Self::RoundStarted { id, .. }
            | Self::RoundFinalizationStarted { id, .. }
            | Self::RoundFinalized { id, .. }
            | Self::RoundFailed { id, .. }
            | Self::PaymentsRegistered { id, .. }
            | Self::PaymentsClaimed { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoundStage {
    #[default]
    Undefined,
    Registration,
    Finalization,
    Finalized,
    Failed,
}

impl RoundStage {
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundError {
    /// Command not allowed in the round's current stage.
    WrongStage {
        expected: RoundStage,
        found: RoundStage,
    },
    /// Command carried no payments.
    NoPayments,
    /// Payment id is already registered.
    DuplicatePayment(String),
    /// Claimed payment was never registered.
    UnknownPayment(String),
    /// Proposed tree was rejected; the round has been failed.
    InvalidCongestionTree(ValidationError),
}

impl core::fmt::Display for RoundError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::WrongStage { expected, found } => {
                write!(f, "Round should be in stage {:?}, found {:?}", expected, found)
            }
            Self::NoPayments => write!(f, "Missing payments"),
            Self::DuplicatePayment(id) => write!(f, "Payment {} already registered", id),
            Self::UnknownPayment(id) => write!(f, "Payment {} not found", id),
            Self::InvalidCongestionTree(e) => write!(f, "Invalid congestion tree: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RoundError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Round {
    pub id: String,
    pub stage: RoundStage,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub payments: BTreeMap<String, Payment>,
    pub congestion_tree: CongestionTree,
    pub connectors: Vec<String>,
    pub pool_tx: String,
    pub txid: String,
    pub forfeit_txs: Vec<String>,
    pub failure: Option<String>,
    /// Number of events applied.
    pub version: u32,
    changes: Vec<RoundEvent>,
}

impl Round {
    /// Opens a round for payment registration.
    pub fn start(id: impl Into<String>, timestamp: i64) -> Self {
        let mut round = Self::default();
        round.record(RoundEvent::RoundStarted {
            id: id.into(),
            timestamp,
        });
        round
    }

    /// Rebuilds a round from its event history. The result has no pending changes.
    pub fn from_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = RoundEvent>,
    {
        let mut round = Self::default();
        for event in events {
            round.apply(&event);
        }
        round
    }

    /// Events recorded since creation or the last [`Round::mark_changes_committed`].
    pub fn changes(&self) -> &[RoundEvent] {
        &self.changes
    }

    pub fn mark_changes_committed(&mut self) {
        self.changes.clear();
    }

    pub fn register_payments(&mut self, payments: Vec<Payment>) -> Result<(), RoundError> {
        self.expect_stage(RoundStage::Registration)?;
        if payments.is_empty() {
            return Err(RoundError::NoPayments);
        }
        if let Some(dup) = payments.iter().find(|p| self.payments.contains_key(&p.id)) {
            return Err(RoundError::DuplicatePayment(dup.id.clone()));
        }
        self.record(RoundEvent::PaymentsRegistered {
            id: self.id.clone(),
            payments,
        });
        Ok(())
    }

    /// Updates registered payments, typically with their receivers.
    pub fn claim_payments(&mut self, payments: Vec<Payment>) -> Result<(), RoundError> {
        self.expect_stage(RoundStage::Registration)?;
        if payments.is_empty() {
            return Err(RoundError::NoPayments);
        }
        if let Some(unknown) = payments.iter().find(|p| !self.payments.contains_key(&p.id)) {
            return Err(RoundError::UnknownPayment(unknown.id.clone()));
        }
        self.record(RoundEvent::PaymentsClaimed {
            id: self.id.clone(),
            payments,
        });
        Ok(())
    }

    /// Validates the proposed tree against `pool_tx` and moves to finalization. A rejected
    /// tree records `RoundFailed` and is returned as [`RoundError::InvalidCongestionTree`].
    pub fn start_finalization(
        &mut self,
        congestion_tree: CongestionTree,
        connectors: Vec<String>,
        pool_tx: String,
        params: &ValidationParams,
        timestamp: i64,
    ) -> Result<(), RoundError> {
        self.expect_stage(RoundStage::Registration)?;
        if let Err(err) = validate_congestion_tree(&congestion_tree, &pool_tx, params) {
            self.record(RoundEvent::RoundFailed {
                id: self.id.clone(),
                err: err.to_string(),
                timestamp,
            });
            return Err(RoundError::InvalidCongestionTree(err));
        }
        self.record(RoundEvent::RoundFinalizationStarted {
            id: self.id.clone(),
            congestion_tree,
            connectors,
            pool_tx,
        });
        Ok(())
    }

    pub fn end_finalization(
        &mut self,
        txid: String,
        forfeit_txs: Vec<String>,
        timestamp: i64,
    ) -> Result<(), RoundError> {
        self.expect_stage(RoundStage::Finalization)?;
        self.record(RoundEvent::RoundFinalized {
            id: self.id.clone(),
            txid,
            forfeit_txs,
            timestamp,
        });
        Ok(())
    }

    /// Fails a round that has not ended yet.
    pub fn fail(&mut self, err: impl Into<String>, timestamp: i64) -> Result<(), RoundError> {
        if self.stage.is_ended() || self.stage == RoundStage::Undefined {
            return Err(RoundError::WrongStage {
                expected: RoundStage::Registration,
                found: self.stage,
            });
        }
        self.record(RoundEvent::RoundFailed {
            id: self.id.clone(),
            err: err.into(),
            timestamp,
        });
        Ok(())
    }

    fn expect_stage(&self, expected: RoundStage) -> Result<(), RoundError> {
        if self.stage != expected {
            return Err(RoundError::WrongStage {
                expected,
                found: self.stage,
            });
        }
        Ok(())
    }

    fn record(&mut self, event: RoundEvent) {
        self.apply(&event);
        self.changes.push(event);
    }

    fn apply(&mut self, event: &RoundEvent) {
        match event {
            RoundEvent::RoundStarted { id, timestamp } => {
                self.id = id.clone();
                self.stage = RoundStage::Registration;
                self.started_at = *timestamp;
            }
            RoundEvent::RoundFinalizationStarted {
                congestion_tree,
                connectors,
                pool_tx,
                ..
            } => {
                self.stage = RoundStage::Finalization;
                self.congestion_tree = congestion_tree.clone();
                self.connectors = connectors.clone();
                self.pool_tx = pool_tx.clone();
            }
            RoundEvent::RoundFinalized {
                txid,
                forfeit_txs,
                timestamp,
                ..
            } => {
                self.stage = RoundStage::Finalized;
                self.txid = txid.clone();
                self.forfeit_txs = forfeit_txs.clone();
                self.ended_at = Some(*timestamp);
            }
            RoundEvent::RoundFailed { err, timestamp, .. } => {
                self.stage = RoundStage::Failed;
                self.failure = Some(err.clone());
                self.ended_at = Some(*timestamp);
            }
            RoundEvent::PaymentsRegistered { payments, .. }
            | RoundEvent::PaymentsClaimed { payments, .. } => {
                for payment in payments {
                    self.payments.insert(payment.id.clone(), payment.clone());
                }
            }
        }
        self.version += 1;
    }
}
