//! Error types for the settlement engine
//!
//! Two families are kept apart:
//! - [`Rejection`]: a precondition failed. Reported to the operator, no chain
//!   write was attempted, and re-invoking with corrected input recovers.
//! - [`EngineError`]: a collaborator failed (chain read, estimate, broadcast,
//!   inclusion wait, prompt). Fatal to the current command and never retried.
//!
//! Declining a confirmation prompt is neither; it is a successful early exit.

use alloy_primitives::U256;
use serde::Serialize;
use thiserror::Error;

use crate::chain::ChainError;
use crate::tx_lifecycle::TxState;
use crate::types::{serde_u256, TxId};

/// Precondition rejections produced by the calculators, the claim gate and
/// the nonce safety check
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("no open utilization position")]
    NoOpenPosition,

    #[error("repayment of {requested} exceeds the utilization position of {utilization}")]
    ExceedsUtilization {
        #[serde(with = "serde_u256")]
        requested: U256,
        #[serde(with = "serde_u256")]
        utilization: U256,
    },

    #[error("insufficient SD in operator account: requested {requested}, available {available}")]
    InsufficientBalance {
        #[serde(with = "serde_u256")]
        requested: U256,
        #[serde(with = "serde_u256")]
        available: U256,
    },

    #[error("no excess SD collateral")]
    NoExcessCollateral,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("insufficient withdrawable SD collateral")]
    InsufficientWithdrawableCollateral,

    #[error("SD collateral would fall below the minimum ratio")]
    CollateralBelowMinimumRatio,

    /// All validators exited and self-bonded collateral does not cover the fee
    #[error("self-bonded collateral {available} does not cover accumulated interest {required}")]
    InterestNotCovered {
        #[serde(with = "serde_u256")]
        required: U256,
        #[serde(with = "serde_u256")]
        available: U256,
        #[serde(with = "serde_u256")]
        shortfall: U256,
    },

    #[error("the socializing pool contract is paused")]
    SocializingPoolPaused,

    #[error("merkle proofs missing for cycles {cycles:?}")]
    ProofsMissing { cycles: Vec<u64> },

    #[error("invalid cycle selection: {invalid:?}")]
    InvalidCycleSelection { invalid: Vec<String> },

    #[error("nonce {nonce} is greater than the next available nonce {pending}")]
    AheadOfPendingNonce { nonce: u64, pending: u64 },

    #[error("nonce {nonce} has already been included in a block (latest mined nonce {mined})")]
    AlreadyIncluded { nonce: u64, mined: u64 },

    #[error("no SD collateral withdrawal request")]
    NoWithdrawRequest,

    #[error("{amount} SD is still unbonding until {unlocks_at}")]
    UnbondingInProgress {
        #[serde(with = "serde_u256")]
        amount: U256,
        unlocks_at: i64,
    },
}

impl Rejection {
    /// Category label for logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoOpenPosition | Self::ExceedsUtilization { .. } => "utilization",
            Self::InsufficientBalance { .. } => "balance",
            Self::NoExcessCollateral
            | Self::InsufficientWithdrawableCollateral
            | Self::CollateralBelowMinimumRatio => "collateral",
            Self::ZeroAmount => "input",
            Self::InterestNotCovered { .. } => "claim",
            Self::SocializingPoolPaused
            | Self::ProofsMissing { .. }
            | Self::InvalidCycleSelection { .. } => "cycles",
            Self::AheadOfPendingNonce { .. } | Self::AlreadyIncluded { .. } => "nonce",
            Self::NoWithdrawRequest | Self::UnbondingInProgress { .. } => "unbonding",
        }
    }
}

/// Collaborator failures and lifecycle faults
#[derive(Error, Debug)]
pub enum EngineError {
    /// A chain read, estimate or broadcast failed
    #[error("chain {operation} failed: {source}")]
    Chain {
        operation: &'static str,
        #[source]
        source: ChainError,
    },

    /// The transaction was included but its execution reverted
    #[error("transaction {tx_id} reverted in block {block_number}")]
    Reverted { tx_id: TxId, block_number: u64 },

    #[error("timed out after {waited_secs}s waiting for inclusion of {tx_id}")]
    InclusionTimeout { tx_id: TxId, waited_secs: u64 },

    #[error("inclusion wait for {tx_id} was cancelled")]
    InclusionCancelled { tx_id: TxId },

    /// The operator prompt could not be read
    #[error("prompt failed: {0}")]
    Prompt(String),

    /// The lifecycle state machine was driven out of order
    #[error("invalid lifecycle transition from {from:?} on {event}")]
    InvalidTransition { from: TxState, event: &'static str },
}

impl EngineError {
    pub fn chain(operation: &'static str, source: ChainError) -> Self {
        Self::Chain { operation, source }
    }

    pub fn prompt(reason: impl Into<String>) -> Self {
        Self::Prompt(reason.into())
    }

    /// Transaction the error refers to, if one was already broadcast
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            Self::Reverted { tx_id, .. }
            | Self::InclusionTimeout { tx_id, .. }
            | Self::InclusionCancelled { tx_id } => Some(*tx_id),
            _ => None,
        }
    }

    /// Category label for logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Chain { .. } => "chain",
            Self::Reverted { .. } => "revert",
            Self::InclusionTimeout { .. } | Self::InclusionCancelled { .. } => "inclusion",
            Self::Prompt(_) => "prompt",
            Self::InvalidTransition { .. } => "internal",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
