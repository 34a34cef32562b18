//! Chain collaborator contract
//!
//! The engine never talks to a node directly. Everything it needs from the
//! chain (position reads, allowance, gas estimation, broadcast, inclusion)
//! goes through [`ChainClient`]. The CLI ships with [`FixtureChain`], a
//! file-backed simulated chain used for dry runs and tests.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    ContractCall, GasInfo, InclusionReceipt, RewardClaimStatus, SdPosition, SpRewardsStatus,
    TxId, TxOptions, WithdrawLegality,
};

pub mod fixture;

pub use fixture::{FixtureChain, FixtureState};

/// Errors reported by a chain client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Transport or node-side failure
    #[error("RPC error in {method}: {message}")]
    Rpc { method: String, message: String },

    /// Execution would revert (reported by gas estimation)
    #[error("execution reverted: {0}")]
    ExecutionReverted(String),

    /// Broadcast rejected by the node
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),
}

impl ChainError {
    pub fn rpc(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            method: method.into(),
            message: message.into(),
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Everything the settlement engine consumes from the chain
///
/// Implementations are expected to be cheap to share behind an `Arc`.
/// None of the calls are retried by the engine.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Operator account that signs every transaction
    fn operator_address(&self) -> Address;

    /// Utility contract that pulls SD on repayment (the approval spender)
    fn utility_contract(&self) -> Address;

    async fn sd_position(&self) -> ChainResult<SdPosition>;

    async fn reward_claim_status(&self) -> ChainResult<RewardClaimStatus>;

    /// SD allowance from the operator account to `spender`
    async fn sd_allowance(&self, spender: Address) -> ChainResult<U256>;

    async fn can_withdraw_sd(&self, amount: U256) -> ChainResult<WithdrawLegality>;

    async fn sp_rewards_status(&self) -> ChainResult<SpRewardsStatus>;

    /// Fetch merkle proofs for every cycle still missing them; returns the fetched cycles
    async fn download_sp_merkle_proofs(&self) -> ChainResult<Vec<u64>>;

    /// Next nonce including pending transactions
    async fn pending_nonce(&self) -> ChainResult<u64>;

    /// Next nonce counting only mined transactions
    async fn mined_nonce(&self) -> ChainResult<u64>;

    async fn estimate_gas(&self, call: &ContractCall) -> ChainResult<GasInfo>;

    /// Sign and broadcast; returns as soon as the node accepts the transaction
    async fn send_transaction(&self, call: &ContractCall, opts: &TxOptions) -> ChainResult<TxId>;

    /// Block until the transaction is included. Has no timeout of its own.
    async fn wait_for_inclusion(&self, tx_id: TxId) -> ChainResult<InclusionReceipt>;
}
