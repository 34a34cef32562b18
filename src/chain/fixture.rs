//! File-backed simulated chain
//!
//! `FixtureChain` keeps an operator's on-chain state in memory and applies
//! contract effects when a transaction is "included". It backs the CLI's
//! dry-run mode (state is loaded from and written back to a TOML file) and
//! every engine test. Nothing here touches the network.
//!
//! Failure injection (`fail_on`) and a stalled inclusion switch
//! (`stall_inclusion`) let tests exercise collaborator failures and the
//! bounded inclusion wait deterministically.

use std::collections::HashMap;
use std::path::Path;

use alloy_primitives::{keccak256, Address, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChainClient, ChainError, ChainResult};
use crate::types::{
    serde_u256, ContractCall, GasInfo, InclusionReceipt, RewardClaimStatus, SdPosition,
    SpRewardsStatus, TxId, TxOptions, WithdrawLegality,
};

/// Persisted simulated chain state
///
/// Scalars are declared before nested tables so the struct serializes to
/// valid TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureState {
    pub operator: Address,

    pub utility_contract: Address,

    /// SD allowance from operator to the utility contract
    #[serde(default, with = "serde_u256")]
    pub allowance: U256,

    /// When set, every withdrawal is refused for breaking the collateral ratio
    #[serde(default)]
    pub collateral_ratio_locked: bool,

    #[serde(default)]
    pub pending_nonce: u64,

    #[serde(default)]
    pub mined_nonce: u64,

    #[serde(default)]
    pub block_number: u64,

    /// SD delivered to the operator reward address by withdrawals
    #[serde(default, with = "serde_u256")]
    pub reward_address_sd: U256,

    /// ETH delivered to the operator reward address by claims
    #[serde(default, with = "serde_u256")]
    pub reward_address_eth: U256,

    pub position: SdPosition,

    #[serde(default)]
    pub rewards: RewardClaimStatus,

    #[serde(default)]
    pub sp_rewards: SpRewardsStatus,

    #[serde(default)]
    pub gas: GasInfo,
}

impl FixtureState {
    /// Apply a contract call's effect. Returns `false` when the call reverts.
    fn apply(&mut self, call: &ContractCall) -> bool {
        let position = &mut self.position;
        match call {
            ContractCall::ApproveSd { amount, .. } => {
                self.allowance = *amount;
                true
            }
            ContractCall::RepaySd { amount } => {
                if self.allowance < *amount
                    || position.sd_balance < *amount
                    || position.sd_utilizer_latest_balance < *amount
                {
                    return false;
                }
                position.sd_balance -= *amount;
                position.sd_utilizer_latest_balance -= *amount;
                if self.allowance != U256::MAX {
                    self.allowance -= *amount;
                }
                if position.sd_utilizer_latest_balance.is_zero() {
                    position.accumulated_interest = U256::ZERO;
                }
                true
            }
            ContractCall::RepayExcessSd { amount } => {
                if *amount > position.excess_collateral()
                    || *amount > position.sd_utilizer_latest_balance
                {
                    return false;
                }
                position.sd_utilizer_latest_balance -= *amount;
                if position.sd_utilizer_latest_balance.is_zero() {
                    position.accumulated_interest = U256::ZERO;
                }
                true
            }
            ContractCall::WithdrawSd { amount } => {
                if self.collateral_ratio_locked || *amount > position.sd_collateral_current_amount
                {
                    return false;
                }
                let settled = (*amount).min(position.sd_utilizer_latest_balance);
                position.sd_utilizer_latest_balance -= settled;
                position.sd_collateral_current_amount -= *amount;
                self.reward_address_sd += *amount - settled;
                true
            }
            ContractCall::ClaimRewards => {
                let rewards = &mut self.rewards;
                let all_exited = rewards.non_terminal_validator_count == 0;
                if all_exited && position.has_open_utilization() {
                    // Interest is settled from self-bonded collateral
                    if position.sd_collateral_current_amount < position.accumulated_interest {
                        return false;
                    }
                    position.sd_collateral_current_amount -= position.accumulated_interest;
                    position.accumulated_interest = U256::ZERO;
                    position.sd_utilizer_latest_balance = U256::ZERO;
                }
                let paid = if position.has_open_utilization() {
                    rewards.withdrawable_in_eth
                } else {
                    rewards.claims_balance
                };
                if paid.is_zero() {
                    return false;
                }
                self.reward_address_eth += paid;
                rewards.claims_balance = rewards.claims_balance.saturating_sub(paid);
                rewards.withdrawable_in_eth = rewards.withdrawable_in_eth.saturating_sub(paid);
                true
            }
            ContractCall::ClaimSpRewards { cycles } => {
                let sp = &mut self.sp_rewards;
                if cycles.is_empty() || cycles.iter().any(|c| !sp.unclaimed_cycles.contains(c)) {
                    return false;
                }
                sp.unclaimed_cycles.retain(|c| !cycles.contains(c));
                true
            }
            ContractCall::ClaimWithdrawnSd => {
                let requested = position.sd_collateral_requested_to_withdraw;
                if requested.is_zero() {
                    return false;
                }
                position.sd_balance += requested;
                position.sd_collateral_requested_to_withdraw = U256::ZERO;
                position.sd_collateral_withdraw_time = 0;
                true
            }
        }
    }
}

/// A broadcast transaction as seen by the simulated node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransaction {
    pub tx_id: TxId,
    pub call: ContractCall,
    pub options: TxOptions,
    pub nonce: u64,
}

#[derive(Default)]
struct Inner {
    state: FixtureState,
    pending: HashMap<TxId, SentTransaction>,
    sent: Vec<SentTransaction>,
    estimated: Vec<ContractCall>,
    failures: HashMap<&'static str, String>,
    stall_inclusion: bool,
    tx_counter: u64,
}

impl Inner {
    fn check(&self, operation: &'static str) -> ChainResult<()> {
        match self.failures.get(operation) {
            Some(message) => Err(ChainError::rpc(operation, message.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory chain client over a [`FixtureState`]
#[derive(Default)]
pub struct FixtureChain {
    inner: Mutex<Inner>,
}

impl FixtureChain {
    pub fn new(state: FixtureState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                ..Default::default()
            }),
        }
    }

    /// Load state from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chain state file: {}", path.display()))?;
        let state: FixtureState = toml::from_str(&content)
            .with_context(|| format!("Failed to parse chain state file: {}", path.display()))?;
        Ok(Self::new(state))
    }

    /// Write the current state back to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(&self.snapshot()).context("Failed to encode chain state")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write chain state file: {}", path.display()))?;
        Ok(())
    }

    pub fn snapshot(&self) -> FixtureState {
        self.inner.lock().state.clone()
    }

    /// Every transaction broadcast so far, in order
    pub fn sent_transactions(&self) -> Vec<SentTransaction> {
        self.inner.lock().sent.clone()
    }

    /// Every call passed to gas estimation, in order
    pub fn estimated_calls(&self) -> Vec<ContractCall> {
        self.inner.lock().estimated.clone()
    }

    /// Make `operation` fail with an RPC error until cleared
    pub fn fail_on(&self, operation: &'static str, message: impl Into<String>) {
        self.inner.lock().failures.insert(operation, message.into());
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Inclusion waits never resolve while set
    pub fn stall_inclusion(&self, stalled: bool) {
        self.inner.lock().stall_inclusion = stalled;
    }
}

#[async_trait]
impl ChainClient for FixtureChain {
    fn operator_address(&self) -> Address {
        self.inner.lock().state.operator
    }

    fn utility_contract(&self) -> Address {
        self.inner.lock().state.utility_contract
    }

    async fn sd_position(&self) -> ChainResult<SdPosition> {
        let inner = self.inner.lock();
        inner.check("sd_position")?;
        Ok(inner.state.position.clone())
    }

    async fn reward_claim_status(&self) -> ChainResult<RewardClaimStatus> {
        let inner = self.inner.lock();
        inner.check("reward_claim_status")?;
        Ok(inner.state.rewards.clone())
    }

    async fn sd_allowance(&self, spender: Address) -> ChainResult<U256> {
        let inner = self.inner.lock();
        inner.check("sd_allowance")?;
        if spender == inner.state.utility_contract {
            Ok(inner.state.allowance)
        } else {
            Ok(U256::ZERO)
        }
    }

    async fn can_withdraw_sd(&self, amount: U256) -> ChainResult<WithdrawLegality> {
        let inner = self.inner.lock();
        inner.check("can_withdraw_sd")?;
        Ok(WithdrawLegality {
            insufficient_withdrawable_sd: amount > inner.state.position.sd_collateral_current_amount,
            insufficient_sd_collateral: inner.state.collateral_ratio_locked,
        })
    }

    async fn sp_rewards_status(&self) -> ChainResult<SpRewardsStatus> {
        let inner = self.inner.lock();
        inner.check("sp_rewards_status")?;
        Ok(inner.state.sp_rewards.clone())
    }

    async fn download_sp_merkle_proofs(&self) -> ChainResult<Vec<u64>> {
        let mut inner = self.inner.lock();
        inner.check("download_sp_merkle_proofs")?;
        Ok(std::mem::take(&mut inner.state.sp_rewards.cycles_to_download))
    }

    async fn pending_nonce(&self) -> ChainResult<u64> {
        let inner = self.inner.lock();
        inner.check("pending_nonce")?;
        Ok(inner.state.pending_nonce)
    }

    async fn mined_nonce(&self) -> ChainResult<u64> {
        let inner = self.inner.lock();
        inner.check("mined_nonce")?;
        Ok(inner.state.mined_nonce)
    }

    async fn estimate_gas(&self, call: &ContractCall) -> ChainResult<GasInfo> {
        let mut inner = self.inner.lock();
        inner.check("estimate_gas")?;
        inner.estimated.push(call.clone());
        if let ContractCall::RepaySd { amount } = call {
            if inner.state.allowance < *amount {
                return Err(ChainError::ExecutionReverted(
                    "ERC20: insufficient allowance".to_string(),
                ));
            }
            if inner.state.position.sd_balance < *amount {
                return Err(ChainError::ExecutionReverted(
                    "ERC20: transfer amount exceeds balance".to_string(),
                ));
            }
        }
        Ok(inner.state.gas)
    }

    async fn send_transaction(&self, call: &ContractCall, opts: &TxOptions) -> ChainResult<TxId> {
        let mut inner = self.inner.lock();
        inner.check("send_transaction")?;

        let pending = inner.state.pending_nonce;
        let nonce = opts.nonce.unwrap_or(pending);
        if nonce > pending {
            return Err(ChainError::TransactionRejected(format!(
                "nonce too high: {nonce} > {pending}"
            )));
        }
        if nonce < inner.state.mined_nonce {
            return Err(ChainError::TransactionRejected(format!(
                "nonce too low: {nonce} < {}",
                inner.state.mined_nonce
            )));
        }

        // A lower nonce replaces whatever is pending at that slot
        inner.pending.retain(|_, tx| tx.nonce != nonce);

        inner.tx_counter += 1;
        let mut preimage = Vec::with_capacity(64);
        preimage.extend_from_slice(inner.state.operator.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&inner.tx_counter.to_be_bytes());
        preimage.extend_from_slice(call.kind().as_bytes());
        let tx_id = keccak256(&preimage);

        let sent = SentTransaction {
            tx_id,
            call: call.clone(),
            options: *opts,
            nonce,
        };
        inner.pending.insert(tx_id, sent.clone());
        inner.sent.push(sent);
        inner.state.pending_nonce = pending.max(nonce + 1);

        debug!(tx_id = %tx_id, nonce, call = call.kind(), "Fixture transaction accepted");
        Ok(tx_id)
    }

    async fn wait_for_inclusion(&self, tx_id: TxId) -> ChainResult<InclusionReceipt> {
        let stalled = {
            let inner = self.inner.lock();
            inner.check("wait_for_inclusion")?;
            inner.stall_inclusion
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock();
        let tx = inner
            .pending
            .remove(&tx_id)
            .ok_or(ChainError::UnknownTransaction(tx_id))?;
        let success = inner.state.apply(&tx.call);
        inner.state.block_number += 1;
        inner.state.mined_nonce = inner.state.mined_nonce.max(tx.nonce + 1);

        Ok(InclusionReceipt {
            tx_id,
            block_number: inner.state.block_number,
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> FixtureState {
        FixtureState {
            operator: Address::repeat_byte(0x11),
            utility_contract: Address::repeat_byte(0x22),
            pending_nonce: 5,
            mined_nonce: 5,
            position: SdPosition {
                sd_balance: U256::from(100),
                sd_collateral_current_amount: U256::from(300),
                sd_utilizer_latest_balance: U256::from(150),
                sd_max_collateral_amount: U256::from(400),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_assigns_pending_nonce_and_inclusion_mines_it() {
        let chain = FixtureChain::new(state());
        let call = ContractCall::ApproveSd {
            spender: Address::repeat_byte(0x22),
            amount: U256::MAX,
        };
        let tx_id = chain
            .send_transaction(&call, &TxOptions::default())
            .await
            .unwrap();
        assert_eq!(chain.pending_nonce().await.unwrap(), 6);
        assert_eq!(chain.mined_nonce().await.unwrap(), 5);

        let receipt = chain.wait_for_inclusion(tx_id).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_number, 1);
        assert_eq!(chain.mined_nonce().await.unwrap(), 6);
        assert_eq!(chain.snapshot().allowance, U256::MAX);
    }

    #[tokio::test]
    async fn test_send_refuses_nonce_gaps_and_stale_nonces() {
        let chain = FixtureChain::new(state());
        let ahead = TxOptions {
            nonce: Some(6),
            ..Default::default()
        };
        let err = chain
            .send_transaction(&ContractCall::ClaimRewards, &ahead)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::TransactionRejected(_)));

        let stale = TxOptions {
            nonce: Some(4),
            ..Default::default()
        };
        assert!(chain
            .send_transaction(&ContractCall::ClaimRewards, &stale)
            .await
            .is_err());
        assert!(chain.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_repay_estimate_reverts_without_allowance() {
        let chain = FixtureChain::new(state());
        let err = chain
            .estimate_gas(&ContractCall::RepaySd {
                amount: U256::from(10),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::ExecutionReverted(_)));
    }

    #[test]
    fn test_withdraw_effect_settles_debt_first() {
        let mut s = state();
        assert!(s.apply(&ContractCall::WithdrawSd {
            amount: U256::from(200)
        }));
        assert_eq!(s.position.sd_utilizer_latest_balance, U256::ZERO);
        assert_eq!(s.position.sd_collateral_current_amount, U256::from(100));
        assert_eq!(s.reward_address_sd, U256::from(50));
    }

    #[test]
    fn test_partial_claim_pays_withdrawable_only() {
        let mut s = state();
        s.rewards = RewardClaimStatus {
            non_terminal_validator_count: 1,
            claims_balance: U256::from(50),
            withdrawable_in_eth: U256::from(30),
        };
        assert!(s.apply(&ContractCall::ClaimRewards));
        assert_eq!(s.reward_address_eth, U256::from(30));
        assert_eq!(s.rewards.claims_balance, U256::from(20));
    }

    #[tokio::test]
    async fn test_injected_failure_surfaces_as_rpc_error() {
        let chain = FixtureChain::new(state());
        chain.fail_on("sd_position", "connection refused");
        let err = chain.sd_position().await.unwrap_err();
        assert_eq!(err, ChainError::rpc("sd_position", "connection refused"));

        chain.clear_failures();
        assert!(chain.sd_position().await.is_ok());
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain-state.toml");
        let chain = FixtureChain::new(state());
        chain.save(&path).unwrap();

        let reloaded = FixtureChain::load(&path).unwrap();
        assert_eq!(reloaded.snapshot(), state());
    }
}
