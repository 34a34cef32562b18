//! Position reader
//!
//! Reads the operator's SD position and reward figures fresh from the chain
//! for every operation. Nothing is cached between calls.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chain::ChainClient;
use crate::errors::{EngineError, EngineResult};
use crate::types::{serde_u256, ClaimEligibility, RewardClaimStatus, SdPosition};

/// State of the operator's collateral unbonding request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CollateralWithdrawState {
    None,
    Pending {
        #[serde(with = "serde_u256")]
        amount: U256,
        unlocks_at: DateTime<Utc>,
    },
    Claimable {
        #[serde(with = "serde_u256")]
        amount: U256,
    },
}

impl CollateralWithdrawState {
    pub fn from_position(position: &SdPosition, now: DateTime<Utc>) -> Self {
        let amount = position.sd_collateral_requested_to_withdraw;
        if amount.is_zero() {
            return Self::None;
        }
        let unlocks_at =
            DateTime::from_timestamp(position.sd_collateral_withdraw_time, 0).unwrap_or_default();
        if now >= unlocks_at {
            Self::Claimable { amount }
        } else {
            Self::Pending { amount, unlocks_at }
        }
    }
}

/// Point-in-time summary of an operator's SD position
#[derive(Debug, Clone, Serialize)]
pub struct PositionReport {
    pub operator: Address,
    pub position: SdPosition,
    #[serde(with = "serde_u256")]
    pub total_collateral: U256,
    #[serde(with = "serde_u256")]
    pub excess_collateral: U256,
    pub withdraw_state: CollateralWithdrawState,
    pub rewards: RewardClaimStatus,
}

pub struct PositionReader {
    chain: Arc<dyn ChainClient>,
}

impl PositionReader {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    pub async fn read(&self) -> EngineResult<SdPosition> {
        self.chain
            .sd_position()
            .await
            .map_err(|e| EngineError::chain("read position", e))
    }

    /// Claim eligibility together with the position it was derived from
    pub async fn eligibility(&self) -> EngineResult<(ClaimEligibility, SdPosition)> {
        let position = self.read().await?;
        let status = self
            .chain
            .reward_claim_status()
            .await
            .map_err(|e| EngineError::chain("read reward claim status", e))?;
        Ok((ClaimEligibility::derive(&status, &position), position))
    }

    pub async fn report(&self, now: DateTime<Utc>) -> EngineResult<PositionReport> {
        let position = self.read().await?;
        let rewards = self
            .chain
            .reward_claim_status()
            .await
            .map_err(|e| EngineError::chain("read reward claim status", e))?;
        Ok(PositionReport {
            operator: self.chain.operator_address(),
            total_collateral: position.total_collateral(),
            excess_collateral: position.excess_collateral(),
            withdraw_state: CollateralWithdrawState::from_position(&position, now),
            position,
            rewards,
        })
    }
}
