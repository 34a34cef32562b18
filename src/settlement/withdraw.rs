//! Withdrawal calculator
//!
//! A collateral withdrawal with open utilization repays the debt first. The
//! plan records which of the two cases applies so the operator can be shown
//! the matching advisory before anything is signed.

use alloy_primitives::U256;

use crate::errors::Rejection;
use crate::types::{SdPosition, WithdrawLegality};

/// How a withdrawal interacts with outstanding utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebtSettlement {
    /// No debt, the full amount reaches the reward address
    NoDebt,

    /// The whole withdrawal goes to repaying `debt`; nothing reaches the reward address
    ConsumedByDebt { debt: U256 },

    /// `debt` is repaid in full and `remainder` reaches the reward address
    RepaidWithRemainder { debt: U256, remainder: U256 },
}

impl DebtSettlement {
    pub fn requires_advisory(&self) -> bool {
        !matches!(self, Self::NoDebt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawPlan {
    /// Requested amount (never snapped)
    pub amount: U256,

    /// Debt the withdrawal will settle: `min(utilization, amount)`
    pub settled_debt: U256,

    pub settlement: DebtSettlement,
}

/// Plan a collateral withdrawal of `requested` SD
pub fn plan_withdraw(
    requested: U256,
    position: &SdPosition,
    legality: &WithdrawLegality,
) -> Result<WithdrawPlan, Rejection> {
    if requested.is_zero() {
        return Err(Rejection::ZeroAmount);
    }
    if legality.insufficient_withdrawable_sd {
        return Err(Rejection::InsufficientWithdrawableCollateral);
    }
    if legality.insufficient_sd_collateral {
        return Err(Rejection::CollateralBelowMinimumRatio);
    }

    let debt = position.sd_utilizer_latest_balance;
    let settlement = if debt.is_zero() {
        DebtSettlement::NoDebt
    } else if debt >= requested {
        DebtSettlement::ConsumedByDebt { debt }
    } else {
        DebtSettlement::RepaidWithRemainder {
            debt,
            remainder: requested - debt,
        }
    };

    Ok(WithdrawPlan {
        amount: requested,
        settled_debt: debt.min(requested),
        settlement,
    })
}
