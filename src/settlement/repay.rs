//! Repayment calculator
//!
//! Computes the amount of a utilization repayment, snapping requests that
//! are within tolerance of the outstanding debt to the exact debt so a
//! position can be closed without leaving dust behind.

use alloy_primitives::{U256, U512};

use crate::config::SettlementConfig;
use crate::errors::Rejection;
use crate::types::SdPosition;

const PPB: u64 = 1_000_000_000;

/// Outcome of a successful repayment calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepayPlan {
    /// Final amount to repay (after snapping)
    pub amount: U256,

    /// An approval must be included before the repayment is built
    pub requires_approval: bool,

    /// Utilization left after the repayment, as of the snapshot
    pub remaining_utilization: U256,

    /// The request was snapped to the full debt
    pub snapped: bool,
}

/// Relative closeness test: `|a - b| * 1e9 <= tolerance_ppb * max(a, b)`
pub fn almost_equal(a: U256, b: U256, tolerance_ppb: u64) -> bool {
    let diff = if a > b { a - b } else { b - a };
    let scale = a.max(b);
    // Products are taken at 512 bits so neither side can wrap or saturate
    let lhs: U512 = diff.widening_mul(U256::from(PPB));
    let rhs: U512 = scale.widening_mul(U256::from(tolerance_ppb));
    lhs <= rhs
}

/// Snap `amount` to `utilization` when they are almost equal
fn snap(amount: U256, utilization: U256, settings: &SettlementConfig) -> (U256, bool) {
    if amount != utilization && almost_equal(amount, utilization, settings.repay_tolerance_ppb) {
        (utilization, true)
    } else {
        (amount, false)
    }
}

/// Plan a repayment of `requested` SD from the operator's account
pub fn plan_repay(
    requested: U256,
    position: &SdPosition,
    allowance: U256,
    settings: &SettlementConfig,
) -> Result<RepayPlan, Rejection> {
    let utilization = position.sd_utilizer_latest_balance;
    if utilization.is_zero() {
        return Err(Rejection::NoOpenPosition);
    }
    if requested.is_zero() {
        return Err(Rejection::ZeroAmount);
    }

    let (amount, snapped) = snap(requested, utilization, settings);
    if amount > utilization {
        return Err(Rejection::ExceedsUtilization {
            requested: amount,
            utilization,
        });
    }
    if amount > position.sd_balance {
        return Err(Rejection::InsufficientBalance {
            requested: amount,
            available: position.sd_balance,
        });
    }

    Ok(RepayPlan {
        amount,
        requires_approval: allowance < amount,
        remaining_utilization: utilization - amount,
        snapped,
    })
}

/// Plan a repayment of the debt from excess collateral
///
/// `allowance` is only consulted when supplied; the protocol does not pull
/// from the operator account for this call.
pub fn plan_repay_excess(
    position: &SdPosition,
    allowance: Option<U256>,
    settings: &SettlementConfig,
) -> Result<RepayPlan, Rejection> {
    let utilization = position.sd_utilizer_latest_balance;
    if utilization.is_zero() {
        return Err(Rejection::NoOpenPosition);
    }
    let excess = position.excess_collateral();
    if excess.is_zero() {
        return Err(Rejection::NoExcessCollateral);
    }

    let (snapped_amount, snapped) = snap(excess, utilization, settings);
    let amount = snapped_amount.min(utilization);

    Ok(RepayPlan {
        amount,
        requires_approval: allowance.is_some_and(|a| a < amount),
        remaining_utilization: utilization - amount,
        snapped,
    })
}
