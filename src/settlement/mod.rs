//! Settlement calculators
//!
//! Pure functions that decide whether a repayment, withdrawal or claim is
//! legal right now and compute its exact amount. They take a position
//! snapshot and return a plan or a [`Rejection`](crate::errors::Rejection);
//! none of them issue transactions.

pub mod claim;
pub mod repay;
pub mod withdraw;

pub use claim::{evaluate_claim, evaluate_cycle_claim, select_cycles, ClaimDecision, CycleGate};
pub use repay::{almost_equal, plan_repay, plan_repay_excess, RepayPlan};
pub use withdraw::{plan_withdraw, DebtSettlement, WithdrawPlan};
