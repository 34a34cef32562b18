//! Claim gate
//!
//! Decides whether operator ETH rewards and socializing-pool reward cycles
//! can be claimed, and parses the operator's cycle selection.

use alloy_primitives::U256;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::Rejection;
use crate::types::{ClaimEligibility, SdPosition, SpRewardsStatus};

static CYCLE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+$").expect("valid cycle number pattern"));

/// Verdict on an operator reward claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Nothing is owed to the operator
    NoRewards,

    Blocked(Rejection),

    /// The health factor caps the claim while utilization is open
    PartialOnly {
        claimable_now: U256,
        full_balance: U256,
        outstanding_debt: U256,
    },

    Claimable { amount: U256 },
}

pub fn evaluate_claim(eligibility: &ClaimEligibility, position: &SdPosition) -> ClaimDecision {
    if eligibility.claims_balance.is_zero() {
        return ClaimDecision::NoRewards;
    }

    if eligibility.non_terminal_validator_count == 0 {
        let required = position.accumulated_interest;
        let available = position.sd_collateral_current_amount;
        if available < required {
            return ClaimDecision::Blocked(Rejection::InterestNotCovered {
                required,
                available,
                shortfall: required - available,
            });
        }
    } else if eligibility.is_health_factor_capped() && eligibility.has_open_utilization {
        return ClaimDecision::PartialOnly {
            claimable_now: eligibility.withdrawable_in_eth,
            full_balance: eligibility.claims_balance,
            outstanding_debt: position.sd_utilizer_latest_balance,
        };
    }

    ClaimDecision::Claimable {
        amount: eligibility.claims_balance,
    }
}

/// Verdict on a socializing-pool reward cycle claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleGate {
    NoRewards,

    Blocked(Rejection),

    /// Proofs for `cycles` must be fetched before claiming
    NeedsDownload { cycles: Vec<u64> },

    Ready { unclaimed: Vec<u64> },
}

pub fn evaluate_cycle_claim(status: &SpRewardsStatus, download_requested: bool) -> CycleGate {
    if status.paused {
        return CycleGate::Blocked(Rejection::SocializingPoolPaused);
    }
    if status.unclaimed_cycles.is_empty() {
        return CycleGate::NoRewards;
    }
    if !status.cycles_to_download.is_empty() {
        let cycles = status.cycles_to_download.iter().copied().sorted().dedup().collect();
        return if download_requested {
            CycleGate::NeedsDownload { cycles }
        } else {
            CycleGate::Blocked(Rejection::ProofsMissing { cycles })
        };
    }
    CycleGate::Ready {
        unclaimed: status.unclaimed_cycles.clone(),
    }
}

/// Parse a cycle selection against the unclaimed set
///
/// An empty selection or `all` selects every unclaimed cycle. Otherwise the
/// selection is a comma-separated list; one bad element rejects the batch.
pub fn select_cycles(selection: &str, unclaimed: &[u64]) -> Result<Vec<u64>, Rejection> {
    let selection = selection.trim();
    if selection.is_empty() || selection.eq_ignore_ascii_case("all") {
        return Ok(unclaimed.iter().copied().sorted().dedup().collect());
    }

    let mut selected = Vec::new();
    let mut invalid = Vec::new();
    for raw in selection.split(',').map(str::trim) {
        let cycle = CYCLE_NUMBER
            .is_match(raw)
            .then(|| raw.parse::<u64>().ok())
            .flatten()
            .filter(|c| unclaimed.contains(c));
        match cycle {
            Some(c) => selected.push(c),
            None => invalid.push(raw.to_string()),
        }
    }

    if !invalid.is_empty() {
        return Err(Rejection::InvalidCycleSelection { invalid });
    }
    Ok(selected.into_iter().sorted().dedup().collect())
}
