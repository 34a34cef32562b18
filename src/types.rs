//! Core data types for the SD settlement engine
//!
//! Every token amount in this module is expressed in base units (18 decimals)
//! and held as a `U256`. Conversion to and from display strings happens only
//! in the CLI shell (see `units`).

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Transaction identifier returned by the chain on broadcast
pub type TxId = B256;

/// Snapshot of an operator's SD position
///
/// Read fresh for every operation and never cached across calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdPosition {
    /// SD held in the operator's spendable account
    #[serde(with = "serde_u256")]
    pub sd_balance: U256,

    /// SD currently locked as self-bonded collateral
    #[serde(with = "serde_u256")]
    pub sd_collateral_current_amount: U256,

    /// Outstanding utilization debt drawn against collateral (zero = no position)
    #[serde(with = "serde_u256")]
    pub sd_utilizer_latest_balance: U256,

    /// Protocol ceiling on collateral, derived from validator count
    #[serde(with = "serde_u256")]
    pub sd_max_collateral_amount: U256,

    /// SD in an in-flight unbonding request
    #[serde(default, with = "serde_u256")]
    pub sd_collateral_requested_to_withdraw: U256,

    /// Unlock time of the unbonding request (unix seconds)
    #[serde(default)]
    pub sd_collateral_withdraw_time: i64,

    /// Fee owed on the utilization debt
    #[serde(default, with = "serde_u256")]
    pub accumulated_interest: U256,
}

impl SdPosition {
    /// Self-bonded collateral plus utilized SD
    pub fn total_collateral(&self) -> U256 {
        self.sd_collateral_current_amount
            .saturating_add(self.sd_utilizer_latest_balance)
    }

    /// Collateral above the protocol ceiling, zero when there is none
    pub fn excess_collateral(&self) -> U256 {
        self.total_collateral()
            .saturating_sub(self.sd_max_collateral_amount)
    }

    pub fn has_open_utilization(&self) -> bool {
        !self.sd_utilizer_latest_balance.is_zero()
    }
}

/// Reward claim figures as reported by the chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaimStatus {
    /// Validators that have not reached a terminal state
    pub non_terminal_validator_count: u64,

    /// Total ETH rewards owed to the operator
    #[serde(with = "serde_u256")]
    pub claims_balance: U256,

    /// ETH claimable right now under the current health factor
    #[serde(with = "serde_u256")]
    pub withdrawable_in_eth: U256,
}

/// Derived claim eligibility, built per claim attempt and then dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEligibility {
    pub non_terminal_validator_count: u64,
    pub claims_balance: U256,
    pub withdrawable_in_eth: U256,
    pub has_open_utilization: bool,
}

impl ClaimEligibility {
    pub fn derive(status: &RewardClaimStatus, position: &SdPosition) -> Self {
        Self {
            non_terminal_validator_count: status.non_terminal_validator_count,
            claims_balance: status.claims_balance,
            withdrawable_in_eth: status.withdrawable_in_eth,
            has_open_utilization: position.has_open_utilization(),
        }
    }

    /// True when the chain reports a withdrawable amount different from the
    /// full balance, i.e. the health factor is limiting the claim
    pub fn is_health_factor_capped(&self) -> bool {
        self.withdrawable_in_eth != self.claims_balance
    }
}

/// The chain's own verdict on whether a collateral withdrawal is legal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLegality {
    pub insufficient_withdrawable_sd: bool,
    pub insufficient_sd_collateral: bool,
}

/// Socializing-pool (merkle distribution) reward cycle state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpRewardsStatus {
    #[serde(default)]
    pub paused: bool,

    /// Cycles with rewards not yet claimed by this operator
    #[serde(default)]
    pub unclaimed_cycles: Vec<u64>,

    /// Unclaimed cycles whose merkle proofs have not been fetched locally
    #[serde(default)]
    pub cycles_to_download: Vec<u64>,
}

/// Gas estimate for a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasInfo {
    pub estimated_gas_limit: u64,
    pub safe_gas_limit: u64,
}

impl Default for GasInfo {
    fn default() -> Self {
        Self {
            estimated_gas_limit: 90_000,
            safe_gas_limit: 135_000,
        }
    }
}

/// Operator-supplied gas overrides (wei and gas units)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSettings {
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub gas_limit: Option<u64>,
}

/// Options attached to a transaction right before signing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    /// Explicit nonce; `None` lets the signer assign the next pending nonce
    pub nonce: Option<u64>,
    pub gas_limit: u64,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Protocol calls the engine can submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ContractCall {
    ApproveSd {
        spender: Address,
        #[serde(with = "serde_u256")]
        amount: U256,
    },
    RepaySd {
        #[serde(with = "serde_u256")]
        amount: U256,
    },
    RepayExcessSd {
        #[serde(with = "serde_u256")]
        amount: U256,
    },
    WithdrawSd {
        #[serde(with = "serde_u256")]
        amount: U256,
    },
    ClaimRewards,
    ClaimSpRewards {
        cycles: Vec<u64>,
    },
    ClaimWithdrawnSd,
}

impl ContractCall {
    /// Short name used in logs and gas tables
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApproveSd { .. } => "approve",
            Self::RepaySd { .. } => "repay",
            Self::RepayExcessSd { .. } => "repay-excess",
            Self::WithdrawSd { .. } => "withdraw",
            Self::ClaimRewards => "claim",
            Self::ClaimSpRewards { .. } => "claim-cycles",
            Self::ClaimWithdrawnSd => "claim-withdrawn",
        }
    }

    pub fn amount(&self) -> Option<U256> {
        match self {
            Self::ApproveSd { amount, .. }
            | Self::RepaySd { amount }
            | Self::RepayExcessSd { amount }
            | Self::WithdrawSd { amount } => Some(*amount),
            Self::ClaimRewards | Self::ClaimSpRewards { .. } | Self::ClaimWithdrawnSd => None,
        }
    }
}

/// Receipt returned once a transaction is included in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionReceipt {
    pub tx_id: TxId,
    pub block_number: u64,
    pub success: bool,
}

/// Decimal-string serde for `U256`
///
/// TOML has no 256-bit integers, so amounts are written as decimal strings.
/// Plain integers and `0x` hex strings are accepted on input.
pub mod serde_u256 {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(u64),
    }

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(U256::from(v)),
            Raw::Str(s) => U256::from_str(s.trim()).map_err(serde::de::Error::custom),
        }
    }

    pub mod option {
        use alloy_primitives::U256;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] U256);

            let wrapped: Option<Wrapper> = Option::deserialize(deserializer)?;
            Ok(wrapped.map(|Wrapper(v)| v))
        }
    }
}
