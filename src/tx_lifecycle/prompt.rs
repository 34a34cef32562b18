//! Operator prompt seam
//!
//! The engine asks questions through [`Prompter`] and never renders text
//! itself. Advisory confirmations (debt settlement on withdraw, partial
//! claim) are always asked, even when the operator passed `--yes`.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use tracing::debug;

use crate::errors::EngineResult;
use crate::settlement::DebtSettlement;
use crate::types::{ContractCall, TxId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationRequest {
    /// Unbounded SD approval for the utility contract
    Approval {
        spender: Address,
        amount: U256,
        gas_limit: u64,
    },

    /// Final check before signing an action
    Transaction { call: ContractCall, gas_limit: u64 },

    WithdrawDebtSettlement {
        amount: U256,
        settlement: DebtSettlement,
    },

    PartialClaim {
        claimable_now: U256,
        full_balance: U256,
        outstanding_debt: U256,
    },

    DownloadProofs { cycles: Vec<u64> },
}

impl ConfirmationRequest {
    /// Advisory prompts are never skipped by auto-confirm
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            Self::WithdrawDebtSettlement { .. } | Self::PartialClaim { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Approval { .. } => "approval",
            Self::Transaction { .. } => "transaction",
            Self::WithdrawDebtSettlement { .. } => "withdraw-debt-settlement",
            Self::PartialClaim { .. } => "partial-claim",
            Self::DownloadProofs { .. } => "download-proofs",
        }
    }
}

#[async_trait]
pub trait Prompter: Send + Sync {
    /// `Ok(false)` means the operator declined
    async fn confirm(&self, request: &ConfirmationRequest) -> EngineResult<bool>;

    /// Raw cycle selection text ("", "all" or "1,2,5")
    async fn select_cycles(&self, unclaimed: &[u64]) -> EngineResult<String>;

    /// Called right after broadcast, before inclusion is awaited
    async fn transaction_submitted(&self, tx_id: &TxId, call: &ContractCall);
}

/// Ask `request` unless auto-confirm applies to it
pub async fn confirm_or_auto(
    prompter: &dyn Prompter,
    request: &ConfirmationRequest,
    auto_confirm: bool,
) -> EngineResult<bool> {
    if auto_confirm && !request.is_advisory() {
        debug!(prompt = request.name(), "Auto-confirmed");
        return Ok(true);
    }
    prompter.confirm(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        asked: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Prompter for Recording {
        async fn confirm(&self, request: &ConfirmationRequest) -> EngineResult<bool> {
            self.asked.lock().push(request.name());
            Ok(false)
        }

        async fn select_cycles(&self, _unclaimed: &[u64]) -> EngineResult<String> {
            Ok(String::new())
        }

        async fn transaction_submitted(&self, _tx_id: &TxId, _call: &ContractCall) {}
    }

    #[tokio::test]
    async fn test_auto_confirm_skips_plain_prompts() {
        let prompter = Recording::default();
        let request = ConfirmationRequest::Transaction {
            call: ContractCall::ClaimRewards,
            gas_limit: 100_000,
        };
        assert!(confirm_or_auto(&prompter, &request, true).await.unwrap());
        assert!(prompter.asked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_advisory_prompts_always_asked() {
        let prompter = Recording::default();
        let request = ConfirmationRequest::PartialClaim {
            claimable_now: U256::from(30),
            full_balance: U256::from(50),
            outstanding_debt: U256::from(20),
        };
        assert!(!confirm_or_auto(&prompter, &request, true).await.unwrap());
        assert_eq!(*prompter.asked.lock(), vec!["partial-claim"]);
    }
}
