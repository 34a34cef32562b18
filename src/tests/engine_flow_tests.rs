//! End-to-end engine flows against the fixture chain

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};

use super::test_helpers::*;
use crate::chain::{ChainClient, FixtureChain};
use crate::config::Config;
use crate::engine::{ActionOutcome, ActionReceipt};
use crate::errors::{EngineError, Rejection};
use crate::settlement::DebtSettlement;
use crate::structured_logging::ActionLogger;
use crate::tx_lifecycle::{
    CancellationHandle, ConfirmationRequest, Prompter, SubmissionOptions, TransactionIntent,
    TxLifecycle,
};
use crate::types::{ContractCall, GasSettings, RewardClaimStatus, SpRewardsStatus};

fn auto() -> SubmissionOptions {
    SubmissionOptions {
        auto_confirm: true,
        ..Default::default()
    }
}

fn interactive() -> SubmissionOptions {
    SubmissionOptions::default()
}

fn completed(outcome: ActionOutcome) -> ActionReceipt {
    match outcome {
        ActionOutcome::Completed(receipt) => receipt,
        other => panic!("expected a completed action, got {other:?}"),
    }
}

fn approved_state() -> crate::chain::FixtureState {
    let mut state = operator_state();
    state.allowance = U256::MAX;
    state
}

#[tokio::test]
async fn test_repay_includes_approval_before_estimating_repayment() {
    let h = harness(operator_state(), ScriptedPrompter::accepting());

    let receipt = completed(h.engine.repay(sd(50), &interactive()).await.unwrap());

    assert_eq!(h.prompter.asked(), vec!["approval", "transaction"]);
    assert_eq!(
        h.chain.estimated_calls(),
        vec![
            ContractCall::ApproveSd {
                spender: Address::repeat_byte(0x0b),
                amount: U256::MAX,
            },
            ContractCall::RepaySd { amount: sd(50) },
        ]
    );
    let sent = h.chain.sent_transactions();
    assert_eq!(sent.len(), 2);
    assert_eq!(receipt.approval_tx, Some(sent[0].tx_id));
    assert_eq!(receipt.tx_id, sent[1].tx_id);
    assert_eq!(receipt.final_amount, Some(sd(50)));
    assert_eq!(receipt.remaining_utilization, Some(sd(100)));
    assert_eq!(receipt.block_number, 2);

    let state = h.chain.snapshot();
    assert_eq!(state.position.sd_utilizer_latest_balance, sd(100));
    assert_eq!(state.position.sd_balance, sd(950));
}

#[tokio::test]
async fn test_repay_near_full_debt_closes_position() {
    let h = harness(approved_state(), ScriptedPrompter::accepting());

    let receipt = completed(h.engine.repay(sd(150) - U256::from(1), &auto()).await.unwrap());

    assert_eq!(receipt.final_amount, Some(sd(150)));
    assert_eq!(receipt.remaining_utilization, Some(U256::ZERO));
    assert!(h.prompter.asked().is_empty());
    assert!(!h.chain.snapshot().position.has_open_utilization());
}

#[tokio::test]
async fn test_repay_above_debt_rejected_without_writes() {
    let h = harness(approved_state(), ScriptedPrompter::accepting());

    let outcome = h.engine.repay(sd(151), &auto()).await.unwrap();

    assert_eq!(
        outcome,
        ActionOutcome::Rejected(Rejection::ExceedsUtilization {
            requested: sd(151),
            utilization: sd(150),
        })
    );
    assert!(h.chain.sent_transactions().is_empty());
    assert!(h.prompter.asked().is_empty());
}

#[tokio::test]
async fn test_declined_confirmation_sends_nothing() {
    let h = harness(approved_state(), ScriptedPrompter::declining());

    let outcome = h.engine.repay(sd(10), &interactive()).await.unwrap();

    assert_eq!(
        outcome,
        ActionOutcome::Cancelled {
            prompt: "transaction",
            approval_tx: None
        }
    );
    assert!(h.chain.sent_transactions().is_empty());
    assert_eq!(h.chain.snapshot(), approved_state());
}

#[tokio::test]
async fn test_declined_approval_stops_before_repayment() {
    let h = harness(operator_state(), ScriptedPrompter::declining());

    let outcome = h.engine.repay(sd(10), &interactive()).await.unwrap();

    assert_eq!(
        outcome,
        ActionOutcome::Cancelled {
            prompt: "approval",
            approval_tx: None
        }
    );
    assert!(h.chain.sent_transactions().is_empty());
    assert_eq!(h.chain.estimated_calls().len(), 1);
}

#[tokio::test]
async fn test_nonce_override_applies_to_first_transaction_only() {
    let h = harness(operator_state(), ScriptedPrompter::accepting());
    let options = SubmissionOptions {
        nonce_override: Some(12),
        ..auto()
    };

    completed(h.engine.repay(sd(10), &options).await.unwrap());

    let sent = h.chain.sent_transactions();
    assert_eq!(sent[0].options.nonce, Some(12));
    assert_eq!(sent[0].nonce, 12);
    assert_eq!(sent[1].options.nonce, None);
    assert_eq!(sent[1].nonce, 13);
}

#[tokio::test]
async fn test_unsafe_nonce_override_rejected_without_writes() {
    let h = harness(approved_state(), ScriptedPrompter::accepting());

    let ahead = SubmissionOptions {
        nonce_override: Some(13),
        ..auto()
    };
    assert_eq!(
        h.engine.repay(sd(10), &ahead).await.unwrap(),
        ActionOutcome::Rejected(Rejection::AheadOfPendingNonce {
            nonce: 13,
            pending: 12
        })
    );

    let stale = SubmissionOptions {
        nonce_override: Some(11),
        ..auto()
    };
    assert_eq!(
        h.engine.repay(sd(10), &stale).await.unwrap(),
        ActionOutcome::Rejected(Rejection::AlreadyIncluded {
            nonce: 11,
            mined: 12
        })
    );
    assert!(h.chain.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_gas_overrides_reach_the_signer() {
    let h = harness(approved_state(), ScriptedPrompter::accepting());
    let options = SubmissionOptions {
        gas: GasSettings {
            max_fee_per_gas: Some(40_000_000_000),
            max_priority_fee_per_gas: Some(2_000_000_000),
            gas_limit: Some(200_000),
        },
        ..auto()
    };

    completed(h.engine.claim_rewards(&options).await.unwrap());
    completed(h.engine.repay(sd(1), &auto()).await.unwrap());

    let sent = h.chain.sent_transactions();
    assert_eq!(sent[0].options.gas_limit, 200_000);
    assert_eq!(sent[0].options.max_fee_per_gas, Some(40_000_000_000));
    assert_eq!(sent[0].options.max_priority_fee_per_gas, Some(2_000_000_000));
    // Without overrides the estimate's safe limit is used
    assert_eq!(sent[1].options.gas_limit, 135_000);
    assert_eq!(sent[1].options.max_fee_per_gas, None);
}

#[tokio::test]
async fn test_repay_excess_uses_excess_amount() {
    let mut state = operator_state();
    state.position.sd_collateral_current_amount = sd(100);
    state.position.sd_utilizer_latest_balance = sd(20);
    state.position.sd_max_collateral_amount = sd(100);
    let h = harness(state, ScriptedPrompter::accepting());

    let receipt = completed(h.engine.repay_excess(&auto()).await.unwrap());

    assert_eq!(receipt.final_amount, Some(sd(20)));
    assert_eq!(
        h.chain.estimated_calls(),
        vec![ContractCall::RepayExcessSd { amount: sd(20) }]
    );
    assert!(!h.chain.snapshot().position.has_open_utilization());
}

#[tokio::test]
async fn test_repay_excess_without_excess_rejected() {
    let mut state = operator_state();
    state.position.sd_collateral_current_amount = sd(80);
    state.position.sd_utilizer_latest_balance = sd(20);
    state.position.sd_max_collateral_amount = sd(100);
    let h = harness(state, ScriptedPrompter::accepting());

    assert_eq!(
        h.engine.repay_excess(&auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::NoExcessCollateral)
    );
    assert!(h.chain.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_repay_excess_allowance_check_is_opt_in() {
    let mut config = Config::default();
    config.settlement.check_allowance_on_repay_excess = true;
    let h = engine_with(operator_state(), ScriptedPrompter::accepting(), &config);

    completed(h.engine.repay_excess(&auto()).await.unwrap());

    let kinds: Vec<_> = h
        .chain
        .sent_transactions()
        .iter()
        .map(|tx| tx.call.kind())
        .collect();
    assert_eq!(kinds, vec!["approve", "repay-excess"]);
}

#[tokio::test]
async fn test_withdraw_below_debt_always_asks_advisory() {
    let h = harness(operator_state(), ScriptedPrompter::declining());

    let outcome = h.engine.withdraw(sd(100), &auto()).await.unwrap();

    assert_eq!(
        outcome,
        ActionOutcome::Cancelled {
            prompt: "withdraw-debt-settlement",
            approval_tx: None
        }
    );
    assert_eq!(
        h.prompter.requests(),
        vec![ConfirmationRequest::WithdrawDebtSettlement {
            amount: sd(100),
            settlement: DebtSettlement::ConsumedByDebt { debt: sd(150) },
        }]
    );
    assert!(h.chain.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_withdraw_above_debt_sends_remainder() {
    let h = harness(operator_state(), ScriptedPrompter::accepting());

    let receipt = completed(h.engine.withdraw(sd(200), &auto()).await.unwrap());

    assert_eq!(h.prompter.asked(), vec!["withdraw-debt-settlement"]);
    assert!(matches!(
        h.prompter.requests()[0],
        ConfirmationRequest::WithdrawDebtSettlement {
            settlement: DebtSettlement::RepaidWithRemainder { .. },
            ..
        }
    ));
    assert_eq!(receipt.settled_debt, Some(sd(150)));
    assert_eq!(receipt.remaining_utilization, Some(U256::ZERO));

    let state = h.chain.snapshot();
    assert_eq!(state.reward_address_sd, sd(50));
    assert_eq!(state.position.sd_collateral_current_amount, sd(100));
}

#[tokio::test]
async fn test_withdraw_rejections() {
    let mut state = operator_state();
    state.collateral_ratio_locked = true;
    let h = harness(state, ScriptedPrompter::accepting());

    assert_eq!(
        h.engine.withdraw(U256::ZERO, &auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::ZeroAmount)
    );
    assert_eq!(
        h.engine.withdraw(sd(10), &auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::CollateralBelowMinimumRatio)
    );
    assert_eq!(
        h.engine.withdraw(sd(301), &auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::InsufficientWithdrawableCollateral)
    );
    assert!(h.chain.sent_transactions().is_empty());
}

fn capped_rewards_state() -> crate::chain::FixtureState {
    let mut state = operator_state();
    state.position.sd_utilizer_latest_balance = sd(20);
    state.rewards = RewardClaimStatus {
        non_terminal_validator_count: 3,
        claims_balance: sd(50),
        withdrawable_in_eth: sd(30),
    };
    state
}

#[tokio::test]
async fn test_partial_claim_accepted() {
    let h = harness(capped_rewards_state(), ScriptedPrompter::accepting());

    let receipt = completed(h.engine.claim_rewards(&auto()).await.unwrap());

    assert_eq!(h.prompter.asked(), vec!["partial-claim"]);
    assert_eq!(receipt.final_amount, Some(sd(30)));
    assert_eq!(h.chain.snapshot().reward_address_eth, sd(30));
}

#[tokio::test]
async fn test_partial_claim_declined_requires_repayment() {
    let h = harness(capped_rewards_state(), ScriptedPrompter::declining());

    let outcome = h.engine.claim_rewards(&auto()).await.unwrap();

    assert_eq!(
        outcome,
        ActionOutcome::RepayRequired {
            outstanding_debt: sd(20),
            full_balance: sd(50),
        }
    );
    assert!(h.chain.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_claim_blocked_when_interest_not_covered() {
    let mut state = operator_state();
    state.position.sd_collateral_current_amount = sd(5);
    state.position.accumulated_interest = sd(8);
    state.rewards.non_terminal_validator_count = 0;
    let h = harness(state, ScriptedPrompter::accepting());

    assert_eq!(
        h.engine.claim_rewards(&auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::InterestNotCovered {
            required: sd(8),
            available: sd(5),
            shortfall: sd(3),
        })
    );
}

#[tokio::test]
async fn test_claim_without_rewards() {
    let mut state = operator_state();
    state.rewards.claims_balance = U256::ZERO;
    let h = harness(state, ScriptedPrompter::accepting());

    assert_eq!(
        h.engine.claim_rewards(&auto()).await.unwrap(),
        ActionOutcome::NothingToClaim
    );
}

fn cycles_state(to_download: Vec<u64>) -> crate::chain::FixtureState {
    let mut state = operator_state();
    state.sp_rewards = SpRewardsStatus {
        paused: false,
        unclaimed_cycles: vec![1, 2, 5],
        cycles_to_download: to_download,
    };
    state
}

#[tokio::test]
async fn test_cycle_selection_with_unknown_cycle_rejects_batch() {
    let h = harness(cycles_state(vec![]), ScriptedPrompter::accepting());

    assert_eq!(
        h.engine
            .claim_sp_rewards(Some("1,5,9"), false, &auto())
            .await
            .unwrap(),
        ActionOutcome::Rejected(Rejection::InvalidCycleSelection {
            invalid: vec!["9".to_string()]
        })
    );
    assert!(h.chain.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_cycle_selection_claims_chosen_cycles() {
    let h = harness(cycles_state(vec![]), ScriptedPrompter::accepting());

    let receipt = completed(
        h.engine
            .claim_sp_rewards(Some("5, 1"), false, &auto())
            .await
            .unwrap(),
    );

    assert_eq!(receipt.cycles, Some(vec![1, 5]));
    assert_eq!(h.chain.snapshot().sp_rewards.unclaimed_cycles, vec![2]);
}

#[tokio::test]
async fn test_missing_proofs_need_download() {
    let h = harness(cycles_state(vec![5]), ScriptedPrompter::accepting());

    assert_eq!(
        h.engine.claim_sp_rewards(None, false, &auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::ProofsMissing { cycles: vec![5] })
    );

    let receipt = completed(
        h.engine
            .claim_sp_rewards(None, true, &interactive())
            .await
            .unwrap(),
    );
    assert_eq!(h.prompter.asked(), vec!["download-proofs", "transaction"]);
    assert_eq!(receipt.cycles, Some(vec![1, 2, 5]));
}

#[tokio::test]
async fn test_paused_pool_blocks_cycle_claims() {
    let mut state = cycles_state(vec![]);
    state.sp_rewards.paused = true;
    let h = harness(state, ScriptedPrompter::accepting());

    assert_eq!(
        h.engine.claim_sp_rewards(None, true, &auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::SocializingPoolPaused)
    );
}

#[tokio::test]
async fn test_tx_id_surfaced_before_inclusion() {
    let h = harness(operator_state(), ScriptedPrompter::accepting());

    let receipt = completed(h.engine.claim_rewards(&auto()).await.unwrap());

    let surfaced = h.prompter.surfaced();
    assert_eq!(surfaced.len(), 1);
    assert_eq!(surfaced[0].tx_id, receipt.tx_id);
    assert_eq!(surfaced[0].call, "claim");
    assert_eq!(surfaced[0].block_at_notify, 0);
    assert_eq!(receipt.block_number, 1);
}

#[tokio::test(start_paused = true)]
async fn test_inclusion_wait_is_bounded_by_timeout() {
    let mut config = Config::default();
    config.transactions.inclusion_timeout_secs = 30;
    let h = engine_with(approved_state(), ScriptedPrompter::accepting(), &config);
    h.chain.stall_inclusion(true);

    let err = h.engine.repay(sd(10), &auto()).await.unwrap_err();

    let sent = h.chain.sent_transactions();
    assert!(matches!(
        err,
        EngineError::InclusionTimeout { tx_id, waited_secs: 30 } if tx_id == sent[0].tx_id
    ));
    assert_eq!(h.prompter.surfaced().len(), 1);
}

#[tokio::test]
async fn test_inclusion_wait_can_be_cancelled() {
    let h = harness(approved_state(), ScriptedPrompter::accepting());
    h.chain.stall_inclusion(true);
    h.prompter.cancel_on_submit(h.engine.cancellation_handle());

    let err = h.engine.repay(sd(10), &auto()).await.unwrap_err();

    assert!(matches!(err, EngineError::InclusionCancelled { .. }));
    assert_eq!(err.tx_id(), Some(h.chain.sent_transactions()[0].tx_id));
}

#[tokio::test]
async fn test_chain_failure_is_fatal_and_not_retried() {
    let h = harness(approved_state(), ScriptedPrompter::accepting());
    h.chain.fail_on("estimate_gas", "node unavailable");

    let err = h.engine.repay(sd(10), &auto()).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Chain {
            operation: "estimate gas",
            ..
        }
    ));
    assert!(h.chain.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_reverted_receipt_is_an_error() {
    let chain = Arc::new(FixtureChain::new(cycles_state(vec![])));
    let prompter: Arc<dyn Prompter> = Arc::new(ScriptedPrompter::accepting());
    let lifecycle = TxLifecycle::new(
        chain.clone() as Arc<dyn ChainClient>,
        prompter,
        Duration::from_secs(5),
        CancellationHandle::new(),
    );
    let intent = TransactionIntent::new(ContractCall::ClaimSpRewards { cycles: vec![99] }, &auto());

    let err = lifecycle
        .execute(intent, true, &ActionLogger::new("claim-sp-rewards"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Reverted { block_number: 1, .. }));
}

#[tokio::test]
async fn test_claim_withdrawn_sd_follows_unbonding_state() {
    let mut state = operator_state();
    state.position.sd_collateral_requested_to_withdraw = sd(10);
    state.position.sd_collateral_withdraw_time = 1_000;
    let h = harness(state, ScriptedPrompter::accepting());

    let before = DateTime::<Utc>::from_timestamp(999, 0).unwrap();
    assert_eq!(
        h.engine.claim_withdrawn_sd(before, &auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::UnbondingInProgress {
            amount: sd(10),
            unlocks_at: 1_000,
        })
    );

    let at = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
    let receipt = completed(h.engine.claim_withdrawn_sd(at, &auto()).await.unwrap());
    assert_eq!(receipt.final_amount, Some(sd(10)));
    assert_eq!(h.chain.snapshot().position.sd_balance, sd(1_010));

    assert_eq!(
        h.engine.claim_withdrawn_sd(at, &auto()).await.unwrap(),
        ActionOutcome::Rejected(Rejection::NoWithdrawRequest)
    );
}

#[tokio::test]
async fn test_status_reports_excess() {
    let h = harness(operator_state(), ScriptedPrompter::accepting());

    let report = h.engine.status(Utc::now()).await.unwrap();

    assert_eq!(report.total_collateral, sd(450));
    assert_eq!(report.excess_collateral, sd(50));
    assert_eq!(report.operator, Address::repeat_byte(0x0a));
}

#[tokio::test]
async fn test_declined_repayment_reports_included_approval() {
    let h = harness(operator_state(), ScriptedPrompter::answering(&[true, false]));

    let outcome = h.engine.repay(sd(10), &interactive()).await.unwrap();

    let sent = h.chain.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        outcome,
        ActionOutcome::Cancelled {
            prompt: "transaction",
            approval_tx: Some(sent[0].tx_id)
        }
    );
    assert_eq!(h.prompter.asked(), vec!["approval", "transaction"]);
    assert_eq!(h.chain.snapshot().allowance, U256::MAX);
    assert_eq!(
        h.chain.snapshot().position.sd_utilizer_latest_balance,
        operator_state().position.sd_utilizer_latest_balance
    );
}
