//! Settlement engine
//!
//! Entry points for every operator action. Each operation reads a fresh
//! position, runs the matching calculator, asks the advisory questions the
//! plan calls for and hands the resulting intent to the lifecycle
//! orchestrator. The result is a structured [`ActionOutcome`]; rendering is
//! left to the caller.

use std::sync::Arc;

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::chain::ChainClient;
use crate::config::{Config, SettlementConfig};
use crate::errors::{EngineError, EngineResult, Rejection};
use crate::position::{CollateralWithdrawState, PositionReader, PositionReport};
use crate::settlement::{
    evaluate_claim, evaluate_cycle_claim, plan_repay, plan_repay_excess, plan_withdraw,
    select_cycles, ClaimDecision, CycleGate, RepayPlan,
};
use crate::structured_logging::ActionLogger;
use crate::tx_lifecycle::{
    confirm_or_auto, CancellationHandle, ConfirmationRequest, LifecycleOutcome, Prompter,
    SubmissionOptions, TransactionIntent, TxLifecycle,
};
use crate::types::{serde_u256, ContractCall, InclusionReceipt, TxId};

/// Result of an operator action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// A precondition failed; nothing was written to the chain
    Rejected(Rejection),

    /// The operator declined a confirmation
    Cancelled {
        prompt: &'static str,

        /// Approval already included before the declined prompt
        #[serde(skip_serializing_if = "Option::is_none")]
        approval_tx: Option<TxId>,
    },

    NothingToClaim,

    /// Partial claim declined; the debt must be repaid to claim in full
    RepayRequired {
        #[serde(with = "serde_u256")]
        outstanding_debt: U256,
        #[serde(with = "serde_u256")]
        full_balance: U256,
    },

    Completed(ActionReceipt),
}

/// What an included action did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReceipt {
    pub action: &'static str,
    pub tx_id: TxId,
    pub block_number: u64,

    #[serde(with = "serde_u256::option", skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<U256>,

    #[serde(with = "serde_u256::option", skip_serializing_if = "Option::is_none")]
    pub settled_debt: Option<U256>,

    /// Projected from the pre-action snapshot
    #[serde(with = "serde_u256::option", skip_serializing_if = "Option::is_none")]
    pub remaining_utilization: Option<U256>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx: Option<TxId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles: Option<Vec<u64>>,
}

impl ActionReceipt {
    fn new(action: &'static str, receipt: &InclusionReceipt, approval: Option<&InclusionReceipt>) -> Self {
        Self {
            action,
            tx_id: receipt.tx_id,
            block_number: receipt.block_number,
            final_amount: None,
            settled_debt: None,
            remaining_utilization: None,
            approval_tx: approval.map(|a| a.tx_id),
            cycles: None,
        }
    }
}

/// Either continue with a value or stop with an outcome
enum Step<T> {
    Proceed(T),
    Stop(ActionOutcome),
}

pub struct SettlementEngine {
    chain: Arc<dyn ChainClient>,
    prompter: Arc<dyn Prompter>,
    reader: PositionReader,
    lifecycle: TxLifecycle,
    settings: SettlementConfig,
    cancellation: CancellationHandle,
}

impl SettlementEngine {
    pub fn new(chain: Arc<dyn ChainClient>, prompter: Arc<dyn Prompter>, config: &Config) -> Self {
        let cancellation = CancellationHandle::new();
        Self {
            reader: PositionReader::new(chain.clone()),
            lifecycle: TxLifecycle::new(
                chain.clone(),
                prompter.clone(),
                config.transactions.inclusion_timeout(),
                cancellation.clone(),
            ),
            settings: config.settlement,
            chain,
            prompter,
            cancellation,
        }
    }

    /// Handle that aborts any inclusion wait in progress
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    pub async fn status(&self, now: DateTime<Utc>) -> EngineResult<PositionReport> {
        self.reader.report(now).await
    }

    /// Repay `amount` of utilization debt from the operator account
    pub async fn repay(&self, amount: U256, options: &SubmissionOptions) -> EngineResult<ActionOutcome> {
        let logger = ActionLogger::new("repay");
        let position = self.reader.read().await?;
        let allowance = self.allowance().await?;

        let plan = match plan_repay(amount, &position, allowance, &self.settings) {
            Ok(plan) => plan,
            Err(rejection) => return Ok(rejected(&logger, rejection)),
        };
        if plan.snapped {
            debug!(requested = %amount, snapped_to = %plan.amount, "Repayment snapped to full debt");
        }

        let call = ContractCall::RepaySd { amount: plan.amount };
        self.run_repay("repay", call, plan, options, &logger).await
    }

    /// Repay utilization debt from excess collateral
    pub async fn repay_excess(&self, options: &SubmissionOptions) -> EngineResult<ActionOutcome> {
        let logger = ActionLogger::new("repay-excess");
        let position = self.reader.read().await?;
        let allowance = if self.settings.check_allowance_on_repay_excess {
            Some(self.allowance().await?)
        } else {
            None
        };

        let plan = match plan_repay_excess(&position, allowance, &self.settings) {
            Ok(plan) => plan,
            Err(rejection) => return Ok(rejected(&logger, rejection)),
        };
        if allowance.is_none() {
            logger.warn("SD allowance not checked for repayment from excess collateral");
        }

        let call = ContractCall::RepayExcessSd { amount: plan.amount };
        self.run_repay("repay-excess", call, plan, options, &logger).await
    }

    async fn run_repay(
        &self,
        action: &'static str,
        call: ContractCall,
        plan: RepayPlan,
        options: &SubmissionOptions,
        logger: &ActionLogger,
    ) -> EngineResult<ActionOutcome> {
        logger.log_plan(&call, plan.requires_approval);
        let intent = TransactionIntent::new(call, options).with_approval(plan.requires_approval);
        let result = self.lifecycle.execute(intent, options.auto_confirm, logger).await;

        finish(logger, result, |receipt, approval| ActionReceipt {
            final_amount: Some(plan.amount),
            settled_debt: Some(plan.amount),
            remaining_utilization: Some(plan.remaining_utilization),
            ..ActionReceipt::new(action, receipt, approval)
        })
    }

    /// Withdraw self-bonded collateral; open debt is repaid first
    pub async fn withdraw(&self, amount: U256, options: &SubmissionOptions) -> EngineResult<ActionOutcome> {
        let logger = ActionLogger::new("withdraw");
        if amount.is_zero() {
            return Ok(rejected(&logger, Rejection::ZeroAmount));
        }

        let position = self.reader.read().await?;
        let legality = self
            .chain
            .can_withdraw_sd(amount)
            .await
            .map_err(|e| EngineError::chain("check withdrawal", e))?;

        let plan = match plan_withdraw(amount, &position, &legality) {
            Ok(plan) => plan,
            Err(rejection) => return Ok(rejected(&logger, rejection)),
        };

        if plan.settlement.requires_advisory() {
            let request = ConfirmationRequest::WithdrawDebtSettlement {
                amount,
                settlement: plan.settlement,
            };
            if !confirm_or_auto(self.prompter.as_ref(), &request, options.auto_confirm).await? {
                logger.log_cancelled(request.name());
                return Ok(ActionOutcome::Cancelled {
                    prompt: request.name(),
                    approval_tx: None,
                });
            }
        }

        let call = ContractCall::WithdrawSd { amount };
        logger.log_plan(&call, false);
        let intent = TransactionIntent::new(call, options);
        let result = self.lifecycle.execute(intent, options.auto_confirm, &logger).await;

        let remaining = position.sd_utilizer_latest_balance - plan.settled_debt;
        finish(&logger, result, |receipt, approval| ActionReceipt {
            final_amount: Some(plan.amount),
            settled_debt: Some(plan.settled_debt),
            remaining_utilization: Some(remaining),
            ..ActionReceipt::new("withdraw", receipt, approval)
        })
    }

    /// Claim operator ETH rewards
    pub async fn claim_rewards(&self, options: &SubmissionOptions) -> EngineResult<ActionOutcome> {
        let logger = ActionLogger::new("claim-rewards");
        let (eligibility, position) = self.reader.eligibility().await?;

        let amount = match evaluate_claim(&eligibility, &position) {
            ClaimDecision::NoRewards => {
                info!("No rewards to claim");
                return Ok(ActionOutcome::NothingToClaim);
            }
            ClaimDecision::Blocked(rejection) => return Ok(rejected(&logger, rejection)),
            ClaimDecision::PartialOnly {
                claimable_now,
                full_balance,
                outstanding_debt,
            } => {
                let request = ConfirmationRequest::PartialClaim {
                    claimable_now,
                    full_balance,
                    outstanding_debt,
                };
                if !confirm_or_auto(self.prompter.as_ref(), &request, options.auto_confirm).await? {
                    info!(
                        outstanding_debt = %outstanding_debt,
                        full_balance = %full_balance,
                        "Partial claim declined, repayment required for a full claim"
                    );
                    return Ok(ActionOutcome::RepayRequired {
                        outstanding_debt,
                        full_balance,
                    });
                }
                claimable_now
            }
            ClaimDecision::Claimable { amount } => amount,
        };

        let call = ContractCall::ClaimRewards;
        logger.log_plan(&call, false);
        let intent = TransactionIntent::new(call, options);
        let result = self.lifecycle.execute(intent, options.auto_confirm, &logger).await;

        finish(&logger, result, |receipt, approval| ActionReceipt {
            final_amount: Some(amount),
            ..ActionReceipt::new("claim-rewards", receipt, approval)
        })
    }

    /// Claim socializing-pool reward cycles
    ///
    /// `selection` is the raw cycle selection; when absent the prompter is
    /// asked, or every cycle is selected under auto-confirm.
    pub async fn claim_sp_rewards(
        &self,
        selection: Option<&str>,
        download_proofs: bool,
        options: &SubmissionOptions,
    ) -> EngineResult<ActionOutcome> {
        let logger = ActionLogger::new("claim-sp-rewards");

        let unclaimed = match self.unclaimed_cycles(download_proofs, options, &logger).await? {
            Step::Proceed(unclaimed) => unclaimed,
            Step::Stop(outcome) => return Ok(outcome),
        };

        let raw = match selection {
            Some(raw) => raw.to_string(),
            None if options.auto_confirm => String::new(),
            None => self.prompter.select_cycles(&unclaimed).await?,
        };
        let cycles = match select_cycles(&raw, &unclaimed) {
            Ok(cycles) => cycles,
            Err(rejection) => return Ok(rejected(&logger, rejection)),
        };

        let call = ContractCall::ClaimSpRewards {
            cycles: cycles.clone(),
        };
        logger.log_plan(&call, false);
        let intent = TransactionIntent::new(call, options);
        let result = self.lifecycle.execute(intent, options.auto_confirm, &logger).await;

        finish(&logger, result, |receipt, approval| ActionReceipt {
            cycles: Some(cycles),
            ..ActionReceipt::new("claim-sp-rewards", receipt, approval)
        })
    }

    async fn unclaimed_cycles(
        &self,
        download_proofs: bool,
        options: &SubmissionOptions,
        logger: &ActionLogger,
    ) -> EngineResult<Step<Vec<u64>>> {
        let status = self.sp_rewards_status().await?;
        let missing = match evaluate_cycle_claim(&status, download_proofs) {
            CycleGate::Ready { unclaimed } => return Ok(Step::Proceed(unclaimed)),
            CycleGate::NoRewards => return Ok(Step::Stop(ActionOutcome::NothingToClaim)),
            CycleGate::Blocked(rejection) => return Ok(Step::Stop(rejected(logger, rejection))),
            CycleGate::NeedsDownload { cycles } => cycles,
        };

        let request = ConfirmationRequest::DownloadProofs { cycles: missing };
        if !confirm_or_auto(self.prompter.as_ref(), &request, options.auto_confirm).await? {
            logger.log_cancelled(request.name());
            return Ok(Step::Stop(ActionOutcome::Cancelled {
                prompt: request.name(),
                approval_tx: None,
            }));
        }

        let step = logger.child("download");
        let fetched = self
            .chain
            .download_sp_merkle_proofs()
            .await
            .map_err(|e| EngineError::chain("download merkle proofs", e))?;
        info!(
            correlation_id = %step.context().correlation_id(),
            cycles = ?fetched,
            "📥 Merkle proofs downloaded"
        );

        let status = self.sp_rewards_status().await?;
        Ok(match evaluate_cycle_claim(&status, false) {
            CycleGate::Ready { unclaimed } => Step::Proceed(unclaimed),
            CycleGate::NoRewards => Step::Stop(ActionOutcome::NothingToClaim),
            CycleGate::Blocked(rejection) => Step::Stop(rejected(logger, rejection)),
            CycleGate::NeedsDownload { cycles } => {
                Step::Stop(rejected(logger, Rejection::ProofsMissing { cycles }))
            }
        })
    }

    /// Claim a matured collateral unbonding request
    pub async fn claim_withdrawn_sd(
        &self,
        now: DateTime<Utc>,
        options: &SubmissionOptions,
    ) -> EngineResult<ActionOutcome> {
        let logger = ActionLogger::new("claim-withdrawn-sd");
        let position = self.reader.read().await?;

        let amount = match CollateralWithdrawState::from_position(&position, now) {
            CollateralWithdrawState::None => {
                return Ok(rejected(&logger, Rejection::NoWithdrawRequest))
            }
            CollateralWithdrawState::Pending { amount, unlocks_at } => {
                return Ok(rejected(
                    &logger,
                    Rejection::UnbondingInProgress {
                        amount,
                        unlocks_at: unlocks_at.timestamp(),
                    },
                ))
            }
            CollateralWithdrawState::Claimable { amount } => amount,
        };

        let call = ContractCall::ClaimWithdrawnSd;
        logger.log_plan(&call, false);
        let intent = TransactionIntent::new(call, options);
        let result = self.lifecycle.execute(intent, options.auto_confirm, &logger).await;

        finish(&logger, result, |receipt, approval| ActionReceipt {
            final_amount: Some(amount),
            ..ActionReceipt::new("claim-withdrawn-sd", receipt, approval)
        })
    }

    async fn allowance(&self) -> EngineResult<U256> {
        self.chain
            .sd_allowance(self.chain.utility_contract())
            .await
            .map_err(|e| EngineError::chain("read allowance", e))
    }

    async fn sp_rewards_status(&self) -> EngineResult<crate::types::SpRewardsStatus> {
        self.chain
            .sp_rewards_status()
            .await
            .map_err(|e| EngineError::chain("read socializing pool status", e))
    }
}

fn rejected(logger: &ActionLogger, rejection: Rejection) -> ActionOutcome {
    logger.log_rejection(&rejection);
    ActionOutcome::Rejected(rejection)
}

fn finish<F>(
    logger: &ActionLogger,
    result: EngineResult<LifecycleOutcome>,
    build: F,
) -> EngineResult<ActionOutcome>
where
    F: FnOnce(&InclusionReceipt, Option<&InclusionReceipt>) -> ActionReceipt,
{
    match result {
        Ok(LifecycleOutcome::Included { receipt, approval }) => {
            info!(
                correlation_id = %logger.context().correlation_id(),
                tx_id = %receipt.tx_id,
                "✅ Action completed"
            );
            Ok(ActionOutcome::Completed(build(&receipt, approval.as_ref())))
        }
        Ok(LifecycleOutcome::Declined { prompt, approval }) => Ok(ActionOutcome::Cancelled {
            prompt,
            approval_tx: approval.map(|receipt| receipt.tx_id),
        }),
        Ok(LifecycleOutcome::Rejected(rejection)) => Ok(ActionOutcome::Rejected(rejection)),
        Err(err) => {
            logger.log_failure(&err);
            Err(err)
        }
    }
}
