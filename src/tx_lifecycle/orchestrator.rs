//! Transaction lifecycle orchestrator
//!
//! Drives one action from intent to inclusion:
//! approval (if needed) → estimate → confirm → nonce check → broadcast →
//! surface tx id → bounded inclusion wait.
//!
//! The orchestrator is the only code that advances [`TxState`]. A required
//! approval is fully included before the action itself is estimated, so the
//! action's gas and nonce are computed against post-approval state.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::nonce::{apply_nonce_override, validate_nonce_override};
use super::prompt::{confirm_or_auto, ConfirmationRequest, Prompter};
use super::state::{TxEvent, TxState};
use crate::chain::ChainClient;
use crate::errors::{EngineError, EngineResult, Rejection};
use crate::structured_logging::ActionLogger;
use crate::types::{ContractCall, GasSettings, InclusionReceipt, TxId, TxOptions};

/// A single action ready to be submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub call: ContractCall,
    pub requires_approval: bool,
    /// Applies to the first transaction of the plan only
    pub nonce_override: Option<u64>,
    pub gas: GasSettings,
}

impl TransactionIntent {
    pub fn new(call: ContractCall, options: &SubmissionOptions) -> Self {
        Self {
            call,
            requires_approval: false,
            nonce_override: options.nonce_override,
            gas: options.gas,
        }
    }

    pub fn with_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }
}

/// Per-invocation submission settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionOptions {
    /// Skip non-advisory confirmations
    pub auto_confirm: bool,
    pub nonce_override: Option<u64>,
    pub gas: GasSettings,
}

/// Caller-held handle that aborts an inclusion wait
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn cancelled(mut receiver: watch::Receiver<bool>) {
    if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone: nobody can cancel any more
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Included {
        receipt: InclusionReceipt,
        approval: Option<InclusionReceipt>,
    },

    /// The operator declined the named prompt; nothing was broadcast at that
    /// step, but an approval included earlier stays on chain
    Declined {
        prompt: &'static str,
        approval: Option<InclusionReceipt>,
    },

    /// The nonce override failed its safety check
    Rejected(Rejection),
}

enum Submission {
    Sent(TxId),
    Declined(&'static str),
    Rejected(Rejection),
}

pub struct TxLifecycle {
    chain: Arc<dyn ChainClient>,
    prompter: Arc<dyn Prompter>,
    inclusion_timeout: Duration,
    cancellation: CancellationHandle,
}

impl TxLifecycle {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        prompter: Arc<dyn Prompter>,
        inclusion_timeout: Duration,
        cancellation: CancellationHandle,
    ) -> Self {
        Self {
            chain,
            prompter,
            inclusion_timeout,
            cancellation,
        }
    }

    pub async fn execute(
        &self,
        intent: TransactionIntent,
        auto_confirm: bool,
        logger: &ActionLogger,
    ) -> EngineResult<LifecycleOutcome> {
        let mut state = TxState::initial(intent.requires_approval);
        let mut nonce_override = intent.nonce_override;
        let mut approval = None;

        if state == TxState::NeedsApproval {
            let approve = ContractCall::ApproveSd {
                spender: self.chain.utility_contract(),
                amount: U256::MAX,
            };
            let step = logger.child("approve");
            let tx_id = match self
                .submit(&approve, nonce_override.take(), &intent.gas, auto_confirm, &step)
                .await?
            {
                Submission::Sent(tx_id) => tx_id,
                Submission::Declined(prompt) => {
                    return Ok(LifecycleOutcome::Declined {
                        prompt,
                        approval: None,
                    })
                }
                Submission::Rejected(rejection) => return Ok(LifecycleOutcome::Rejected(rejection)),
            };
            state = self.transition(state, TxEvent::ApprovalSubmitted)?;
            approval = Some(self.await_inclusion(tx_id, &step).await?);
            state = self.transition(state, TxEvent::ApprovalIncluded)?;
        }

        let tx_id = match self
            .submit(&intent.call, nonce_override, &intent.gas, auto_confirm, logger)
            .await?
        {
            Submission::Sent(tx_id) => tx_id,
            Submission::Declined(prompt) => {
                return Ok(LifecycleOutcome::Declined { prompt, approval })
            }
            Submission::Rejected(rejection) => return Ok(LifecycleOutcome::Rejected(rejection)),
        };
        state = self.transition(state, TxEvent::Submitted)?;
        let receipt = self.await_inclusion(tx_id, logger).await?;
        self.transition(state, TxEvent::Included)?;

        Ok(LifecycleOutcome::Included { receipt, approval })
    }

    fn transition(&self, state: TxState, event: TxEvent) -> EngineResult<TxState> {
        let next = state.advance(event)?;
        debug!(from = ?state, to = ?next, "Lifecycle transition");
        Ok(next)
    }

    async fn submit(
        &self,
        call: &ContractCall,
        nonce_override: Option<u64>,
        gas: &GasSettings,
        auto_confirm: bool,
        logger: &ActionLogger,
    ) -> EngineResult<Submission> {
        let estimate = self
            .chain
            .estimate_gas(call)
            .await
            .map_err(|e| EngineError::chain("estimate gas", e))?;
        let gas_limit = gas.gas_limit.unwrap_or(estimate.safe_gas_limit);
        debug!(
            call = call.kind(),
            estimated = estimate.estimated_gas_limit,
            gas_limit,
            "Gas estimated"
        );

        let request = match call {
            ContractCall::ApproveSd { spender, amount } => ConfirmationRequest::Approval {
                spender: *spender,
                amount: *amount,
                gas_limit,
            },
            _ => ConfirmationRequest::Transaction {
                call: call.clone(),
                gas_limit,
            },
        };
        if !confirm_or_auto(self.prompter.as_ref(), &request, auto_confirm).await? {
            logger.log_cancelled(request.name());
            return Ok(Submission::Declined(request.name()));
        }

        let mut opts = TxOptions {
            nonce: None,
            gas_limit,
            max_fee_per_gas: gas.max_fee_per_gas,
            max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
        };
        if nonce_override.is_some() {
            let pending = self
                .chain
                .pending_nonce()
                .await
                .map_err(|e| EngineError::chain("read pending nonce", e))?;
            let mined = self
                .chain
                .mined_nonce()
                .await
                .map_err(|e| EngineError::chain("read mined nonce", e))?;
            match validate_nonce_override(nonce_override, pending, mined) {
                Ok(nonce) => apply_nonce_override(&mut opts, nonce),
                Err(rejection) => {
                    logger.log_rejection(&rejection);
                    return Ok(Submission::Rejected(rejection));
                }
            }
        }

        let tx_id = self
            .chain
            .send_transaction(call, &opts)
            .await
            .map_err(|e| EngineError::chain("send transaction", e))?;
        logger.log_submitted(&tx_id, call, opts.nonce);
        self.prompter.transaction_submitted(&tx_id, call).await;
        Ok(Submission::Sent(tx_id))
    }

    async fn await_inclusion(
        &self,
        tx_id: TxId,
        logger: &ActionLogger,
    ) -> EngineResult<InclusionReceipt> {
        let started = Instant::now();
        let wait = tokio::time::timeout(self.inclusion_timeout, self.chain.wait_for_inclusion(tx_id));

        let receipt = tokio::select! {
            biased;
            _ = cancelled(self.cancellation.subscribe()) => {
                return Err(EngineError::InclusionCancelled { tx_id });
            }
            result = wait => match result {
                Ok(receipt) => receipt.map_err(|e| EngineError::chain("wait for inclusion", e))?,
                Err(_) => {
                    return Err(EngineError::InclusionTimeout {
                        tx_id,
                        waited_secs: self.inclusion_timeout.as_secs(),
                    });
                }
            },
        };

        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        logger.log_included(&receipt, waited_ms);
        if !receipt.success {
            return Err(EngineError::Reverted {
                tx_id,
                block_number: receipt.block_number,
            });
        }
        Ok(receipt)
    }
}
