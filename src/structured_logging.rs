//! Structured logging for operator actions

use crate::errors::{EngineError, Rejection};
use crate::observability::TraceContext;
use crate::types::{ContractCall, InclusionReceipt, TxId};

/// Structured logger bound to one action's trace context
#[derive(Debug, Clone)]
pub struct ActionLogger {
    context: TraceContext,
}

impl ActionLogger {
    pub fn new(action: &str) -> Self {
        Self {
            context: TraceContext::new(action),
        }
    }

    /// Logger for a step of this action (shares trace and correlation ids)
    pub fn child(&self, step: &str) -> Self {
        Self {
            context: self.context.child_span(step),
        }
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn log_plan(&self, call: &ContractCall, requires_approval: bool) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            operation = %self.context.operation,
            call = call.kind(),
            amount = ?call.amount().map(|a| a.to_string()),
            requires_approval,
            "Action planned"
        );
    }

    pub fn log_rejection(&self, rejection: &Rejection) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            operation = %self.context.operation,
            category = rejection.category(),
            reason = %rejection,
            "Action rejected"
        );
    }

    pub fn log_cancelled(&self, prompt: &str) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            operation = %self.context.operation,
            prompt,
            "Action cancelled by operator"
        );
    }

    pub fn log_submitted(&self, tx_id: &TxId, call: &ContractCall, nonce: Option<u64>) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            operation = %self.context.operation,
            tx_id = %tx_id,
            call = call.kind(),
            nonce = ?nonce,
            "Transaction submitted"
        );
    }

    pub fn log_included(&self, receipt: &InclusionReceipt, waited_ms: u64) {
        tracing::info!(
            correlation_id = %self.context.correlation_id,
            operation = %self.context.operation,
            tx_id = %receipt.tx_id,
            block_number = receipt.block_number,
            success = receipt.success,
            waited_ms,
            "Transaction included"
        );
    }

    pub fn log_failure(&self, error: &EngineError) {
        tracing::error!(
            correlation_id = %self.context.correlation_id,
            operation = %self.context.operation,
            category = error.category(),
            tx_id = ?error.tx_id(),
            error = %error,
            "Action failed"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            correlation_id = %self.context.correlation_id,
            operation = %self.context.operation,
            message,
            "Warning"
        );
    }
}
