//! Approve-then-act state machine

use serde::Serialize;

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    /// An approval must be included before the action can be built
    NeedsApproval,
    /// Approval broadcast, awaiting inclusion
    Approving,
    ReadyToAct,
    Submitted,
    Included,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    ApprovalSubmitted,
    ApprovalIncluded,
    Submitted,
    Included,
}

impl TxEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ApprovalSubmitted => "approval_submitted",
            Self::ApprovalIncluded => "approval_included",
            Self::Submitted => "submitted",
            Self::Included => "included",
        }
    }
}

impl TxState {
    pub fn initial(requires_approval: bool) -> Self {
        if requires_approval {
            Self::NeedsApproval
        } else {
            Self::ReadyToAct
        }
    }

    pub fn advance(self, event: TxEvent) -> EngineResult<Self> {
        match (self, event) {
            (Self::NeedsApproval, TxEvent::ApprovalSubmitted) => Ok(Self::Approving),
            (Self::Approving, TxEvent::ApprovalIncluded) => Ok(Self::ReadyToAct),
            (Self::ReadyToAct, TxEvent::Submitted) => Ok(Self::Submitted),
            (Self::Submitted, TxEvent::Included) => Ok(Self::Included),
            (from, event) => Err(EngineError::InvalidTransition {
                from,
                event: event.name(),
            }),
        }
    }
}
