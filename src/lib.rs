//! SD Operator - collateral, utilization and reward-claim settlement
//!
//! This library exposes the settlement engine used by the `sd-operator` CLI:
//! repayment of utilized SD, collateral withdrawal, ETH reward claims and
//! socializing-pool cycle claims, each driven through an approve, estimate,
//! confirm, submit and await-inclusion lifecycle.

pub mod chain;
pub mod config;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod position;
pub mod settlement;
pub mod structured_logging;
pub mod tx_lifecycle;
pub mod types;
pub mod units;

// Re-export commonly used types
pub use chain::{ChainClient, ChainError, FixtureChain, FixtureState};
pub use config::Config;
pub use engine::{ActionOutcome, ActionReceipt, SettlementEngine};
pub use errors::{EngineError, EngineResult, Rejection};
pub use tx_lifecycle::{ConfirmationRequest, Prompter, SubmissionOptions};
pub use types::{ContractCall, SdPosition, TxId};
