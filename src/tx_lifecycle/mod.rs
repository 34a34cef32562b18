//! Transaction safety and lifecycle
//!
//! - `nonce`: operator nonce override validation
//! - `state`: approve-then-act state machine
//! - `prompt`: confirmation seam towards the CLI
//! - `orchestrator`: drives an intent through estimate, confirm, submit and inclusion

pub mod nonce;
pub mod orchestrator;
pub mod prompt;
pub mod state;

pub use nonce::{apply_nonce_override, validate_nonce_override};
pub use orchestrator::{
    CancellationHandle, LifecycleOutcome, SubmissionOptions, TransactionIntent, TxLifecycle,
};
pub use prompt::{confirm_or_auto, ConfirmationRequest, Prompter};
pub use state::{TxEvent, TxState};
