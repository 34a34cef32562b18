//! Nonce override safety check
//!
//! An operator may pin the nonce of the next transaction (to replace a stuck
//! one, for example). The override is only accepted inside the window
//! `mined <= nonce <= pending`.

use crate::errors::Rejection;
use crate::types::TxOptions;

pub fn validate_nonce_override(
    custom: Option<u64>,
    pending: u64,
    mined: u64,
) -> Result<Option<u64>, Rejection> {
    let Some(nonce) = custom else {
        return Ok(None);
    };
    if nonce > pending {
        return Err(Rejection::AheadOfPendingNonce { nonce, pending });
    }
    if nonce < mined {
        return Err(Rejection::AlreadyIncluded { nonce, mined });
    }
    Ok(Some(nonce))
}

/// Attach a validated nonce; `None` leaves assignment to the signer
pub fn apply_nonce_override(opts: &mut TxOptions, nonce: Option<u64>) {
    if let Some(nonce) = nonce {
        opts.nonce = Some(nonce);
    }
}
