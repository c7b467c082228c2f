//! Ledger error types
//!
//! Every rejected operation surfaces as one of these values. A failed
//! operation never leaves a partial mutation behind.

use thiserror::Error;

use crate::types::{Amount, BountyId, ContentRef};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Bounty {0} not found")]
    BountyNotFound(BountyId),

    #[error("No resolution request exists for {0}")]
    ReferenceNotFound(ContentRef),

    #[error("Caller {caller} is not allowed to {action}")]
    Unauthorized { caller: String, action: &'static str },

    #[error("Bounty {0} is closed")]
    Closed(BountyId),

    #[error("Ledger is paused")]
    Paused,

    #[error("Ledger has been destroyed")]
    Destroyed,

    #[error("Reference {reference} has already been used for bounty {bounty_id}")]
    AlreadyUsed {
        bounty_id: BountyId,
        reference: ContentRef,
    },

    #[error("Reference {0} has not been resolved by the oracle yet")]
    NotResolved(ContentRef),

    #[error("Text of {reference} does not match the text required by bounty {bounty_id}")]
    Mismatch {
        bounty_id: BountyId,
        reference: ContentRef,
    },

    #[error("Bounty {bounty_id} holds {balance} but pays {required} per fulfillment")]
    InsufficientBalance {
        bounty_id: BountyId,
        balance: Amount,
        required: Amount,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    /// Stable wire code for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::BountyNotFound(_) | LedgerError::ReferenceNotFound(_) => "NOT_FOUND",
            LedgerError::Unauthorized { .. } => "UNAUTHORIZED",
            LedgerError::Closed(_) => "CLOSED",
            LedgerError::Paused => "PAUSED",
            LedgerError::Destroyed => "DESTROYED",
            LedgerError::AlreadyUsed { .. } => "ALREADY_USED",
            LedgerError::NotResolved(_) => "NOT_RESOLVED",
            LedgerError::Mismatch { .. } => "MISMATCH",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    pub(crate) fn unauthorized(caller: &crate::types::Identity, action: &'static str) -> Self {
        LedgerError::Unauthorized {
            caller: caller.to_string(),
            action,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
