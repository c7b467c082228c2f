//! Text Bounty - Escrowed rewards for matching external content
//!
//! An issuer posts a bounty naming a piece of external content (a post
//! reference). Anyone can add funds. Whoever submits a *different*
//! reference whose text is byte-for-byte identical to the target's text is
//! paid the fulfillment amount from the escrowed balance.
//!
//! # How it works
//!
//! 1. A reference is submitted for resolution; the oracle records it as
//!    pending and hands it to a dispatcher
//! 2. The external fetcher answers through the resolution callback and the
//!    text is cached for good
//! 3. Issuers create bounties against a target reference and fund them
//! 4. Fulfillers claim with another resolved reference carrying the same text
//! 5. Payouts are credited to the fulfiller; issuers can retune or close
//!
//! # Anti-abuse measures
//!
//! - A reference can pay out at most once per bounty (the target included)
//! - Text comparison is exact, with no normalization
//! - A failed claim changes nothing
//! - The owner can pause mutations or destroy the ledger, sweeping balances
//! - Over HTTP, bounty and admin calls are signed with the caller's sr25519 hotkey

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod oracle;
pub mod server;
pub mod storage;
pub mod types;

pub use access::{AccessControl, LifecycleState};
pub use config::Config;
pub use error::{LedgerError, LedgerResult};
pub use events::{
    EventLog, EventSink, Fanout, LedgerEvent, RecordedEvent, DEFAULT_EVENT_LOG_CAPACITY,
};
pub use ledger::{BountyLedger, LedgerBuilder, LowBalancePolicy};
pub use oracle::{
    ChannelDispatcher, LogDispatcher, OracleService, Resolution, ResolutionDispatcher,
};
pub use storage::{EventJournal, JournalEntry, JournalWriter};
pub use types::{
    Amount, BountyId, BountyView, ContentRef, Identity, OracleRecord, ResolutionState,
    DEFAULT_REFERENCE_PREFIX, UNITS_PER_TOKEN,
};
