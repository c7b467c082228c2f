//! Oracle bridge
//!
//! Two-phase protocol: `request_resolution` records a pending lookup and
//! hands it to a dispatcher; the external mechanism later answers through
//! `resolution_callback`. Answers are cached per reference for good, so
//! any number of bounties can share one lookup.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{ContentRef, OracleRecord, ResolutionState};

/// Hands newly requested references to whatever fetches external content.
pub trait ResolutionDispatcher: Send + Sync {
    fn dispatch(&self, reference: &ContentRef);
}

/// Leaves the request in the pending set for resolvers that poll.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl ResolutionDispatcher for LogDispatcher {
    fn dispatch(&self, reference: &ContentRef) {
        info!("Resolution query queued for {}, standing by for the answer", reference);
    }
}

/// Forwards references to a fetch worker over a channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<ContentRef>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ContentRef>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResolutionDispatcher for ChannelDispatcher {
    fn dispatch(&self, reference: &ContentRef) {
        // The record stays pending either way; pollers can still pick it up.
        if self.tx.send(reference.clone()).is_err() {
            warn!("Resolution worker is gone, {} left pending", reference);
        }
    }
}

/// What a resolution request found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// New record created and dispatched.
    Dispatched,
    /// Already requested, answer not in yet.
    Pending,
    /// Cached answer.
    Resolved(String),
}

pub struct OracleService {
    records: HashMap<ContentRef, OracleRecord>,
    dispatcher: Box<dyn ResolutionDispatcher>,
}

impl OracleService {
    pub fn new(dispatcher: Box<dyn ResolutionDispatcher>) -> Self {
        Self {
            records: HashMap::new(),
            dispatcher,
        }
    }

    /// Idempotent: only the first request for a reference dispatches.
    pub fn request_resolution(&mut self, reference: &ContentRef) -> Resolution {
        match self.records.entry(reference.clone()) {
            Entry::Occupied(entry) => match entry.get().resolved_text() {
                Some(text) => Resolution::Resolved(text.to_string()),
                None => Resolution::Pending,
            },
            Entry::Vacant(entry) => {
                entry.insert(OracleRecord::requested());
                self.dispatcher.dispatch(reference);
                Resolution::Dispatched
            }
        }
    }

    /// Stores the answer for a pending reference.
    ///
    /// Returns `Ok(false)` when the reference was already resolved; the
    /// first answer wins.
    pub fn resolution_callback(&mut self, reference: &ContentRef, text: String) -> LedgerResult<bool> {
        let record = self
            .records
            .get_mut(reference)
            .ok_or_else(|| LedgerError::ReferenceNotFound(reference.clone()))?;

        if record.state == ResolutionState::Resolved {
            warn!("Ignoring repeated resolution for {}", reference);
            return Ok(false);
        }

        record.state = ResolutionState::Resolved;
        record.text = Some(text);
        record.resolved_at = Some(Utc::now());
        info!("Resolved {}", reference);
        Ok(true)
    }

    /// Never blocks. `None` covers both "pending" and "never requested".
    pub fn resolved_text(&self, reference: &ContentRef) -> Option<&str> {
        self.records.get(reference).and_then(OracleRecord::resolved_text)
    }

    pub fn record(&self, reference: &ContentRef) -> Option<&OracleRecord> {
        self.records.get(reference)
    }

    /// References still waiting for an answer, oldest request first.
    pub fn pending_references(&self) -> Vec<ContentRef> {
        let mut pending: Vec<_> = self
            .records
            .iter()
            .filter(|(_, record)| record.state == ResolutionState::Requested)
            .collect();
        pending.sort_by(|a, b| a.1.requested_at.cmp(&b.1.requested_at).then(a.0.cmp(b.0)));
        pending.into_iter().map(|(reference, _)| reference.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for OracleService {
    fn default() -> Self {
        Self::new(Box::new(LogDispatcher))
    }
}
