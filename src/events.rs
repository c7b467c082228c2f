//! Ledger events
//!
//! Every successful state transition emits exactly one event. Consumers
//! refresh their view from events instead of re-polling every value.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Amount, BountyId, ContentRef, Identity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    BountyCreated {
        bounty_id: BountyId,
        issuer: Identity,
    },
    ContributionAdded {
        bounty_id: BountyId,
        contributor: Identity,
        amount: Amount,
    },
    BountyFulfilled {
        bounty_id: BountyId,
        reference: ContentRef,
        fulfiller: Identity,
        amount: Amount,
    },
    BountyClosed {
        bounty_id: BountyId,
    },
    PayoutChanged {
        bounty_id: BountyId,
        new_amount: Amount,
    },
    ResolutionRequested {
        reference: ContentRef,
    },
    ResolutionCompleted {
        reference: ContentRef,
        text: String,
    },
    Paused,
    Unpaused,
    Destroyed {
        owner: Identity,
        swept: Amount,
    },
}

impl LedgerEvent {
    /// Event name as listed in the public event table.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BountyCreated { .. } => "BountyCreated",
            LedgerEvent::ContributionAdded { .. } => "ContributionAdded",
            LedgerEvent::BountyFulfilled { .. } => "BountyFulfilled",
            LedgerEvent::BountyClosed { .. } => "BountyClosed",
            LedgerEvent::PayoutChanged { .. } => "PayoutChanged",
            LedgerEvent::ResolutionRequested { .. } => "ResolutionRequested",
            LedgerEvent::ResolutionCompleted { .. } => "ResolutionCompleted",
            LedgerEvent::Paused => "Paused",
            LedgerEvent::Unpaused => "Unpaused",
            LedgerEvent::Destroyed { .. } => "Destroyed",
        }
    }

    pub fn bounty_id(&self) -> Option<BountyId> {
        match self {
            LedgerEvent::BountyCreated { bounty_id, .. }
            | LedgerEvent::ContributionAdded { bounty_id, .. }
            | LedgerEvent::BountyFulfilled { bounty_id, .. }
            | LedgerEvent::BountyClosed { bounty_id }
            | LedgerEvent::PayoutChanged { bounty_id, .. } => Some(*bounty_id),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&ContentRef> {
        match self {
            LedgerEvent::BountyFulfilled { reference, .. }
            | LedgerEvent::ResolutionRequested { reference }
            | LedgerEvent::ResolutionCompleted { reference, .. } => Some(reference),
            _ => None,
        }
    }
}

/// Receiver of emitted events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LedgerEvent);
}

/// Event with its position in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

/// Events kept in memory when no capacity is given.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 10_000;

/// In-memory tail of the event stream.
///
/// Holds at most `capacity` events; older ones are evicted but sequence
/// numbers keep counting. Full history lives in the
/// [`EventJournal`](crate::storage::EventJournal).
pub struct EventLog {
    inner: Mutex<LogInner>,
}

struct LogInner {
    entries: VecDeque<RecordedEvent>,
    capacity: usize,
    next_seq: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(LogInner {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                next_seq: 0,
            }),
        }
    }

    /// Retained events with `seq >= since`, in emission order.
    pub fn since(&self, since: u64) -> Vec<RecordedEvent> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.seq >= since)
            .cloned()
            .collect()
    }

    /// Oldest sequence number still held, if any.
    pub fn first_seq(&self) -> Option<u64> {
        self.inner.lock().entries.front().map(|e| e.seq)
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.inner.lock().entries.iter().map(|e| e.event.name()).collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: &LedgerEvent) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.entries.len() == inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(RecordedEvent {
            seq,
            recorded_at: Utc::now(),
            event: event.clone(),
        });
    }
}

/// Fans one event out to several sinks.
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout {
    fn emit(&self, event: &LedgerEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
