//! Durable event journal
//!
//! Appends every ledger event to SQLite so bounty history survives a
//! restart of the presentation layer.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::events::{EventSink, LedgerEvent};
use crate::types::BountyId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: i64,
    pub kind: String,
    pub bounty_id: Option<BountyId>,
    pub reference: Option<String>,
    pub event: LedgerEvent,
    pub recorded_at: DateTime<Utc>,
}

pub struct EventJournal {
    conn: Mutex<Connection>,
}

impl EventJournal {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open journal at {}", path.display()))?;
        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.run_migrations()?;
        Ok(journal)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.run_migrations()?;
        Ok(journal)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ledger_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                bounty_id INTEGER,
                reference TEXT,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_events_bounty ON ledger_events (bounty_id);",
        )
        .context("Failed to migrate journal schema")?;
        Ok(())
    }

    /// Append one event; returns its sequence number.
    pub fn record(&self, event: &LedgerEvent) -> Result<i64> {
        let payload = serde_json::to_string(event)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ledger_events (kind, bounty_id, reference, payload, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.name(),
                event.bounty_id().map(|id| id.0 as i64),
                event.reference().map(|r| r.as_str()),
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM ledger_events", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    /// Full history of one bounty, oldest first.
    pub fn events_for_bounty(&self, bounty_id: BountyId) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, kind, bounty_id, reference, payload, recorded_at
             FROM ledger_events WHERE bounty_id = ?1 ORDER BY seq ASC",
        )?;
        let entries = stmt
            .query_map(params![bounty_id.0 as i64], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Latest `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, kind, bounty_id, reference, payload, recorded_at
             FROM ledger_events ORDER BY seq DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<JournalEntry> {
    let payload: String = row.get(4)?;
    let event = serde_json::from_str(&payload)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let recorded_at: String = row.get(5)?;
    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(JournalEntry {
        seq: row.get(0)?,
        kind: row.get(1)?,
        bounty_id: row.get::<_, Option<i64>>(2)?.map(|id| BountyId(id as u64)),
        reference: row.get(3)?,
        event,
        recorded_at,
    })
}

impl EventSink for EventJournal {
    fn emit(&self, event: &LedgerEvent) {
        // The ledger state stays authoritative; a lost journal row is logged.
        if let Err(e) = self.record(event) {
            error!("Failed to journal {} event: {:#}", event.name(), e);
        }
    }
}

/// Event sink that hands events to a blocking writer task, keeping SQLite
/// I/O out of the caller's critical section.
///
/// Events are written in emission order. The task ends once every
/// `JournalWriter` is dropped and the queue is drained.
#[derive(Clone)]
pub struct JournalWriter {
    tx: mpsc::UnboundedSender<LedgerEvent>,
}

impl JournalWriter {
    /// Must be called from within a tokio runtime.
    pub fn spawn(journal: Arc<EventJournal>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LedgerEvent>();
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(event) = rx.blocking_recv() {
                journal.emit(&event);
            }
            debug!("Journal writer stopped");
        });
        (Self { tx }, handle)
    }
}

impl EventSink for JournalWriter {
    fn emit(&self, event: &LedgerEvent) {
        if self.tx.send(event.clone()).is_err() {
            error!("Journal writer is gone, {} event not journaled", event.name());
        }
    }
}
