//! SQLite-backed trust database.
//!
//! # Guarantees
//!
//! - Terminal verdicts are never overwritten. Asking for a different terminal
//!   verdict than the stored one is a logic bug and fails with
//!   [`TrustDbError::ConflictingVerdict`].
//! - `add_trusted_summary` runs in a single SQL transaction: heads, verdict
//!   and edges are either all updated or all left untouched.
//! - Rejections that need a marker are recorded together with an outbox row,
//!   so a crash between persisting the verdict and publishing the reaction
//!   cannot lose the marker.
//!
//! The connection lives behind a mutex. Every method is synchronous and
//! holds the lock for its whole duration, so concurrent callers touching the
//! same ledger are serialized at the statement level.

use crate::schema;
use ledgertrust_core::{EventId, LedgerId, TrustVerdict};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors that can occur in trust database operations
#[derive(Debug, Error)]
pub enum TrustDbError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(
        "Conflicting verdict for {event_id} in {ledger}: stored {stored}, requested {requested}"
    )]
    ConflictingVerdict {
        ledger: LedgerId,
        event_id: EventId,
        stored: TrustVerdict,
        requested: TrustVerdict,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Trust database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, TrustDbError>;

/// Observability counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrustDbMetrics {
    /// Verdicts newly persisted (idempotent repeats are not counted)
    pub verdicts_recorded_total: u64,
    /// Attempts to overwrite a terminal verdict with a different one
    pub verdict_conflicts_total: u64,
    /// Summaries registered through `add_trusted_summary`
    pub summaries_added_total: u64,
    /// Rejection markers queued in the outbox
    pub markers_enqueued_total: u64,
}

/// A rejection marker that has not been confirmed as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMarker {
    pub ledger: LedgerId,
    pub event_id: EventId,
    pub symbol: String,
    /// Unix milliseconds
    pub created_at: u64,
}

struct Inner {
    conn: Connection,
    metrics: TrustDbMetrics,
}

/// Trust database with SQLite backend
pub struct TrustDatabase {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl TrustDatabase {
    /// Create or open a trust database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening trust database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        schema::init(&conn, true)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                metrics: TrustDbMetrics::default(),
            }),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn, false)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                metrics: TrustDbMetrics::default(),
            }),
            path: None,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| TrustDbError::LockPoisoned)
    }

    /// Memoized verdict, `Untrusted` if nothing is stored.
    pub fn check_trust(&self, ledger: &LedgerId, event_id: &EventId) -> Result<TrustVerdict> {
        let guard = self.lock()?;
        read_verdict(&guard.conn, ledger, event_id)
    }

    /// Mark an event trusted. Repeating the same verdict is a no-op.
    pub fn mark_trusted(&self, ledger: &LedgerId, event_id: &EventId) -> Result<()> {
        self.mark(ledger, event_id, TrustVerdict::Trusted)
    }

    /// Mark an event rejected. Repeating the same verdict is a no-op.
    pub fn mark_rejected(&self, ledger: &LedgerId, event_id: &EventId) -> Result<()> {
        self.mark(ledger, event_id, TrustVerdict::Rejected)
    }

    fn mark(&self, ledger: &LedgerId, event_id: &EventId, verdict: TrustVerdict) -> Result<()> {
        let mut guard = self.lock()?;
        let Inner { conn, metrics } = &mut *guard;
        if write_verdict(conn, metrics, ledger, event_id, verdict)? {
            metrics.verdicts_recorded_total += 1;
            debug!(ledger = %ledger, event_id = %event_id, verdict = %verdict, "Verdict recorded");
        }
        Ok(())
    }

    /// Mark an event rejected and queue a rejection marker for publication,
    /// in one SQL transaction.
    pub fn mark_rejected_with_marker(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
        symbol: &str,
    ) -> Result<()> {
        let mut guard = self.lock()?;
        let Inner { conn, metrics } = &mut *guard;
        let tx = conn.transaction()?;

        let recorded = write_verdict(&tx, metrics, ledger, event_id, TrustVerdict::Rejected)?;
        let queued = tx.execute(
            "INSERT OR IGNORE INTO pending_markers (ledger_id, event_id, symbol) VALUES (?1, ?2, ?3)",
            params![ledger.as_str(), event_id.as_str(), symbol],
        )?;

        tx.commit()?;

        if recorded {
            metrics.verdicts_recorded_total += 1;
        }
        if queued > 0 {
            metrics.markers_enqueued_total += 1;
        }
        debug!(ledger = %ledger, event_id = %event_id, "Rejection recorded, marker queued");
        Ok(())
    }

    /// Register a summary as trusted and update the frontier atomically.
    ///
    /// In order: clear heads if `is_root`; insert `summary_id` into heads;
    /// drop every parent from heads; mark the summary trusted; persist
    /// summary -> parent and summary -> transaction edges. Any failure rolls
    /// the whole update back.
    pub fn add_trusted_summary(
        &self,
        ledger: &LedgerId,
        summary_id: &EventId,
        parents: &BTreeSet<EventId>,
        transactions: &BTreeSet<EventId>,
        is_root: bool,
    ) -> Result<()> {
        let mut guard = self.lock()?;
        let Inner { conn, metrics } = &mut *guard;
        let tx = conn.transaction()?;

        if is_root {
            let cleared = tx.execute(
                "DELETE FROM heads WHERE ledger_id = ?1",
                params![ledger.as_str()],
            )?;
            if cleared > 0 {
                info!(ledger = %ledger, cleared, "New root summary, history reset");
            }
        }

        tx.execute(
            "INSERT OR IGNORE INTO heads (ledger_id, event_id) VALUES (?1, ?2)",
            params![ledger.as_str(), summary_id.as_str()],
        )?;

        for parent in parents {
            tx.execute(
                "DELETE FROM heads WHERE ledger_id = ?1 AND event_id = ?2",
                params![ledger.as_str(), parent.as_str()],
            )?;
        }

        let recorded = write_verdict(&tx, metrics, ledger, summary_id, TrustVerdict::Trusted)?;

        for parent in parents {
            tx.execute(
                "INSERT OR IGNORE INTO summary_edges (ledger_id, summary_id, parent_id) VALUES (?1, ?2, ?3)",
                params![ledger.as_str(), summary_id.as_str(), parent.as_str()],
            )?;
        }
        for transaction in transactions {
            tx.execute(
                "INSERT OR IGNORE INTO summary_transactions (ledger_id, summary_id, transaction_id) VALUES (?1, ?2, ?3)",
                params![ledger.as_str(), summary_id.as_str(), transaction.as_str()],
            )?;
        }

        tx.commit()?;
        metrics.summaries_added_total += 1;
        if recorded {
            metrics.verdicts_recorded_total += 1;
        }

        debug!(
            ledger = %ledger,
            summary_id = %summary_id,
            parents = parents.len(),
            transactions = transactions.len(),
            is_root,
            "Trusted summary added"
        );
        Ok(())
    }

    /// Current frontier of trusted summaries.
    pub fn get_heads(&self, ledger: &LedgerId) -> Result<BTreeSet<EventId>> {
        let guard = self.lock()?;
        query_ids(
            &guard.conn,
            "SELECT event_id FROM heads WHERE ledger_id = ?1",
            params![ledger.as_str()],
        )
    }

    /// Parents recorded for a trusted summary.
    pub fn get_summary_parents(
        &self,
        ledger: &LedgerId,
        summary_id: &EventId,
    ) -> Result<BTreeSet<EventId>> {
        let guard = self.lock()?;
        query_ids(
            &guard.conn,
            "SELECT parent_id FROM summary_edges WHERE ledger_id = ?1 AND summary_id = ?2",
            params![ledger.as_str(), summary_id.as_str()],
        )
    }

    /// Transactions recorded for a trusted summary.
    pub fn get_summary_transactions(
        &self,
        ledger: &LedgerId,
        summary_id: &EventId,
    ) -> Result<BTreeSet<EventId>> {
        let guard = self.lock()?;
        query_ids(
            &guard.conn,
            "SELECT transaction_id FROM summary_transactions WHERE ledger_id = ?1 AND summary_id = ?2",
            params![ledger.as_str(), summary_id.as_str()],
        )
    }

    /// Reverse index: for each given transaction, the summaries referencing it.
    /// Transactions no summary references are left out of the map.
    pub fn get_summaries_referencing_transactions(
        &self,
        ledger: &LedgerId,
        transaction_ids: &BTreeSet<EventId>,
    ) -> Result<BTreeMap<EventId, BTreeSet<EventId>>> {
        let guard = self.lock()?;
        let mut referenced = BTreeMap::new();
        for transaction_id in transaction_ids {
            let summaries = query_ids(
                &guard.conn,
                "SELECT summary_id FROM summary_transactions WHERE ledger_id = ?1 AND transaction_id = ?2",
                params![ledger.as_str(), transaction_id.as_str()],
            )?;
            if !summaries.is_empty() {
                referenced.insert(transaction_id.clone(), summaries);
            }
        }
        Ok(referenced)
    }

    /// Whether `candidate` is `summary_id` or one of its recorded ancestors.
    pub fn is_ancestor_or_self(
        &self,
        ledger: &LedgerId,
        candidate: &EventId,
        summary_id: &EventId,
    ) -> Result<bool> {
        let guard = self.lock()?;
        let mut visited = BTreeSet::new();
        let mut stack = vec![summary_id.clone()];

        while let Some(current) = stack.pop() {
            if &current == candidate {
                return Ok(true);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            let parents = query_ids(
                &guard.conn,
                "SELECT parent_id FROM summary_edges WHERE ledger_id = ?1 AND summary_id = ?2",
                params![ledger.as_str(), current.as_str()],
            )?;
            stack.extend(parents.into_iter().filter(|p| !visited.contains(p)));
        }

        Ok(false)
    }

    /// Rejection markers still waiting to be published, oldest first.
    pub fn pending_markers(&self, ledger: &LedgerId) -> Result<Vec<PendingMarker>> {
        let guard = self.lock()?;
        let mut stmt = guard.conn.prepare(
            r#"
            SELECT event_id, symbol, created_at
            FROM pending_markers
            WHERE ledger_id = ?1
            ORDER BY created_at ASC, event_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![ledger.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(event_id, symbol, created_at)| {
                Ok(PendingMarker {
                    ledger: ledger.clone(),
                    event_id: parse_event_id(event_id)?,
                    symbol,
                    created_at: created_at as u64,
                })
            })
            .collect()
    }

    /// Remove a marker from the outbox once it is known to be published.
    pub fn clear_pending_marker(&self, ledger: &LedgerId, event_id: &EventId) -> Result<bool> {
        let guard = self.lock()?;
        let removed = guard.conn.execute(
            "DELETE FROM pending_markers WHERE ledger_id = ?1 AND event_id = ?2",
            params![ledger.as_str(), event_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> Result<TrustDbMetrics> {
        Ok(self.lock()?.metrics.clone())
    }

    /// Database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_verdict(conn: &Connection, ledger: &LedgerId, event_id: &EventId) -> Result<TrustVerdict> {
    let state: Option<String> = conn
        .query_row(
            "SELECT state FROM verdicts WHERE ledger_id = ?1 AND event_id = ?2",
            params![ledger.as_str(), event_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match state {
        Some(state) => state
            .parse()
            .map_err(|e: ledgertrust_core::CoreError| TrustDbError::Corrupt(e.to_string())),
        None => Ok(TrustVerdict::Untrusted),
    }
}

/// Persist `verdict`, returning whether anything changed.
fn write_verdict(
    conn: &Connection,
    metrics: &mut TrustDbMetrics,
    ledger: &LedgerId,
    event_id: &EventId,
    verdict: TrustVerdict,
) -> Result<bool> {
    let stored = read_verdict(conn, ledger, event_id)?;
    if stored == verdict {
        return Ok(false);
    }
    if stored.is_terminal() {
        metrics.verdict_conflicts_total += 1;
        error!(
            ledger = %ledger,
            event_id = %event_id,
            stored = %stored,
            requested = %verdict,
            "Conflicting trust verdict, refusing to overwrite"
        );
        return Err(TrustDbError::ConflictingVerdict {
            ledger: ledger.clone(),
            event_id: event_id.clone(),
            stored,
            requested: verdict,
        });
    }

    conn.execute(
        r#"
        INSERT INTO verdicts (ledger_id, event_id, state) VALUES (?1, ?2, ?3)
        ON CONFLICT(ledger_id, event_id) DO UPDATE SET state = excluded.state
        "#,
        params![ledger.as_str(), event_id.as_str(), verdict.as_str()],
    )?;
    Ok(true)
}

fn query_ids<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<BTreeSet<EventId>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raw.into_iter().map(parse_event_id).collect()
}

fn parse_event_id(raw: String) -> Result<EventId> {
    EventId::new(raw).map_err(|e| TrustDbError::Corrupt(e.to_string()))
}
