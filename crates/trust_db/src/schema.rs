//! SQLite schema for the trust database.

use rusqlite::Connection;

/// Tables and indices. Verdicts, edges and heads are append-mostly: rows are
/// only removed from `heads` (superseded tips) and `pending_markers`
/// (published markers).
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS verdicts (
    ledger_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    state TEXT NOT NULL,
    decided_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
    PRIMARY KEY (ledger_id, event_id)
);

CREATE TABLE IF NOT EXISTS summary_edges (
    ledger_id TEXT NOT NULL,
    summary_id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    PRIMARY KEY (ledger_id, summary_id, parent_id)
);
CREATE INDEX IF NOT EXISTS idx_summary_edges_parent
    ON summary_edges(ledger_id, parent_id);

CREATE TABLE IF NOT EXISTS summary_transactions (
    ledger_id TEXT NOT NULL,
    summary_id TEXT NOT NULL,
    transaction_id TEXT NOT NULL,
    PRIMARY KEY (ledger_id, summary_id, transaction_id)
);
CREATE INDEX IF NOT EXISTS idx_summary_transactions_tx
    ON summary_transactions(ledger_id, transaction_id);

CREATE TABLE IF NOT EXISTS heads (
    ledger_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    PRIMARY KEY (ledger_id, event_id)
);

CREATE TABLE IF NOT EXISTS pending_markers (
    ledger_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
    PRIMARY KEY (ledger_id, event_id)
);
"#;

/// Apply pragmas and create tables if missing.
pub fn init(conn: &Connection, file_backed: bool) -> rusqlite::Result<()> {
    if file_backed {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA_SQL)
}
