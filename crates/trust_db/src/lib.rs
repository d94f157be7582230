//! Trust Database
//!
//! Persistent, memoized trust state for ledger summaries:
//! - Per-event verdicts (untrusted / trusted / rejected)
//! - Summary DAG edges (summary -> parent, summary -> transaction), indexed
//!   in both directions
//! - The heads frontier used to anchor newly constructed summaries
//! - An outbox of rejection markers that still have to be published
//!
//! Every operation is scoped by ledger id.

pub mod database;
pub mod schema;

pub use database::{PendingMarker, TrustDatabase, TrustDbError, TrustDbMetrics};
