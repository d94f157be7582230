//! Trust propagation for summary-based ledgers.
//!
//! A ledger is a shared, append-only timeline of transactions and balance
//! summaries. Each summary names parent summaries and the transactions since
//! them; [`TrustVerifier`] re-derives its balances and decides whether it is
//! trusted, [`SummaryConstructor`] extends the local trusted frontier, and
//! [`LedgerTrustService`] ties both to an [`EventStore`] with per-ledger
//! serialization.

pub mod error;
pub mod event_store;
pub mod service;
pub mod summary;
pub mod verifier;

pub use error::{ServiceError, StoreError, SummaryError, VerifierError};
pub use event_store::{CallCounts, EventPredicate, EventStore, MemoryEventStore, Reactions};
pub use service::LedgerTrustService;
pub use summary::{CreatedSummary, SummaryConstructor};
pub use verifier::{RejectionReason, TrustVerifier, VerifierSettings};
