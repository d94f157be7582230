//! Error types for verification, summary construction and the service facade.

use ledgertrust_core::{CoreError, EventId};
use ledgertrust_trust_db::TrustDbError;
use thiserror::Error;

/// Event store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or answered with an error
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// Sending an event or reaction failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// An event with this id is already in the log
    #[error("Duplicate event: {0}")]
    DuplicateEvent(EventId),
}

/// Verification errors. Untrusted input never produces one of these; they
/// signal a broken trust database or a logic bug.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Trust database error: {0}")]
    TrustDb(#[from] TrustDbError),
}

/// Summary construction errors
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("Trust database error: {0}")]
    TrustDb(#[from] TrustDbError),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] CoreError),

    #[error("Transaction {0} is already part of the trusted history")]
    AlreadySummarized(EventId),

    /// No local heads, but the timeline already carries summary `0`. A new
    /// root after it would be rejected by every verifier.
    #[error("Timeline already has summary {0} but no trusted head")]
    HistoryNotAnchored(EventId),

    #[error("Head summary {0} could not be resolved")]
    MissingHead(EventId),

    #[error("Heads {first} and {second} disagree on balances")]
    DivergentHeads { first: EventId, second: EventId },

    #[error("Event store error: {0}")]
    Store(#[from] StoreError),
}

/// Service facade errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Trust database error: {0}")]
    TrustDb(#[from] TrustDbError),

    #[error("Verification error: {0}")]
    Verifier(#[from] VerifierError),

    #[error("Summary error: {0}")]
    Summary(#[from] SummaryError),

    #[error("Event store error: {0}")]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
