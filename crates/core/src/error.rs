//! Core error types

use thiserror::Error;

/// Core error type for ledgertrust
#[derive(Debug, Error)]
pub enum CoreError {
    /// An identifier failed validation
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidId {
        /// Identifier kind (ledger, event, account)
        kind: &'static str,
        /// Rejected input
        value: String,
        /// Why the input was rejected
        reason: &'static str,
    },

    /// Transaction content violates its invariants
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Applying a transaction overflowed an account balance
    #[error("Balance overflow for account {0}")]
    BalanceOverflow(String),

    /// Persisted verdict could not be decoded
    #[error("Unknown trust verdict: {0}")]
    UnknownVerdict(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
