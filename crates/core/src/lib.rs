//! Core types for ledgertrust.
//!
//! Identifiers, ledger event content, trust verdicts, configuration and
//! logging shared by the trust database, the verifier and the node binary.

pub mod config;
pub mod content;
pub mod error;
pub mod ids;
pub mod logging;
pub mod verdict;

pub use config::{LogFormat, TrustConfig, DEFAULT_REJECTION_MARKER};
pub use content::{
    balances_equal, normalize_balances, Balances, EventContent, ParentLinks, SummaryEvent,
    TimelineEvent, TransactionEvent, SUMMARY_EVENT_TYPE, TRANSACTION_EVENT_TYPE,
};
pub use error::{CoreError, Result};
pub use ids::{AccountId, EventId, LedgerId};
pub use verdict::TrustVerdict;
