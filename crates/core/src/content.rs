//! Ledger event content.
//!
//! Room messages are discriminated by a type tag at the wire level. Here the
//! set of contents the trust algorithm understands is closed: a transaction,
//! a balance summary, or anything else the room happens to carry.

use crate::error::{CoreError, Result};
use crate::ids::{AccountId, EventId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Running balance per account.
pub type Balances = BTreeMap<AccountId, i64>;

/// Parent summary -> transactions claimed between that parent and the child.
pub type ParentLinks = BTreeMap<EventId, BTreeSet<EventId>>;

/// Event type tag for transactions.
pub const TRANSACTION_EVENT_TYPE: &str = "org.ledgertrust.transaction";
/// Event type tag for balance summaries.
pub const SUMMARY_EVENT_TYPE: &str = "org.ledgertrust.summary";

/// A transfer from one sender to one or more receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    /// Account debited with the total
    pub sender: AccountId,
    /// Credited accounts and their (positive) amounts
    pub receivers: BTreeMap<AccountId, i64>,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Reply-thread pointer, ignored by verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<EventId>,
}

impl TransactionEvent {
    /// Build a validated transaction.
    pub fn new(
        sender: AccountId,
        receivers: BTreeMap<AccountId, i64>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let tx = Self {
            sender,
            receivers,
            description: description.into(),
            relates_to: None,
        };
        tx.validate()?;
        Ok(tx)
    }

    /// Attach a reply pointer.
    pub fn with_relates_to(mut self, event_id: EventId) -> Self {
        self.relates_to = Some(event_id);
        self
    }

    /// Check that every amount is strictly positive and the total fits in i64.
    ///
    /// Content arriving from the log is deserialized without this check, so
    /// the verifier calls it before trusting any amount.
    pub fn validate(&self) -> Result<()> {
        if self.receivers.is_empty() {
            return Err(CoreError::InvalidTransaction(
                "transaction has no receivers".to_string(),
            ));
        }
        if let Some((account, amount)) = self.receivers.iter().find(|(_, amount)| **amount <= 0) {
            return Err(CoreError::InvalidTransaction(format!(
                "amount {} for {} is not positive",
                amount, account
            )));
        }
        self.checked_total()
            .map(|_| ())
            .ok_or_else(|| CoreError::InvalidTransaction("total overflows".to_string()))
    }

    fn checked_total(&self) -> Option<i64> {
        self.receivers
            .values()
            .try_fold(0i64, |acc, amount| acc.checked_add(*amount))
    }

    /// Sum of all receiver amounts (saturating).
    pub fn total(&self) -> i64 {
        self.receivers
            .values()
            .fold(0i64, |acc, amount| acc.saturating_add(*amount))
    }

    /// Debit the sender and credit each receiver.
    pub fn apply_to(&self, balances: &mut Balances) -> Result<()> {
        let total = self.checked_total().ok_or_else(|| {
            CoreError::BalanceOverflow(self.sender.to_string())
        })?;
        adjust(balances, &self.sender, -total)?;
        for (receiver, amount) in &self.receivers {
            adjust(balances, receiver, *amount)?;
        }
        Ok(())
    }
}

fn adjust(balances: &mut Balances, account: &AccountId, delta: i64) -> Result<()> {
    let entry = balances.entry(account.clone()).or_insert(0);
    *entry = entry
        .checked_add(delta)
        .ok_or_else(|| CoreError::BalanceOverflow(account.to_string()))?;
    Ok(())
}

/// A checkpoint claiming a balance state derived from its parents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryEvent {
    /// Claimed balances after all referenced transactions
    pub balances: Balances,
    /// Parent summaries and the transactions between each parent and this one
    #[serde(default)]
    pub parents: ParentLinks,
}

impl SummaryEvent {
    /// Create a summary.
    pub fn new(balances: Balances, parents: ParentLinks) -> Self {
        Self { balances, parents }
    }

    /// A summary with no parents anchors a trust chain.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Every transaction id referenced through any parent.
    pub fn referenced_transactions(&self) -> BTreeSet<EventId> {
        self.parents.values().flatten().cloned().collect()
    }

    /// Declared parent ids.
    pub fn parent_ids(&self) -> BTreeSet<EventId> {
        self.parents.keys().cloned().collect()
    }
}

/// Drop zero entries so that an account at 0 compares equal to an absent one.
pub fn normalize_balances(balances: &Balances) -> Balances {
    balances
        .iter()
        .filter(|(_, amount)| **amount != 0)
        .map(|(account, amount)| (account.clone(), *amount))
        .collect()
}

/// Compare two balance maps, ignoring zero entries.
pub fn balances_equal(a: &Balances, b: &Balances) -> bool {
    normalize_balances(a) == normalize_balances(b)
}

/// Closed set of contents the trust algorithm distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum EventContent {
    /// A transfer
    #[serde(rename = "org.ledgertrust.transaction")]
    Transaction(TransactionEvent),
    /// A balance summary
    #[serde(rename = "org.ledgertrust.summary")]
    Summary(SummaryEvent),
    /// Any other room event
    #[serde(rename = "other")]
    Other {
        /// Original event type
        event_type: String,
    },
}

impl EventContent {
    /// Wire-level type tag.
    pub fn event_type(&self) -> &str {
        match self {
            EventContent::Transaction(_) => TRANSACTION_EVENT_TYPE,
            EventContent::Summary(_) => SUMMARY_EVENT_TYPE,
            EventContent::Other { event_type } => event_type,
        }
    }
}

/// An event as delivered by the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Identifier assigned by the log
    pub event_id: EventId,
    /// Account that sent the event
    pub sender: AccountId,
    /// Server-side timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Typed content
    pub content: EventContent,
}

impl TimelineEvent {
    /// Summary content, if this is a summary.
    pub fn as_summary(&self) -> Option<&SummaryEvent> {
        match &self.content {
            EventContent::Summary(summary) => Some(summary),
            _ => None,
        }
    }

    /// Transaction content, if this is a transaction.
    pub fn as_transaction(&self) -> Option<&TransactionEvent> {
        match &self.content {
            EventContent::Transaction(tx) => Some(tx),
            _ => None,
        }
    }

    /// True for summary events.
    pub fn is_summary(&self) -> bool {
        matches!(self.content, EventContent::Summary(_))
    }
}
