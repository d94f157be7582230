//! Summary construction.
//!
//! Builds the next summary from the trusted frontier: every head gets the
//! transactions published since it that its history has not claimed yet,
//! the resulting balances must agree across heads, and the published summary
//! is registered as trusted since it is self-authored.

use crate::error::SummaryError;
use crate::event_store::EventStore;
use ledgertrust_core::{
    balances_equal, Balances, EventContent, EventId, LedgerId, ParentLinks, SummaryEvent,
    TimelineEvent, TransactionEvent,
};
use ledgertrust_trust_db::TrustDatabase;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type Result<T> = std::result::Result<T, SummaryError>;

/// A summary published by [`SummaryConstructor::create_summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSummary {
    pub event_id: EventId,
    pub summary: SummaryEvent,
    pub is_root: bool,
}

/// Draft before publication.
struct Draft {
    summary: SummaryEvent,
    /// Edges recorded for the summary; for a root these are the folded transactions
    transactions: BTreeSet<EventId>,
    is_root: bool,
}

pub struct SummaryConstructor {
    store: Arc<dyn EventStore>,
    db: Arc<TrustDatabase>,
    scan_limit: usize,
}

impl SummaryConstructor {
    /// `scan_limit` bounds how far back the timeline is read per head.
    pub fn new(store: Arc<dyn EventStore>, db: Arc<TrustDatabase>, scan_limit: usize) -> Self {
        Self {
            store,
            db,
            scan_limit,
        }
    }

    /// Build, publish and register the summary following `transaction_id`.
    ///
    /// Nothing is recorded when publishing fails; the caller retries.
    pub async fn create_summary(
        &self,
        ledger: &LedgerId,
        transaction_id: &EventId,
        transaction: &TransactionEvent,
    ) -> Result<CreatedSummary> {
        transaction.validate()?;

        let heads = self.db.get_heads(ledger)?;
        let draft = if heads.is_empty() {
            self.genesis(ledger, transaction_id, transaction).await?
        } else {
            self.extend(ledger, &heads, transaction_id, transaction).await?
        };

        let event_id = self
            .store
            .publish_event(ledger, EventContent::Summary(draft.summary.clone()))
            .await?;

        self.db.add_trusted_summary(
            ledger,
            &event_id,
            &draft.summary.parent_ids(),
            &draft.transactions,
            draft.is_root,
        )?;

        info!(
            ledger = %ledger,
            event_id = %event_id,
            parents = draft.summary.parents.len(),
            transactions = draft.transactions.len(),
            is_root = draft.is_root,
            "Summary created"
        );

        Ok(CreatedSummary {
            event_id,
            summary: draft.summary,
            is_root: draft.is_root,
        })
    }

    /// Merged view of the frontier, `None` before the first summary.
    pub async fn current_summary(&self, ledger: &LedgerId) -> Result<Option<SummaryEvent>> {
        let heads = self.db.get_heads(ledger)?;
        let mut merged: Option<(EventId, Balances)> = None;
        let mut parents = ParentLinks::new();

        for head in &heads {
            let balances = self.head_summary(ledger, head).await?.balances;
            match &merged {
                Some((first, expected)) if !balances_equal(expected, &balances) => {
                    return Err(SummaryError::DivergentHeads {
                        first: first.clone(),
                        second: head.clone(),
                    });
                }
                Some(_) => {}
                None => merged = Some((head.clone(), balances)),
            }
            parents.insert(head.clone(), BTreeSet::new());
        }

        Ok(merged.map(|(_, balances)| SummaryEvent::new(balances, parents)))
    }

    async fn genesis(
        &self,
        ledger: &LedgerId,
        transaction_id: &EventId,
        transaction: &TransactionEvent,
    ) -> Result<Draft> {
        let history = self
            .store
            .paginate_backward(ledger, transaction_id, self.scan_limit)
            .await?;
        if let Some(existing) = history.iter().find(|event| event.is_summary()) {
            warn!(
                ledger = %ledger,
                existing = %existing.event_id,
                "Refusing to build a root over an existing summary"
            );
            return Err(SummaryError::HistoryNotAnchored(existing.event_id.clone()));
        }

        let mut balances = Balances::new();
        let mut transactions = BTreeSet::new();
        for (event_id, tx) in history.iter().rev().filter_map(valid_transaction) {
            tx.apply_to(&mut balances)?;
            transactions.insert(event_id.clone());
        }
        transaction.apply_to(&mut balances)?;
        transactions.insert(transaction_id.clone());

        debug!(ledger = %ledger, transactions = transactions.len(), "Building root summary");
        Ok(Draft {
            summary: SummaryEvent::new(balances, ParentLinks::new()),
            transactions,
            is_root: true,
        })
    }

    async fn extend(
        &self,
        ledger: &LedgerId,
        heads: &BTreeSet<EventId>,
        transaction_id: &EventId,
        transaction: &TransactionEvent,
    ) -> Result<Draft> {
        if self.claimed_by_any(ledger, transaction_id, heads)? {
            return Err(SummaryError::AlreadySummarized(transaction_id.clone()));
        }

        let mut parents = ParentLinks::new();
        let mut merged: Option<(EventId, Balances)> = None;

        for head in heads {
            let mut balances = self.head_summary(ledger, head).await?.balances;
            let mut pending = self.unsummarized(ledger, head, transaction_id).await?;
            pending.insert(transaction_id.clone(), transaction.clone());

            for tx in pending.values() {
                tx.apply_to(&mut balances)?;
            }

            match &merged {
                Some((first, expected)) if !balances_equal(expected, &balances) => {
                    warn!(ledger = %ledger, first = %first, second = %head, "Heads diverge");
                    return Err(SummaryError::DivergentHeads {
                        first: first.clone(),
                        second: head.clone(),
                    });
                }
                Some(_) => {}
                None => merged = Some((head.clone(), balances)),
            }
            parents.insert(head.clone(), pending.into_keys().collect());
        }

        let balances = merged.map(|(_, balances)| balances).unwrap_or_default();
        let summary = SummaryEvent::new(balances, parents);
        Ok(Draft {
            transactions: summary.referenced_transactions(),
            summary,
            is_root: false,
        })
    }

    /// Transactions after `head` and before `until` that the head's history
    /// has not claimed.
    async fn unsummarized(
        &self,
        ledger: &LedgerId,
        head: &EventId,
        until: &EventId,
    ) -> Result<BTreeMap<EventId, TransactionEvent>> {
        let events = self
            .store
            .paginate_backward(ledger, until, self.scan_limit)
            .await?;

        let mut found = BTreeMap::new();
        let mut reached_head = false;
        for event in &events {
            if &event.event_id == head {
                reached_head = true;
                break;
            }
            if let Some((event_id, tx)) = valid_transaction(event) {
                found.insert(event_id.clone(), tx.clone());
            }
        }
        if !reached_head {
            warn!(
                ledger = %ledger,
                head = %head,
                scanned = events.len(),
                "Head not found within scan limit"
            );
        }

        let candidates: BTreeSet<EventId> = found.keys().cloned().collect();
        let claimed = self
            .db
            .get_summaries_referencing_transactions(ledger, &candidates)?;
        for (transaction_id, summaries) in claimed {
            for summary in &summaries {
                if self.db.is_ancestor_or_self(ledger, summary, head)? {
                    found.remove(&transaction_id);
                    break;
                }
            }
        }
        Ok(found)
    }

    fn claimed_by_any(
        &self,
        ledger: &LedgerId,
        transaction_id: &EventId,
        heads: &BTreeSet<EventId>,
    ) -> Result<bool> {
        let query = BTreeSet::from([transaction_id.clone()]);
        let claimed = self.db.get_summaries_referencing_transactions(ledger, &query)?;
        for summary in claimed.values().flatten() {
            for head in heads {
                if self.db.is_ancestor_or_self(ledger, summary, head)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn head_summary(&self, ledger: &LedgerId, head: &EventId) -> Result<SummaryEvent> {
        let event = self.store.get_event(ledger, head).await?;
        event
            .as_ref()
            .and_then(TimelineEvent::as_summary)
            .cloned()
            .ok_or_else(|| SummaryError::MissingHead(head.clone()))
    }
}

fn valid_transaction(event: &TimelineEvent) -> Option<(&EventId, &TransactionEvent)> {
    let tx = event.as_transaction()?;
    tx.validate().ok()?;
    Some((&event.event_id, tx))
}
