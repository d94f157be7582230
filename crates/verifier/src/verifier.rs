//! Trust Verifier
//!
//! Decides whether a balance summary is TRUSTED or REJECTED by validating it
//! against the parent summaries and transactions it references. Parents are
//! resolved first, so the trust of a summary is derived from the trust of its
//! history.
//!
//! # Rules (first match wins)
//!
//! 1. A memoized terminal verdict is returned as is, without touching the log.
//! 2. A rejection marker reaction on the summary rejects it (no new marker).
//! 3. A root (no parents) is trusted only if no earlier summary exists.
//! 4. At least one parent must resolve to a trusted summary.
//! 5. For every parent, parent balances plus the referenced transactions must
//!    equal the claimed balances.
//! 6. Two parents sharing a direct ancestor must claim the same transactions
//!    between that ancestor and this summary.
//! 7. Referenced transactions must lie between their parent and this summary
//!    in time.
//!
//! # Traversal
//!
//! The DAG is walked with an explicit stack instead of recursion, so deep
//! histories cannot overflow the call stack. A frame is expanded once (its
//! unresolved parents are pushed) and evaluated once all of them are decided.
//! Parent references that loop back onto the current path are treated as
//! untrusted.

use crate::error::VerifierError;
use crate::event_store::EventStore;
use ledgertrust_core::{
    balances_equal, EventId, LedgerId, SummaryEvent, TimelineEvent, TransactionEvent,
    TrustConfig, TrustVerdict,
};
use ledgertrust_trust_db::TrustDatabase;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type Result<T> = std::result::Result<T, VerifierError>;

/// Why a summary was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// A rejection marker was already attached
    MarkerPresent,
    /// Root summary published after an earlier summary
    LateRoot,
    /// None of the declared parents is trusted
    NoTrustedParent,
    /// A declared parent is not a summary in the log
    UnresolvableParent,
    /// A referenced transaction is missing or malformed
    UnresolvableTransaction,
    /// Parent balances plus transactions do not give the claimed balances
    BalanceMismatch,
    /// Two parents disagree about their shared history
    ForkMismatch,
    /// A transaction lies outside its parent..summary time window
    TemporalViolation,
}

impl RejectionReason {
    /// Stable name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::MarkerPresent => "marker_present",
            RejectionReason::LateRoot => "late_root",
            RejectionReason::NoTrustedParent => "no_trusted_parent",
            RejectionReason::UnresolvableParent => "unresolvable_parent",
            RejectionReason::UnresolvableTransaction => "unresolvable_transaction",
            RejectionReason::BalanceMismatch => "balance_mismatch",
            RejectionReason::ForkMismatch => "fork_mismatch",
            RejectionReason::TemporalViolation => "temporal_violation",
        }
    }

    /// Whether rejecting for this reason publishes a marker.
    pub fn emits_marker(self) -> bool {
        !matches!(self, RejectionReason::MarkerPresent)
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verifier knobs, usually derived from [`TrustConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierSettings {
    /// Reaction symbol marking a rejected summary
    pub rejection_marker: String,
    /// Events scanned backward when checking a root
    pub root_scan_limit: usize,
    /// Fold verified summaries into the heads frontier
    pub promote_verified_summaries: bool,
}

impl From<&TrustConfig> for VerifierSettings {
    fn from(config: &TrustConfig) -> Self {
        Self {
            rejection_marker: config.rejection_marker.clone(),
            root_scan_limit: config.root_scan_limit,
            promote_verified_summaries: config.promote_verified_summaries,
        }
    }
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self::from(&TrustConfig::default())
    }
}

struct Frame {
    event_id: EventId,
    timestamp: u64,
    summary: SummaryEvent,
    expanded: bool,
}

impl Frame {
    fn new(event_id: EventId, timestamp: u64, summary: SummaryEvent) -> Self {
        Self {
            event_id,
            timestamp,
            summary,
            expanded: false,
        }
    }
}

enum Outcome {
    /// Already decided, no side effects
    Known(TrustVerdict),
    Accept,
    Reject(RejectionReason),
    /// Could not be decided now (log unavailable); nothing is memoized
    Undecided,
}

/// State of one verification walk.
#[derive(Default)]
struct Walk {
    /// Events fetched during this walk, `None` when absent or unreadable
    events: HashMap<EventId, Option<TimelineEvent>>,
    /// Verdicts reached during this walk, including undecided ones
    resolved: HashMap<EventId, TrustVerdict>,
    /// Expanded frames still on the stack
    path: BTreeSet<EventId>,
}

/// Summary trust verifier
pub struct TrustVerifier {
    store: Arc<dyn EventStore>,
    db: Arc<TrustDatabase>,
    settings: VerifierSettings,
}

impl TrustVerifier {
    pub fn new(
        store: Arc<dyn EventStore>,
        db: Arc<TrustDatabase>,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            store,
            db,
            settings,
        }
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Determine the trust verdict of `summary_id`.
    ///
    /// Returns `Untrusted` only when the decision depends on a log lookup that
    /// failed; such results are not memoized.
    pub async fn check_trusted(
        &self,
        ledger: &LedgerId,
        summary_id: &EventId,
        timestamp: u64,
        content: &SummaryEvent,
    ) -> Result<TrustVerdict> {
        let memo = self.db.check_trust(ledger, summary_id)?;
        if memo.is_terminal() {
            debug!(ledger = %ledger, event_id = %summary_id, verdict = %memo, "Memoized verdict");
            return Ok(memo);
        }

        let mut walk = Walk::default();
        let mut stack = vec![Frame::new(summary_id.clone(), timestamp, content.clone())];
        let mut verdict = TrustVerdict::Untrusted;

        while let Some(index) = stack.len().checked_sub(1) {
            if !stack[index].expanded {
                stack[index].expanded = true;

                let early = self.precheck(ledger, &stack[index], &walk).await?;
                if let Some(outcome) = early {
                    let Some(frame) = stack.pop() else { break };
                    verdict = self.finalize(ledger, &frame, outcome, &mut walk).await?;
                    continue;
                }

                walk.path.insert(stack[index].event_id.clone());
                let parents = stack[index].summary.parent_ids();
                let children = self.unresolved_parents(ledger, parents, &mut walk).await?;
                stack.extend(children);
                continue;
            }

            let Some(frame) = stack.pop() else { break };
            walk.path.remove(&frame.event_id);
            let outcome = self.evaluate(ledger, &frame, &mut walk).await?;
            verdict = self.finalize(ledger, &frame, outcome, &mut walk).await?;
        }

        Ok(verdict)
    }

    /// Rules 1-3, which can decide a frame before its parents are looked at.
    async fn precheck(
        &self,
        ledger: &LedgerId,
        frame: &Frame,
        walk: &Walk,
    ) -> Result<Option<Outcome>> {
        if let Some(verdict) = walk.resolved.get(&frame.event_id) {
            return Ok(Some(Outcome::Known(*verdict)));
        }
        let memo = self.db.check_trust(ledger, &frame.event_id)?;
        if memo.is_terminal() {
            return Ok(Some(Outcome::Known(memo)));
        }

        if self.has_rejection_marker(ledger, &frame.event_id).await {
            return Ok(Some(Outcome::Reject(RejectionReason::MarkerPresent)));
        }

        if frame.summary.is_root() {
            let is_summary = |event: &TimelineEvent| event.is_summary();
            let scan = self
                .store
                .scan_backward(
                    ledger,
                    &frame.event_id,
                    &is_summary,
                    self.settings.root_scan_limit,
                )
                .await;
            let outcome = match scan {
                Ok(false) => Outcome::Accept,
                Ok(true) => Outcome::Reject(RejectionReason::LateRoot),
                Err(e) => {
                    warn!(
                        ledger = %ledger,
                        event_id = %frame.event_id,
                        error = %e,
                        "Root scan failed, leaving summary undecided"
                    );
                    Outcome::Undecided
                }
            };
            return Ok(Some(outcome));
        }

        Ok(None)
    }

    /// Frames for parents that still need a verdict.
    async fn unresolved_parents(
        &self,
        ledger: &LedgerId,
        parents: BTreeSet<EventId>,
        walk: &mut Walk,
    ) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for parent_id in parents {
            if walk.resolved.contains_key(&parent_id) {
                continue;
            }
            if walk.path.contains(&parent_id) {
                warn!(ledger = %ledger, event_id = %parent_id, "Summary parent cycle detected");
                continue;
            }
            let memo = self.db.check_trust(ledger, &parent_id)?;
            if memo.is_terminal() {
                walk.resolved.insert(parent_id, memo);
                continue;
            }
            if let Some(event) = self.fetch(ledger, &parent_id, walk).await {
                if let Some(summary) = event.as_summary() {
                    frames.push(Frame::new(parent_id, event.timestamp, summary.clone()));
                }
            }
        }
        Ok(frames)
    }

    /// Rules 4-8, once every parent has a verdict.
    async fn evaluate(&self, ledger: &LedgerId, frame: &Frame, walk: &mut Walk) -> Result<Outcome> {
        let summary = &frame.summary;

        // Rule 4: at least one resolvable, trusted parent.
        let mut parents: BTreeMap<EventId, (u64, SummaryEvent)> = BTreeMap::new();
        let mut any_trusted = false;
        let mut any_undecided = false;
        for parent_id in summary.parents.keys() {
            let Some(event) = self.fetch(ledger, parent_id, walk).await else {
                continue;
            };
            let Some(parent) = event.as_summary() else {
                continue;
            };
            match self.parent_verdict(ledger, parent_id, walk)? {
                TrustVerdict::Trusted => any_trusted = true,
                // Left open by a failed lookup in this walk.
                TrustVerdict::Untrusted if walk.resolved.contains_key(parent_id) => {
                    any_undecided = true
                }
                _ => {}
            }
            parents.insert(parent_id.clone(), (event.timestamp, parent.clone()));
        }
        if !any_trusted {
            if any_undecided {
                return Ok(Outcome::Undecided);
            }
            return Ok(Outcome::Reject(RejectionReason::NoTrustedParent));
        }

        // Rule 5: balances are consistent with every declared parent.
        let mut transaction_times: BTreeMap<EventId, u64> = BTreeMap::new();
        for (parent_id, transaction_ids) in &summary.parents {
            let Some((_, parent)) = parents.get(parent_id) else {
                return Ok(Outcome::Reject(RejectionReason::UnresolvableParent));
            };
            let mut balances = parent.balances.clone();
            for transaction_id in transaction_ids {
                let Some((timestamp, transaction)) =
                    self.fetch_transaction(ledger, transaction_id, walk).await
                else {
                    return Ok(Outcome::Reject(RejectionReason::UnresolvableTransaction));
                };
                if transaction.apply_to(&mut balances).is_err() {
                    return Ok(Outcome::Reject(RejectionReason::BalanceMismatch));
                }
                transaction_times.insert(transaction_id.clone(), timestamp);
            }
            if !balances_equal(&balances, &summary.balances) {
                debug!(
                    ledger = %ledger,
                    event_id = %frame.event_id,
                    parent = %parent_id,
                    "Balances do not follow from parent"
                );
                return Ok(Outcome::Reject(RejectionReason::BalanceMismatch));
            }
        }

        // Rule 6: parents with a common direct ancestor agree on what happened since.
        let parent_ids: Vec<&EventId> = summary.parents.keys().collect();
        for (i, first) in parent_ids.iter().enumerate() {
            for second in &parent_ids[i + 1..] {
                if !self.forks_agree(summary, first, second, &parents) {
                    return Ok(Outcome::Reject(RejectionReason::ForkMismatch));
                }
            }
        }

        // Rule 7: transactions fall between their parent and this summary.
        for (parent_id, transaction_ids) in &summary.parents {
            let parent_time = parents.get(parent_id).map(|(t, _)| *t).unwrap_or(0);
            for transaction_id in transaction_ids {
                let Some(time) = transaction_times.get(transaction_id) else {
                    continue;
                };
                if *time < parent_time || *time > frame.timestamp {
                    return Ok(Outcome::Reject(RejectionReason::TemporalViolation));
                }
            }
        }

        Ok(Outcome::Accept)
    }

    fn forks_agree(
        &self,
        summary: &SummaryEvent,
        first: &EventId,
        second: &EventId,
        parents: &BTreeMap<EventId, (u64, SummaryEvent)>,
    ) -> bool {
        let (Some((_, first_parent)), Some((_, second_parent))) =
            (parents.get(first), parents.get(second))
        else {
            return true;
        };
        let empty = BTreeSet::new();
        let first_since = summary.parents.get(first).unwrap_or(&empty);
        let second_since = summary.parents.get(second).unwrap_or(&empty);

        for (ancestor, first_claim) in &first_parent.parents {
            let Some(second_claim) = second_parent.parents.get(ancestor) else {
                continue;
            };
            let first_path: BTreeSet<&EventId> = first_claim.iter().chain(first_since).collect();
            let second_path: BTreeSet<&EventId> =
                second_claim.iter().chain(second_since).collect();
            if first_path != second_path {
                return false;
            }
        }
        true
    }

    fn parent_verdict(
        &self,
        ledger: &LedgerId,
        parent_id: &EventId,
        walk: &Walk,
    ) -> Result<TrustVerdict> {
        if let Some(verdict) = walk.resolved.get(parent_id) {
            return Ok(*verdict);
        }
        if walk.path.contains(parent_id) {
            return Ok(TrustVerdict::Untrusted);
        }
        Ok(self.db.check_trust(ledger, parent_id)?)
    }

    async fn finalize(
        &self,
        ledger: &LedgerId,
        frame: &Frame,
        outcome: Outcome,
        walk: &mut Walk,
    ) -> Result<TrustVerdict> {
        let verdict = match outcome {
            Outcome::Known(verdict) => verdict,
            Outcome::Undecided => TrustVerdict::Untrusted,
            Outcome::Accept => {
                self.accept(ledger, frame)?;
                TrustVerdict::Trusted
            }
            Outcome::Reject(reason) => {
                self.reject(ledger, &frame.event_id, reason).await?;
                TrustVerdict::Rejected
            }
        };
        walk.resolved.insert(frame.event_id.clone(), verdict);
        Ok(verdict)
    }

    fn accept(&self, ledger: &LedgerId, frame: &Frame) -> Result<()> {
        if self.settings.promote_verified_summaries {
            self.db.add_trusted_summary(
                ledger,
                &frame.event_id,
                &frame.summary.parent_ids(),
                &frame.summary.referenced_transactions(),
                frame.summary.is_root(),
            )?;
        } else {
            self.db.mark_trusted(ledger, &frame.event_id)?;
        }
        info!(ledger = %ledger, event_id = %frame.event_id, "Summary trusted");
        Ok(())
    }

    async fn reject(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
        reason: RejectionReason,
    ) -> Result<()> {
        warn!(ledger = %ledger, event_id = %event_id, reason = %reason, "Summary rejected");
        if !reason.emits_marker() {
            self.db.mark_rejected(ledger, event_id)?;
            return Ok(());
        }
        self.db
            .mark_rejected_with_marker(ledger, event_id, &self.settings.rejection_marker)?;
        self.publish_marker(ledger, event_id, &self.settings.rejection_marker)
            .await;
        Ok(())
    }

    /// Publish the rejection marker and clear it from the outbox.
    /// Failures are logged; the marker stays queued for a later retry.
    pub async fn publish_marker(&self, ledger: &LedgerId, event_id: &EventId, symbol: &str) -> bool {
        match self.store.publish_reaction(ledger, event_id, symbol).await {
            Ok(()) => {
                if let Err(e) = self.db.clear_pending_marker(ledger, event_id) {
                    warn!(ledger = %ledger, event_id = %event_id, error = %e, "Could not clear published marker");
                }
                true
            }
            Err(e) => {
                warn!(
                    ledger = %ledger,
                    event_id = %event_id,
                    error = %e,
                    "Rejection marker publish failed, kept in outbox"
                );
                false
            }
        }
    }

    /// Whether the configured rejection marker is attached to `event_id`.
    pub async fn has_rejection_marker(&self, ledger: &LedgerId, event_id: &EventId) -> bool {
        match self.store.get_reactions(ledger, event_id).await {
            Ok(reactions) => reactions
                .get(&self.settings.rejection_marker)
                .is_some_and(|actors| !actors.is_empty()),
            Err(e) => {
                warn!(ledger = %ledger, event_id = %event_id, error = %e, "Reaction lookup failed");
                false
            }
        }
    }

    async fn fetch(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
        walk: &mut Walk,
    ) -> Option<TimelineEvent> {
        if let Some(cached) = walk.events.get(event_id) {
            return cached.clone();
        }
        let event = match self.store.get_event(ledger, event_id).await {
            Ok(event) => event,
            Err(e) => {
                warn!(ledger = %ledger, event_id = %event_id, error = %e, "Event lookup failed, treating as absent");
                None
            }
        };
        walk.events.insert(event_id.clone(), event.clone());
        event
    }

    async fn fetch_transaction(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
        walk: &mut Walk,
    ) -> Option<(u64, TransactionEvent)> {
        let event = self.fetch(ledger, event_id, walk).await?;
        let transaction = event.as_transaction()?;
        if let Err(e) = transaction.validate() {
            debug!(ledger = %ledger, event_id = %event_id, error = %e, "Malformed transaction");
            return None;
        }
        Some((event.timestamp, transaction.clone()))
    }
}
