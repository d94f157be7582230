//! Event store abstraction.
//!
//! The timeline (a Matrix room) is an external collaborator: the verifier
//! reads historical events and reactions from it and publishes reactions and
//! summaries to it. Lookups may be network-backed, so every method is async.
//!
//! [`MemoryEventStore`] is an in-process implementation with call counters
//! and failure injection, used by the replay node and by tests.

use crate::error::StoreError;
use async_trait::async_trait;
use ledgertrust_core::{AccountId, EventContent, EventId, LedgerId, TimelineEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Reactions on one event: symbol -> accounts that reacted with it.
pub type Reactions = BTreeMap<String, BTreeSet<AccountId>>;

/// Predicate used when scanning the timeline.
pub type EventPredicate<'a> = &'a (dyn Fn(&TimelineEvent) -> bool + Send + Sync);

/// Read and publish access to ledger timelines.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch one event. `Ok(None)` when the log has no such event.
    async fn get_event(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
    ) -> Result<Option<TimelineEvent>, StoreError>;

    /// Reactions attached to an event.
    async fn get_reactions(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
    ) -> Result<Reactions, StoreError>;

    /// Up to `limit` events strictly before `from`, newest first.
    async fn paginate_backward(
        &self,
        ledger: &LedgerId,
        from: &EventId,
        limit: usize,
    ) -> Result<Vec<TimelineEvent>, StoreError>;

    /// Whether any of the `limit` events before `from` matches `predicate`.
    async fn scan_backward(
        &self,
        ledger: &LedgerId,
        from: &EventId,
        predicate: EventPredicate<'_>,
        limit: usize,
    ) -> Result<bool, StoreError> {
        let events = self.paginate_backward(ledger, from, limit).await?;
        Ok(events.iter().any(|event| predicate(event)))
    }

    /// Attach a reaction from the local account.
    async fn publish_reaction(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
        symbol: &str,
    ) -> Result<(), StoreError>;

    /// Send an event from the local account and return its id.
    async fn publish_event(
        &self,
        ledger: &LedgerId,
        content: EventContent,
    ) -> Result<EventId, StoreError>;
}

/// Per-method call counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub get_event: u64,
    pub get_reactions: u64,
    pub paginate_backward: u64,
    pub scan_backward: u64,
    pub publish_reaction: u64,
    pub publish_event: u64,
}

impl CallCounts {
    /// Calls that read the log.
    pub fn reads(&self) -> u64 {
        self.get_event + self.get_reactions + self.paginate_backward + self.scan_backward
    }
}

#[derive(Default)]
struct Counters {
    get_event: AtomicU64,
    get_reactions: AtomicU64,
    paginate_backward: AtomicU64,
    scan_backward: AtomicU64,
    publish_reaction: AtomicU64,
    publish_event: AtomicU64,
}

#[derive(Default)]
struct Timeline {
    events: Vec<TimelineEvent>,
    positions: HashMap<EventId, usize>,
    reactions: HashMap<EventId, Reactions>,
}

impl Timeline {
    fn last_timestamp(&self) -> u64 {
        self.events.last().map(|e| e.timestamp).unwrap_or(0)
    }

    fn before(&self, from: &EventId, limit: usize) -> Vec<TimelineEvent> {
        match self.positions.get(from) {
            Some(position) => self.events[..*position]
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// In-memory ledger timelines.
pub struct MemoryEventStore {
    local_account: AccountId,
    ledgers: Mutex<HashMap<LedgerId, Timeline>>,
    sequence: AtomicU64,
    counters: Counters,
    fail_publish: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MemoryEventStore {
    /// Create a store whose publications are attributed to `local_account`.
    pub fn new(local_account: AccountId) -> Self {
        Self {
            local_account,
            ledgers: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
            fail_publish: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
        }
    }

    /// Account used for published events and reactions.
    pub fn local_account(&self) -> &AccountId {
        &self.local_account
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<LedgerId, Timeline>>, StoreError> {
        self.ledgers
            .lock()
            .map_err(|_| StoreError::Unavailable("timeline lock poisoned".to_string()))
    }

    fn next_event_id(
        &self,
        ledger: &LedgerId,
        sender: &AccountId,
        timestamp: u64,
        content: &EventContent,
    ) -> Result<EventId, StoreError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(ledger.as_str().as_bytes());
        hasher.update(&sequence.to_be_bytes());
        hasher.update(sender.as_str().as_bytes());
        hasher.update(&timestamp.to_be_bytes());
        hasher.update(&serde_json::to_vec(content).unwrap_or_default());
        let digest = hex::encode(&hasher.finalize().as_bytes()[..16]);
        EventId::new(format!("${}", digest)).map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Append an event authored by `sender` at `timestamp` and return its id.
    pub fn append(
        &self,
        ledger: &LedgerId,
        sender: &AccountId,
        timestamp: u64,
        content: EventContent,
    ) -> Result<EventId, StoreError> {
        let event_id = self.next_event_id(ledger, sender, timestamp, &content)?;
        self.insert(
            ledger,
            TimelineEvent {
                event_id: event_id.clone(),
                sender: sender.clone(),
                timestamp,
                content,
            },
        )?;
        Ok(event_id)
    }

    /// Insert an event with a caller-chosen id at the end of the timeline.
    pub fn insert(&self, ledger: &LedgerId, event: TimelineEvent) -> Result<(), StoreError> {
        let mut ledgers = self.lock()?;
        let timeline = ledgers.entry(ledger.clone()).or_default();
        if timeline.positions.contains_key(&event.event_id) {
            return Err(StoreError::DuplicateEvent(event.event_id));
        }
        timeline
            .positions
            .insert(event.event_id.clone(), timeline.events.len());
        timeline.events.push(event);
        Ok(())
    }

    /// Attach a reaction from an arbitrary account.
    pub fn add_reaction(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
        symbol: &str,
        actor: &AccountId,
    ) -> Result<(), StoreError> {
        let mut ledgers = self.lock()?;
        ledgers
            .entry(ledger.clone())
            .or_default()
            .reactions
            .entry(event_id.clone())
            .or_default()
            .entry(symbol.to_string())
            .or_default()
            .insert(actor.clone());
        Ok(())
    }

    /// Reactions currently stored on an event, without counting a call.
    pub fn reactions_on(&self, ledger: &LedgerId, event_id: &EventId) -> Reactions {
        self.lock()
            .ok()
            .and_then(|ledgers| {
                ledgers
                    .get(ledger)
                    .and_then(|t| t.reactions.get(event_id).cloned())
            })
            .unwrap_or_default()
    }

    /// Snapshot of a ledger's timeline in order.
    pub fn events(&self, ledger: &LedgerId) -> Vec<TimelineEvent> {
        self.lock()
            .ok()
            .and_then(|ledgers| ledgers.get(ledger).map(|t| t.events.clone()))
            .unwrap_or_default()
    }

    /// Make every publish fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every read fail until reset.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Calls made so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get_event: self.counters.get_event.load(Ordering::SeqCst),
            get_reactions: self.counters.get_reactions.load(Ordering::SeqCst),
            paginate_backward: self.counters.paginate_backward.load(Ordering::SeqCst),
            scan_backward: self.counters.scan_backward.load(Ordering::SeqCst),
            publish_reaction: self.counters.publish_reaction.load(Ordering::SeqCst),
            publish_event: self.counters.publish_event.load(Ordering::SeqCst),
        }
    }

    fn check_lookup(&self) -> Result<(), StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("lookups disabled".to_string()));
        }
        Ok(())
    }

    fn check_publish(&self) -> Result<(), StoreError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(StoreError::PublishFailed("publishing disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get_event(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
    ) -> Result<Option<TimelineEvent>, StoreError> {
        self.counters.get_event.fetch_add(1, Ordering::SeqCst);
        self.check_lookup()?;
        let ledgers = self.lock()?;
        Ok(ledgers.get(ledger).and_then(|timeline| {
            timeline
                .positions
                .get(event_id)
                .map(|position| timeline.events[*position].clone())
        }))
    }

    async fn get_reactions(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
    ) -> Result<Reactions, StoreError> {
        self.counters.get_reactions.fetch_add(1, Ordering::SeqCst);
        self.check_lookup()?;
        Ok(self.reactions_on(ledger, event_id))
    }

    async fn paginate_backward(
        &self,
        ledger: &LedgerId,
        from: &EventId,
        limit: usize,
    ) -> Result<Vec<TimelineEvent>, StoreError> {
        self.counters.paginate_backward.fetch_add(1, Ordering::SeqCst);
        self.check_lookup()?;
        let ledgers = self.lock()?;
        Ok(ledgers
            .get(ledger)
            .map(|timeline| timeline.before(from, limit))
            .unwrap_or_default())
    }

    async fn scan_backward(
        &self,
        ledger: &LedgerId,
        from: &EventId,
        predicate: EventPredicate<'_>,
        limit: usize,
    ) -> Result<bool, StoreError> {
        self.counters.scan_backward.fetch_add(1, Ordering::SeqCst);
        self.check_lookup()?;
        let ledgers = self.lock()?;
        Ok(ledgers
            .get(ledger)
            .map(|timeline| timeline.before(from, limit).iter().any(|e| predicate(e)))
            .unwrap_or(false))
    }

    async fn publish_reaction(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
        symbol: &str,
    ) -> Result<(), StoreError> {
        self.counters.publish_reaction.fetch_add(1, Ordering::SeqCst);
        self.check_publish()?;
        self.add_reaction(ledger, event_id, symbol, &self.local_account)?;
        debug!(ledger = %ledger, event_id = %event_id, symbol, "Reaction published");
        Ok(())
    }

    async fn publish_event(
        &self,
        ledger: &LedgerId,
        content: EventContent,
    ) -> Result<EventId, StoreError> {
        self.counters.publish_event.fetch_add(1, Ordering::SeqCst);
        self.check_publish()?;
        let last = {
            let ledgers = self.lock()?;
            ledgers.get(ledger).map(Timeline::last_timestamp).unwrap_or(0)
        };
        let timestamp = now_millis().max(last + 1);
        let event_id = self.append(ledger, &self.local_account, timestamp, content)?;
        debug!(ledger = %ledger, event_id = %event_id, "Event published");
        Ok(event_id)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgertrust_core::{SummaryEvent, TransactionEvent};

    fn ledger() -> LedgerId {
        LedgerId::new("!books:example.org").unwrap()
    }

    fn alice() -> AccountId {
        AccountId::new("@alice:example.org").unwrap()
    }

    fn payment() -> EventContent {
        EventContent::Transaction(
            TransactionEvent::new(
                alice(),
                [(AccountId::new("@bob:example.org").unwrap(), 10)]
                    .into_iter()
                    .collect(),
                "coffee",
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let store = MemoryEventStore::new(alice());
        let id = store.append(&ledger(), &alice(), 100, payment()).unwrap();

        let event = store.get_event(&ledger(), &id).await.unwrap().unwrap();
        assert_eq!(event.timestamp, 100);
        assert!(event.as_transaction().is_some());

        let other = LedgerId::new("!other:example.org").unwrap();
        assert!(store.get_event(&other, &id).await.unwrap().is_none());
        assert_eq!(store.calls().get_event, 2);
    }

    #[tokio::test]
    async fn test_backward_pagination_and_scan() {
        let store = MemoryEventStore::new(alice());
        let summary = EventContent::Summary(SummaryEvent::default());
        let first = store.append(&ledger(), &alice(), 1, summary).unwrap();
        let second = store.append(&ledger(), &alice(), 2, payment()).unwrap();
        let third = store.append(&ledger(), &alice(), 3, payment()).unwrap();

        let page = store.paginate_backward(&ledger(), &third, 10).await.unwrap();
        let ids: Vec<_> = page.iter().map(|e| e.event_id.clone()).collect();
        assert_eq!(ids, vec![second.clone(), first.clone()]);

        let is_summary = |e: &TimelineEvent| e.is_summary();
        assert!(store
            .scan_backward(&ledger(), &third, &is_summary, 10)
            .await
            .unwrap());
        assert!(!store
            .scan_backward(&ledger(), &third, &is_summary, 1)
            .await
            .unwrap());
        assert!(!store
            .scan_backward(&ledger(), &first, &is_summary, 10)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_publish_uses_local_account_and_monotonic_time() {
        let store = MemoryEventStore::new(alice());
        store
            .append(&ledger(), &alice(), u64::MAX / 2, payment())
            .unwrap();
        let id = store.publish_event(&ledger(), payment()).await.unwrap();

        let event = store.get_event(&ledger(), &id).await.unwrap().unwrap();
        assert_eq!(event.sender, alice());
        assert_eq!(event.timestamp, u64::MAX / 2 + 1);

        store.publish_reaction(&ledger(), &id, "👎").await.unwrap();
        assert!(store.reactions_on(&ledger(), &id)["👎"].contains(&alice()));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryEventStore::new(alice());
        store.set_fail_publish(true);
        assert!(matches!(
            store.publish_event(&ledger(), payment()).await,
            Err(StoreError::PublishFailed(_))
        ));
        assert!(store.events(&ledger()).is_empty());

        store.set_fail_lookups(true);
        let id = EventId::new("$missing").unwrap();
        assert!(store.get_event(&ledger(), &id).await.is_err());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = MemoryEventStore::new(alice());
        let event = TimelineEvent {
            event_id: EventId::new("$fixed").unwrap(),
            sender: alice(),
            timestamp: 1,
            content: payment(),
        };
        store.insert(&ledger(), event.clone()).unwrap();
        assert!(matches!(
            store.insert(&ledger(), event),
            Err(StoreError::DuplicateEvent(_))
        ));
    }
}
