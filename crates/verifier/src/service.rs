//! Ledger trust service.
//!
//! Application facade over the verifier and the summary constructor. Work on
//! one ledger is serialized behind a per-ledger async mutex; different
//! ledgers proceed independently.

use crate::error::ServiceError;
use crate::event_store::EventStore;
use crate::summary::{CreatedSummary, SummaryConstructor};
use crate::verifier::{TrustVerifier, VerifierSettings};
use ledgertrust_core::{EventId, LedgerId, SummaryEvent, TransactionEvent, TrustConfig, TrustVerdict};
use ledgertrust_trust_db::TrustDatabase;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Trust service for any number of ledgers sharing one event store.
pub struct LedgerTrustService {
    store: Arc<dyn EventStore>,
    db: Arc<TrustDatabase>,
    verifier: Arc<TrustVerifier>,
    constructor: Arc<SummaryConstructor>,
    /// Per-ledger locks; entries nobody holds are pruned on the next lookup
    locks: Mutex<HashMap<LedgerId, Arc<Mutex<()>>>>,
}

impl LedgerTrustService {
    pub fn new(store: Arc<dyn EventStore>, db: Arc<TrustDatabase>, config: &TrustConfig) -> Self {
        let verifier = TrustVerifier::new(
            Arc::clone(&store),
            Arc::clone(&db),
            VerifierSettings::from(config),
        );
        let constructor = SummaryConstructor::new(
            Arc::clone(&store),
            Arc::clone(&db),
            config.transaction_scan_limit,
        );
        Self {
            store,
            db,
            verifier: Arc::new(verifier),
            constructor: Arc::new(constructor),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open the trust database at `config.database_path`.
    pub fn open(store: Arc<dyn EventStore>, config: &TrustConfig) -> Result<Self> {
        let db = TrustDatabase::open(&config.database_path)?;
        Ok(Self::new(store, Arc::new(db), config))
    }

    pub fn database(&self) -> &Arc<TrustDatabase> {
        &self.db
    }

    async fn ledger_lock(&self, ledger: &LedgerId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(ledger.clone()).or_default())
    }

    /// Verify a summary whose content is already known.
    pub async fn check_trusted(
        &self,
        ledger: &LedgerId,
        summary_id: &EventId,
        timestamp: u64,
        content: &SummaryEvent,
    ) -> Result<TrustVerdict> {
        let lock = self.ledger_lock(ledger).await;
        let _guard = lock.lock().await;
        Ok(self
            .verifier
            .check_trusted(ledger, summary_id, timestamp, content)
            .await?)
    }

    /// Fetch an event and verify it when it is a summary.
    ///
    /// `None` when the event is missing, unreadable or not a summary.
    pub async fn check_event(
        &self,
        ledger: &LedgerId,
        event_id: &EventId,
    ) -> Result<Option<TrustVerdict>> {
        let event = match self.store.get_event(ledger, event_id).await {
            Ok(event) => event,
            Err(e) => {
                warn!(ledger = %ledger, event_id = %event_id, error = %e, "Event lookup failed");
                None
            }
        };
        let Some(event) = event else {
            return Ok(None);
        };
        let Some(summary) = event.as_summary() else {
            debug!(ledger = %ledger, event_id = %event_id, "Not a summary, skipping");
            return Ok(None);
        };
        self.check_trusted(ledger, event_id, event.timestamp, summary)
            .await
            .map(Some)
    }

    /// Publish the next summary after `transaction_id`.
    ///
    /// Construction runs on its own task so a dropped caller cannot cut the
    /// publish and trust-database update apart.
    pub async fn create_summary(
        &self,
        ledger: &LedgerId,
        transaction_id: &EventId,
        transaction: &TransactionEvent,
    ) -> Result<CreatedSummary> {
        let lock = self.ledger_lock(ledger).await;
        let constructor = Arc::clone(&self.constructor);
        let ledger = ledger.clone();
        let transaction_id = transaction_id.clone();
        let transaction = transaction.clone();

        let task = tokio::spawn(async move {
            let _guard = lock.lock_owned().await;
            constructor
                .create_summary(&ledger, &transaction_id, &transaction)
                .await
        });
        Ok(task.await??)
    }

    /// Merged balances of the trusted frontier, for display.
    pub async fn current_summary(&self, ledger: &LedgerId) -> Result<Option<SummaryEvent>> {
        let lock = self.ledger_lock(ledger).await;
        let _guard = lock.lock().await;
        Ok(self.constructor.current_summary(ledger).await?)
    }

    /// Publish rejection markers left in the outbox. Returns how many were
    /// published by this call.
    pub async fn retry_pending_markers(&self, ledger: &LedgerId) -> Result<usize> {
        let lock = self.ledger_lock(ledger).await;
        let _guard = lock.lock().await;

        let pending = self.db.pending_markers(ledger)?;
        let mut published = 0;
        for marker in &pending {
            let reactions = match self.store.get_reactions(ledger, &marker.event_id).await {
                Ok(reactions) => reactions,
                Err(e) => {
                    warn!(ledger = %ledger, event_id = %marker.event_id, error = %e, "Reaction lookup failed");
                    continue;
                }
            };
            if reactions
                .get(&marker.symbol)
                .is_some_and(|actors| !actors.is_empty())
            {
                debug!(ledger = %ledger, event_id = %marker.event_id, "Marker already present");
                self.db.clear_pending_marker(ledger, &marker.event_id)?;
                continue;
            }
            if self
                .verifier
                .publish_marker(ledger, &marker.event_id, &marker.symbol)
                .await
            {
                published += 1;
            }
        }

        if !pending.is_empty() {
            info!(
                ledger = %ledger,
                pending = pending.len(),
                published,
                "Pending rejection markers retried"
            );
        }
        Ok(published)
    }
}
