//! Test utilities for ledgertrust integration tests

use ledgertrust_core::{
    AccountId, Balances, EventContent, EventId, LedgerId, ParentLinks, SummaryEvent,
    TransactionEvent, TrustConfig, TrustVerdict,
};
use ledgertrust_trust_db::TrustDatabase;
use ledgertrust_verifier::{LedgerTrustService, MemoryEventStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Account on the test server.
pub fn account(name: &str) -> AccountId {
    AccountId::new(format!("@{}:example.org", name)).unwrap()
}

/// Balances from `(name, amount)` pairs.
pub fn balances(entries: &[(&str, i64)]) -> Balances {
    entries.iter().map(|(n, v)| (account(n), *v)).collect()
}

/// Parent links from `(parent, transactions)` pairs.
pub fn parents(entries: &[(&EventId, &[&EventId])]) -> ParentLinks {
    entries
        .iter()
        .map(|(parent, txs)| ((*parent).clone(), txs.iter().map(|t| (*t).clone()).collect()))
        .collect()
}

/// Unique database path in the system temp dir.
pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("test_trust_{}.db", uuid::Uuid::new_v4()))
}

/// One shared room timeline observed by any number of nodes.
pub struct TestLedger {
    pub ledger: LedgerId,
    pub store: Arc<MemoryEventStore>,
}

impl TestLedger {
    pub fn new(local: &str) -> Self {
        Self {
            ledger: LedgerId::new("!books:example.org").unwrap(),
            store: Arc::new(MemoryEventStore::new(account(local))),
        }
    }

    fn next_timestamp(&self) -> u64 {
        self.store
            .events(&self.ledger)
            .last()
            .map_or(1_000, |event| event.timestamp + 1_000)
    }

    /// Append a single-receiver transfer.
    pub fn pay(&self, from: &str, to: &str, amount: i64) -> (EventId, TransactionEvent) {
        let tx = TransactionEvent::new(
            account(from),
            [(account(to), amount)].into_iter().collect(),
            format!("{} pays {}", from, to),
        )
        .unwrap();
        let id = self
            .store
            .append(
                &self.ledger,
                &account(from),
                self.next_timestamp(),
                EventContent::Transaction(tx.clone()),
            )
            .unwrap();
        (id, tx)
    }

    /// Append a summary authored by `sender`.
    pub fn summarize(&self, sender: &str, summary: SummaryEvent) -> EventId {
        self.store
            .append(
                &self.ledger,
                &account(sender),
                self.next_timestamp(),
                EventContent::Summary(summary),
            )
            .unwrap()
    }

    /// A node with its own trust database over this timeline.
    pub fn node(&self, db: TrustDatabase, config: &TrustConfig) -> LedgerTrustService {
        LedgerTrustService::new(self.store.clone(), Arc::new(db), config)
    }

    /// A node with an in-memory trust database and default config.
    pub fn memory_node(&self) -> LedgerTrustService {
        self.node(TrustDatabase::open_in_memory().unwrap(), &TrustConfig::default())
    }

    /// Verify an event through `node`, panicking if it is not a summary.
    pub async fn verdict(&self, node: &LedgerTrustService, event_id: &EventId) -> TrustVerdict {
        node.check_event(&self.ledger, event_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Rejection markers on an event.
    pub fn markers(&self, event_id: &EventId) -> usize {
        self.store
            .reactions_on(&self.ledger, event_id)
            .get("👎")
            .map_or(0, |actors| actors.len())
    }
}
