//! Trust state across database reopen

use crate::test_utils::{balances, init_tracing, parents, temp_db_path, TestLedger};
use ledgertrust_core::{ParentLinks, SummaryEvent, TrustConfig, TrustVerdict};
use ledgertrust_trust_db::TrustDatabase;

#[tokio::test]
async fn test_verdicts_survive_reopen() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let db_path = temp_db_path();
    room.pay("alice", "bob", 500);
    let m1 = room.summarize(
        "alice",
        SummaryEvent::new(balances(&[("alice", -500), ("bob", 500)]), ParentLinks::new()),
    );
    let forged = room.summarize(
        "mallory",
        SummaryEvent::new(balances(&[("mallory", 1_000)]), parents(&[(&m1, &[])])),
    );

    {
        let node = room.node(TrustDatabase::open(&db_path).unwrap(), &TrustConfig::default());
        assert_eq!(room.verdict(&node, &m1).await, TrustVerdict::Trusted);
        assert_eq!(room.verdict(&node, &forged).await, TrustVerdict::Rejected);
    }

    let reopened = TrustDatabase::open(&db_path).unwrap();
    assert_eq!(reopened.check_trust(&room.ledger, &m1).unwrap(), TrustVerdict::Trusted);
    assert_eq!(reopened.check_trust(&room.ledger, &forged).unwrap(), TrustVerdict::Rejected);

    // Memoized verdicts need no reaction or history lookups.
    let node = room.node(reopened, &TrustConfig::default());
    let before = room.store.calls();
    assert_eq!(room.verdict(&node, &m1).await, TrustVerdict::Trusted);
    assert_eq!(room.verdict(&node, &forged).await, TrustVerdict::Rejected);
    let after = room.store.calls();
    assert_eq!(after.get_reactions, before.get_reactions);
    assert_eq!(after.scan_backward, before.scan_backward);
    assert_eq!(room.markers(&forged), 1);

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_queued_markers_survive_reopen() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let db_path = temp_db_path();
    room.pay("alice", "bob", 500);
    let m1 = room.summarize(
        "alice",
        SummaryEvent::new(balances(&[("alice", -500), ("bob", 500)]), ParentLinks::new()),
    );
    let forged = room.summarize(
        "mallory",
        SummaryEvent::new(balances(&[("mallory", 1_000)]), parents(&[(&m1, &[])])),
    );

    room.store.set_fail_publish(true);
    {
        let node = room.node(TrustDatabase::open(&db_path).unwrap(), &TrustConfig::default());
        assert_eq!(room.verdict(&node, &forged).await, TrustVerdict::Rejected);
    }
    assert_eq!(room.markers(&forged), 0);
    room.store.set_fail_publish(false);

    let node = room.node(TrustDatabase::open(&db_path).unwrap(), &TrustConfig::default());
    assert_eq!(node.database().pending_markers(&room.ledger).unwrap().len(), 1);
    assert_eq!(node.retry_pending_markers(&room.ledger).await.unwrap(), 1);
    assert_eq!(room.markers(&forged), 1);
    assert!(node.database().pending_markers(&room.ledger).unwrap().is_empty());

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_frontier_survives_reopen() {
    init_tracing();
    let room = TestLedger::new("alice");
    let db_path = temp_db_path();
    let (t1, tx1) = room.pay("alice", "bob", 500);
    let (t2, tx2) = room.pay("bob", "carol", 200);

    let before = {
        let node = room.node(TrustDatabase::open(&db_path).unwrap(), &TrustConfig::default());
        node.create_summary(&room.ledger, &t1, &tx1).await.unwrap();
        node.current_summary(&room.ledger).await.unwrap().unwrap()
    };

    let node = room.node(TrustDatabase::open(&db_path).unwrap(), &TrustConfig::default());
    assert_eq!(node.current_summary(&room.ledger).await.unwrap().unwrap(), before);

    // Continuing after the restart builds on the persisted root.
    let next = node.create_summary(&room.ledger, &t2, &tx2).await.unwrap();
    assert!(!next.is_root);
    assert_eq!(
        next.summary.balances,
        balances(&[("alice", -500), ("bob", 300), ("carol", 200)])
    );

    let _ = std::fs::remove_file(&db_path);
}
