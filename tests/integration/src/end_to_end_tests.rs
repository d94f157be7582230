//! End-to-end trust scenarios over a shared timeline

use crate::test_utils::{account, balances, init_tracing, parents, TestLedger};
use ledgertrust_core::{ParentLinks, SummaryEvent, TrustConfig, TrustVerdict};
use ledgertrust_trust_db::TrustDatabase;
use ledgertrust_verifier::{ServiceError, SummaryError};
use std::collections::BTreeSet;

#[tokio::test]
async fn test_end_to_end_scenario() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let node = room.memory_node();

    // Step 1: Alice pays Bob and publishes the first root
    tracing::info!("Step 1: root summary over T1");
    room.pay("alice", "bob", 500);
    let m1 = room.summarize(
        "alice",
        SummaryEvent::new(balances(&[("alice", -500), ("bob", 500)]), ParentLinks::new()),
    );
    assert_eq!(room.verdict(&node, &m1).await, TrustVerdict::Trusted);

    // Step 2: Bob pays Carol, summarized on top of M1
    tracing::info!("Step 2: M2 extends M1 with T2");
    let (t2, _) = room.pay("bob", "carol", 200);
    let m2 = room.summarize(
        "bob",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 300), ("carol", 200)]),
            parents(&[(&m1, &[&t2])]),
        ),
    );
    assert_eq!(room.verdict(&node, &m2).await, TrustVerdict::Trusted);

    // Step 3: a forged M2' claims T2 never moved any money
    tracing::info!("Step 3: forged M2 with stale balances");
    let forged = room.summarize(
        "mallory",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 500), ("carol", 0)]),
            parents(&[(&m1, &[&t2])]),
        ),
    );
    assert_eq!(room.verdict(&node, &forged).await, TrustVerdict::Rejected);
    assert_eq!(room.markers(&forged), 1);
    assert_eq!(room.markers(&m2), 0);
    assert_eq!(room.markers(&m1), 0);
    assert!(node.database().pending_markers(&room.ledger).unwrap().is_empty());
}

#[tokio::test]
async fn test_constructed_summaries_verify_on_second_node() {
    init_tracing();
    let room = TestLedger::new("alice");
    let author = room.memory_node();

    let mut created = Vec::new();
    for (from, to, amount) in [("alice", "bob", 500), ("bob", "carol", 200), ("carol", "alice", 50)] {
        let (id, tx) = room.pay(from, to, amount);
        created.push(author.create_summary(&room.ledger, &id, &tx).await.unwrap());
    }
    assert!(created[0].is_root);
    assert_eq!(
        created[2].summary.balances,
        balances(&[("alice", -450), ("bob", 300), ("carol", 150)])
    );

    let observer = room.memory_node();
    let published_reactions = room.store.calls().publish_reaction;
    for summary in &created {
        assert_eq!(room.verdict(&observer, &summary.event_id).await, TrustVerdict::Trusted);
    }
    assert_eq!(room.store.calls().publish_reaction, published_reactions);
}

#[tokio::test]
async fn test_verified_summary_not_promoted_by_default() {
    init_tracing();
    let room = TestLedger::new("alice");
    let node = room.memory_node();
    let (t1, tx1) = room.pay("alice", "bob", 500);
    let root = node.create_summary(&room.ledger, &t1, &tx1).await.unwrap().event_id;

    let (t2, _) = room.pay("bob", "carol", 200);
    let remote = room.summarize(
        "bob",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 300), ("carol", 200)]),
            parents(&[(&root, &[&t2])]),
        ),
    );
    assert_eq!(room.verdict(&node, &remote).await, TrustVerdict::Trusted);
    assert_eq!(
        node.database().get_heads(&room.ledger).unwrap(),
        BTreeSet::from([root.clone()])
    );

    // The next local summary still builds on the local root and picks up T2.
    let (t3, tx3) = room.pay("carol", "alice", 20);
    let next = node.create_summary(&room.ledger, &t3, &tx3).await.unwrap();
    assert_eq!(next.summary.parents, parents(&[(&root, &[&t2, &t3])]));
}

#[tokio::test]
async fn test_promoted_summary_becomes_base_of_next() {
    init_tracing();
    let room = TestLedger::new("alice");
    let config = TrustConfig {
        promote_verified_summaries: true,
        ..TrustConfig::default()
    };
    let node = room.node(TrustDatabase::open_in_memory().unwrap(), &config);
    let (t1, tx1) = room.pay("alice", "bob", 500);
    let root = node.create_summary(&room.ledger, &t1, &tx1).await.unwrap().event_id;

    let (t2, _) = room.pay("bob", "carol", 200);
    let remote = room.summarize(
        "bob",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 300), ("carol", 200)]),
            parents(&[(&root, &[&t2])]),
        ),
    );
    assert_eq!(room.verdict(&node, &remote).await, TrustVerdict::Trusted);
    assert_eq!(
        node.database().get_heads(&room.ledger).unwrap(),
        BTreeSet::from([remote.clone()])
    );

    let (t3, tx3) = room.pay("carol", "alice", 20);
    let next = node.create_summary(&room.ledger, &t3, &tx3).await.unwrap();
    assert_eq!(next.summary.parents, parents(&[(&remote, &[&t3])]));
    assert_eq!(next.summary.balances.get(&account("alice")), Some(&-480));
}

#[tokio::test]
async fn test_late_joiner_does_not_publish_second_root() {
    init_tracing();
    let room = TestLedger::new("alice");
    room.pay("alice", "bob", 500);
    let remote_root = room.summarize(
        "bob",
        SummaryEvent::new(balances(&[("alice", -500), ("bob", 500)]), ParentLinks::new()),
    );
    let (t2, tx2) = room.pay("bob", "carol", 200);

    // Step 1: Without promotion the verified root never becomes a local head
    let node = room.memory_node();
    assert_eq!(room.verdict(&node, &remote_root).await, TrustVerdict::Trusted);
    let published = room.store.calls().publish_event;
    let err = node.create_summary(&room.ledger, &t2, &tx2).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Summary(SummaryError::HistoryNotAnchored(ref id)) if *id == remote_root
    ));
    assert_eq!(room.store.calls().publish_event, published);

    // Step 2: A promoting node builds on the remote root instead
    let config = TrustConfig {
        promote_verified_summaries: true,
        ..TrustConfig::default()
    };
    let promoting = room.node(TrustDatabase::open_in_memory().unwrap(), &config);
    assert_eq!(room.verdict(&promoting, &remote_root).await, TrustVerdict::Trusted);
    let next = promoting.create_summary(&room.ledger, &t2, &tx2).await.unwrap();
    assert!(!next.is_root);
    assert_eq!(next.summary.parents, parents(&[(&remote_root, &[&t2])]));

    let observer = room.memory_node();
    assert_eq!(room.verdict(&observer, &next.event_id).await, TrustVerdict::Trusted);
}
