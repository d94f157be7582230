//! Forged, replayed and misattributed summaries

use crate::test_utils::{account, balances, init_tracing, parents, TestLedger};
use ledgertrust_core::{EventContent, LedgerId, ParentLinks, SummaryEvent, TransactionEvent, TrustVerdict};

/// Alice pays Bob 500 and publishes the root.
fn genesis(room: &TestLedger) -> ledgertrust_core::EventId {
    room.pay("alice", "bob", 500);
    room.summarize(
        "alice",
        SummaryEvent::new(balances(&[("alice", -500), ("bob", 500)]), ParentLinks::new()),
    )
}

#[tokio::test]
async fn test_forged_summary_poisons_descendants() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let node = room.memory_node();
    let m1 = genesis(&room);
    let (t2, _) = room.pay("bob", "carol", 200);
    let forged = room.summarize(
        "mallory",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 500), ("carol", 0)]),
            parents(&[(&m1, &[&t2])]),
        ),
    );
    let (t3, _) = room.pay("bob", "dave", 100);
    // Consistent with the forged parent, but built on a lie.
    let descendant = room.summarize(
        "mallory",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 400), ("carol", 0), ("dave", 100)]),
            parents(&[(&forged, &[&t3])]),
        ),
    );

    assert_eq!(room.verdict(&node, &descendant).await, TrustVerdict::Rejected);
    assert_eq!(
        node.database().check_trust(&room.ledger, &forged).unwrap(),
        TrustVerdict::Rejected
    );
    assert_eq!(room.markers(&forged), 1);
    assert_eq!(room.markers(&descendant), 1);
    assert_eq!(
        node.database().check_trust(&room.ledger, &m1).unwrap(),
        TrustVerdict::Trusted
    );
}

#[tokio::test]
async fn test_second_root_rejected() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let node = room.memory_node();
    let m1 = genesis(&room);
    let reset = room.summarize(
        "mallory",
        SummaryEvent::new(balances(&[("mallory", 1_000_000)]), ParentLinks::new()),
    );

    assert_eq!(room.verdict(&node, &m1).await, TrustVerdict::Trusted);
    assert_eq!(room.verdict(&node, &reset).await, TrustVerdict::Rejected);
    assert_eq!(room.markers(&reset), 1);
}

#[tokio::test]
async fn test_transaction_from_other_ledger_unresolvable() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let node = room.memory_node();
    let m1 = genesis(&room);

    let elsewhere = LedgerId::new("!other:example.org").unwrap();
    let foreign = room
        .store
        .append(
            &elsewhere,
            &account("bob"),
            10_000,
            EventContent::Transaction(
                TransactionEvent::new(
                    account("bob"),
                    [(account("carol"), 200)].into_iter().collect(),
                    "",
                )
                .unwrap(),
            ),
        )
        .unwrap();
    let m2 = room.summarize(
        "bob",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 300), ("carol", 200)]),
            parents(&[(&m1, &[&foreign])]),
        ),
    );

    assert_eq!(room.verdict(&node, &m2).await, TrustVerdict::Rejected);
}

#[tokio::test]
async fn test_marker_from_other_participant_is_honoured() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let node = room.memory_node();
    let m1 = genesis(&room);
    let (t2, _) = room.pay("bob", "carol", 200);
    let m2 = room.summarize(
        "bob",
        SummaryEvent::new(
            balances(&[("alice", -500), ("bob", 300), ("carol", 200)]),
            parents(&[(&m1, &[&t2])]),
        ),
    );
    room.store
        .add_reaction(&room.ledger, &m2, "👎", &account("carol"))
        .unwrap();

    assert_eq!(room.verdict(&node, &m2).await, TrustVerdict::Rejected);
    assert_eq!(room.store.calls().publish_reaction, 0);
    assert_eq!(room.markers(&m2), 1);
}

#[tokio::test]
async fn test_verdicts_scoped_per_ledger() {
    init_tracing();
    let room = TestLedger::new("verifier");
    let node = room.memory_node();
    let m1 = genesis(&room);
    assert_eq!(room.verdict(&node, &m1).await, TrustVerdict::Trusted);

    let elsewhere = LedgerId::new("!other:example.org").unwrap();
    assert_eq!(
        node.database().check_trust(&elsewhere, &m1).unwrap(),
        TrustVerdict::Untrusted
    );
    assert_eq!(node.check_event(&elsewhere, &m1).await.unwrap(), None);
}
