// Copyright (c) 2024 The Botho Foundation

mod common;

use common::{deposit, test_config, FakeChain, Harness};
use custody_core::{Address, Coins, DepositStatus, KytStatus};
use custody_service::{kyt::KytReport, Database};
use std::sync::atomic::Ordering;

const TON: u64 = 1_000_000_000;

/// Record a screened deposit to `address` and credit it on chain.
fn fund(h: &Harness, address: &Address, hash: &str, kyt: KytStatus) {
    h.db()
        .record_deposit(
            &deposit(
                address,
                hash,
                Coins::from_nanos(TON),
                DepositStatus::NotifOk,
                Some(kyt),
            ),
            "TON",
        )
        .unwrap();
    h.chain.set_balance(&address.address, Coins::from_nanos(TON));
}

fn kyt_status(h: &Harness, address: &Address, hash: &str) -> Option<KytStatus> {
    h.db()
        .get_deposit(hash, &address.address)
        .unwrap()
        .unwrap()
        .kyt_status
}

#[tokio::test]
async fn test_backend_error_blocks_without_changes() {
    let config = test_config();
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-1", KytStatus::Pending);
    h.kyt.failing.store(true, Ordering::SeqCst);

    let verdict = h.custody.kyt.evaluate(&address).await.unwrap();
    assert!(!verdict.can_sweep);
    assert_eq!(verdict.quarantine_hash, None);
    assert_eq!(h.kyt.checks.load(Ordering::SeqCst), 1);
    assert_eq!(kyt_status(&h, &address, "tx-1"), Some(KytStatus::Pending));
    assert!(h.chain.sent().is_empty());

    h.kyt.failing.store(false, Ordering::SeqCst);
    let verdict = h.custody.kyt.evaluate(&address).await.unwrap();
    assert!(verdict.can_sweep);
    assert_eq!(kyt_status(&h, &address, "tx-1"), Some(KytStatus::Ok));
}

#[tokio::test]
async fn test_failed_quarantine_keeps_alert() {
    let config = test_config();
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-bad", KytStatus::HasAlert);
    h.chain.reject_sends.store(true, Ordering::SeqCst);

    let verdict = h.custody.kyt.evaluate(&address).await.unwrap();
    assert!(!verdict.can_sweep);
    assert_eq!(verdict.quarantine_hash, None);
    assert_eq!(kyt_status(&h, &address, "tx-bad"), Some(KytStatus::HasAlert));
    assert!(h.db().transfers_from(&address.address).unwrap().is_empty());
    assert!(h.chain.sent().is_empty());

    // Retried on the next evaluation.
    h.chain.reject_sends.store(false, Ordering::SeqCst);
    let verdict = h.custody.kyt.evaluate(&address).await.unwrap();
    assert!(verdict.can_sweep);
    assert_eq!(verdict.quarantine_hash.as_deref(), Some("msg-1"));
    assert_eq!(
        kyt_status(&h, &address, "tx-bad"),
        Some(KytStatus::TransferredToQuarantine)
    );
    assert_eq!(h.db().transfers_from(&address.address).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unrecorded_quarantine_blocks_address() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custody.sqlite");
    let db = Database::open(&path).unwrap();
    db.migrate().unwrap();

    let config = test_config();
    let h = Harness::with_db(&config, FakeChain::new(100), db);
    let address = h.new_address().await;
    fund(&h, &address, "tx-bad", KytStatus::HasAlert);

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER block_transfers BEFORE INSERT ON transfer
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )
    .unwrap();

    let verdict = h.custody.kyt.evaluate(&address).await.unwrap();
    assert!(!verdict.can_sweep);
    assert_eq!(verdict.quarantine_hash, None);

    // The funds left, the bookkeeping did not follow.
    let sent = h.chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, h.custody.wallet.quarantine_address().raw);
    assert_eq!(kyt_status(&h, &address, "tx-bad"), Some(KytStatus::HasAlert));
    assert!(h.db().transfers_from(&address.address).unwrap().is_empty());
}

#[tokio::test]
async fn test_legacy_address_is_not_screened() {
    let mut config = test_config();
    config.wallet.address_version = 1;
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-1", KytStatus::Pending);
    h.kyt.set("tx-1", KytReport::Pending);

    assert!(!h.custody.kyt.screens(&address));
    let verdict = h.custody.kyt.evaluate(&address).await.unwrap();
    assert!(verdict.can_sweep);
    assert_eq!(h.kyt.checks.load(Ordering::SeqCst), 0);
    assert_eq!(kyt_status(&h, &address, "tx-1"), Some(KytStatus::Pending));
}
