// Copyright (c) 2024 The Botho Foundation

mod common;

use common::{deposit, test_config, FakeChain, Harness};
use custody_core::{Address, Coins, DepositStatus, KytStatus, TransferType};
use custody_service::{
    codec::SendMode,
    kyt::KytReport,
    sweep::{RefreshOutcome, SweepOutcome, SweepReport},
};
use std::sync::atomic::Ordering;

const TON: u64 = 1_000_000_000;

/// Record a deposit, credit it on chain and refresh the balance.
async fn fund(h: &Harness, address: &Address, hash: &str, nanos: u64, kyt: Option<KytStatus>) {
    h.db()
        .record_deposit(
            &deposit(
                address,
                hash,
                Coins::from_nanos(nanos),
                DepositStatus::NotifOk,
                kyt,
            ),
            "TON",
        )
        .unwrap();
    let current = h
        .custody
        .gateway
        .balance(&address.address)
        .await
        .unwrap();
    h.chain.set_balance(
        &address.address,
        current.checked_add(Coins::from_nanos(nanos)).unwrap(),
    );
}

async fn refresh(h: &Harness) -> RefreshOutcome {
    h.custody.sweep.refresh_balances().await.unwrap()
}

async fn sweep(h: &Harness) -> SweepReport {
    match h.custody.sweep.sweep().await.unwrap() {
        SweepOutcome::Done(report) => report,
        SweepOutcome::Busy => panic!("sweep reported busy"),
    }
}

#[tokio::test]
async fn test_dust_is_never_swept() {
    let config = test_config();
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "dust", 5_000_000, None).await;

    assert_eq!(
        refresh(&h).await,
        RefreshOutcome::Refreshed {
            updated: 1,
            failed: 0
        }
    );
    let report = sweep(&h).await;
    assert_eq!(report.swept, 0);
    assert!(h.chain.sent().is_empty());

    let balance = h.db().get_balance(&address.address, "TON").unwrap().unwrap();
    assert_eq!(balance.amount, Coins::from_nanos(5_000_000));
    assert!(!balance.need_update);
}

#[tokio::test]
async fn test_sweeps_to_master_and_marks_dirty() {
    let config = test_config();
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-1", 2 * TON, None).await;

    // Stale balances are not swept.
    assert_eq!(sweep(&h).await.swept, 0);

    refresh(&h).await;
    let report = sweep(&h).await;
    assert_eq!(report.swept, 1);

    let sent = h.chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, address.address);
    assert_eq!(
        sent[0].to,
        h.custody.wallet.master_address().raw
    );
    assert!(sent[0].mode.contains(SendMode::CARRY_ALL_BALANCE));
    assert!(!sent[0].mode.contains(SendMode::DESTROY_IF_ZERO));

    let transfers = h.db().transfers_from(&address.address).unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].transfer_type, TransferType::Internal);
    assert_eq!(transfers[0].amount, None);

    let balance = h.db().get_balance(&address.address, "TON").unwrap().unwrap();
    assert!(balance.need_update);

    refresh(&h).await;
    assert_eq!(sweep(&h).await.swept, 0);
    assert_eq!(h.chain.sent().len(), 1);
}

#[tokio::test]
async fn test_legacy_address_is_drained_from_seqno_zero() {
    let mut config = test_config();
    config.wallet.address_version = 1;
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    h.chain.set_seqno(&address.address, 7);
    fund(&h, &address, "tx-1", TON, None).await;

    refresh(&h).await;
    assert_eq!(sweep(&h).await.swept, 1);

    let sent = h.chain.sent();
    assert_eq!(sent[0].seqno, 0);
    assert!(sent[0].deploys);
    assert!(sent[0].mode.contains(SendMode::CARRY_ALL_BALANCE));
    assert!(sent[0].mode.contains(SendMode::DESTROY_IF_ZERO));
}

#[tokio::test]
async fn test_legacy_address_skips_screening() {
    let mut config = test_config();
    config.wallet.address_version = 1;
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-1", TON, Some(KytStatus::Pending)).await;
    h.kyt.set("tx-1", KytReport::Pending);

    refresh(&h).await;
    let report = sweep(&h).await;
    assert_eq!(report.swept, 1);
    assert_eq!(report.blocked, 0);
    assert_eq!(h.kyt.checks.load(Ordering::SeqCst), 0);
    assert_eq!(h.chain.sent()[0].to, h.custody.wallet.master_address().raw);
}

#[tokio::test]
async fn test_pending_screening_blocks_sweep() {
    let config = test_config();
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-1", TON, Some(KytStatus::Pending)).await;
    h.kyt.set("tx-1", KytReport::Pending);

    refresh(&h).await;
    let report = sweep(&h).await;
    assert_eq!(report.blocked, 1);
    assert_eq!(report.swept, 0);
    assert!(h.chain.sent().is_empty());

    // Cleared on a later pass.
    h.kyt.set("tx-1", KytReport::Ok);
    let report = sweep(&h).await;
    assert_eq!(report.swept, 1);
    let stored = h.db().get_deposit("tx-1", &address.address).unwrap().unwrap();
    assert_eq!(stored.kyt_status, Some(KytStatus::Ok));
}

#[tokio::test]
async fn test_alerted_funds_go_to_quarantine() {
    let config = test_config();
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-bad", TON, Some(KytStatus::Pending)).await;
    fund(&h, &address, "tx-good", 2 * TON, Some(KytStatus::Pending)).await;
    h.kyt.set("tx-bad", KytReport::Alerts);

    refresh(&h).await;
    let report = sweep(&h).await;
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.swept, 0);

    let sent = h.chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].to,
        h.custody.wallet.quarantine_address().raw
    );
    assert_eq!(sent[0].amount, Coins::from_nanos(TON));
    assert!(sent[0].mode.contains(SendMode::PAY_FEES_SEPARATELY));

    let bad = h.db().get_deposit("tx-bad", &address.address).unwrap().unwrap();
    assert_eq!(bad.kyt_status, Some(KytStatus::TransferredToQuarantine));
    let good = h.db().get_deposit("tx-good", &address.address).unwrap().unwrap();
    assert_eq!(good.kyt_status, Some(KytStatus::Ok));

    let quarantine = h.db().transfers_from(&address.address).unwrap();
    assert_eq!(quarantine[0].amount, Some(Coins::from_nanos(TON)));

    // The remainder is swept once the balance is re-read.
    refresh(&h).await;
    let balance = h.db().get_balance(&address.address, "TON").unwrap().unwrap();
    assert_eq!(balance.amount, Coins::from_nanos(2 * TON));
    let report = sweep(&h).await;
    assert_eq!(report.swept, 1);
    assert_eq!(
        h.chain.sent()[1].to,
        h.custody.wallet.master_address().raw
    );
}

#[tokio::test]
async fn test_refresh_failure_keeps_balance_dirty() {
    let config = test_config();
    let h = Harness::new(&config, FakeChain::new(100));
    let address = h.new_address().await;
    fund(&h, &address, "tx-1", TON, None).await;

    h.chain.fail_next(3);
    assert_eq!(
        refresh(&h).await,
        RefreshOutcome::Refreshed {
            updated: 0,
            failed: 1
        }
    );
    let balance = h.db().get_balance(&address.address, "TON").unwrap().unwrap();
    assert!(balance.need_update);
}
