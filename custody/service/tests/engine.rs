// Copyright (c) 2024 The Botho Foundation

mod common;

use common::{deposit, shard_block, test_config, FakeChain, Harness};
use custody_core::{Coins, DepositStatus, ParamName};
use custody_service::CustodyEngine;
use std::{sync::atomic::Ordering, time::Duration};

#[tokio::test(start_paused = true)]
async fn test_deposit_flows_from_block_to_master_wallet() {
    let mut config = test_config();
    config.scanner.poll_interval_secs = 1;
    config.confirm.poll_interval_secs = 1;
    config.notify.poll_interval_secs = 1;
    config.sweep.balance_refresh_interval_secs = 1;
    config.sweep.sweep_interval_secs = 1;

    let chain = FakeChain::new(1000);
    let h = Harness::new(&config, chain.clone());
    let address = h.new_address().await;
    h.db()
        .set_param(ParamName::LastMcBlockNumber, "910")
        .unwrap();

    let block = shard_block(5000);
    chain.add_shard_block(950, block.clone(), vec![]);
    chain.add_deposit(&block, &address, "tx-1", Coins::from_nanos(2_000_000_000));

    let common::Harness {
        custody, notifier, ..
    } = h;
    let db = custody.db.clone();
    let master = custody.wallet.master_address().raw.clone();

    CustodyEngine::new(config, custody)
        .run_until(tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap();

    let deposit = db.get_deposit("tx-1", &address.address).unwrap().unwrap();
    assert_eq!(deposit.status, DepositStatus::NotifOk);
    assert_eq!(notifier.received.lock().unwrap().len(), 1);

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, master);
    assert_eq!(
        db.get_u32_param(ParamName::LastMcBlockNumber).unwrap(),
        Some(981)
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_running_cycle() {
    let mut config = test_config();
    config.scanner.poll_interval_secs = 3600;
    config.confirm.poll_interval_secs = 3600;
    config.notify.poll_interval_secs = 1;
    config.sweep.balance_refresh_interval_secs = 3600;
    config.sweep.sweep_interval_secs = 3600;

    let h = Harness::new(&config, FakeChain::new(1000));
    let address = h.new_address().await;
    let deposit = deposit(
        &address,
        "tx-1",
        Coins::from_nanos(1_000_000_000),
        DepositStatus::Confirmed,
        None,
    );
    h.db().record_deposit(&deposit, "TON").unwrap();
    h.notifier.delay_ms.store(500, Ordering::SeqCst);

    let common::Harness {
        custody, notifier, ..
    } = h;
    let db = custody.db.clone();

    // Shutdown arrives while the delivery is still in flight.
    CustodyEngine::new(config, custody)
        .run_until(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();

    assert_eq!(notifier.completed.load(Ordering::SeqCst), 1);
    let stored = db.get_deposit("tx-1", &address.address).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::NotifOk);
}
