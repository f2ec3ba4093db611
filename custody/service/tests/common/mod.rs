// Copyright (c) 2024 The Botho Foundation

//! In-memory chain and backends for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use custody_core::{
    Address, BlockHeader, BlockId, BlockTransaction, Coins, CustodyConfig, Deposit,
    DepositStatus, ExplorerTransaction, KytStatus, Message, SignedMessage, TransactionDetails,
};
use custody_service::{
    codec::{SendMode, WalletV3Codec},
    error::{Error, Result},
    kyt::{KytBackend, KytReport},
    notify::{DepositNotification, NotifyAck, NotifyBackend},
    rpc::{ExplorerApi, LedgerApi},
    Backends, Custody, Database,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

pub const WORKCHAIN_SHARD: i64 = i64::MIN;

/// A transfer accepted by [`FakeChain::send_message`]. Addresses are raw.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub from: String,
    pub to: String,
    pub amount: Coins,
    pub seqno: u32,
    pub mode: SendMode,
    /// Whether the message carried the wallet's state init.
    pub deploys: bool,
    pub msg_hash: String,
}

#[derive(Default)]
struct ChainState {
    head: u32,
    shards: HashMap<u32, Vec<BlockId>>,
    headers: HashMap<BlockId, BlockHeader>,
    block_txs: HashMap<BlockId, Vec<BlockTransaction>>,
    txs: HashMap<(String, String), TransactionDetails>,
    balances: HashMap<String, Coins>,
    seqnos: HashMap<String, u32>,
    sent: Vec<SentMessage>,
    indexed: HashMap<String, ExplorerTransaction>,
    /// Wallet keys learned from state inits.
    keys: HashMap<String, [u8; 32]>,
}

/// Ledger node and explorer backed by maps.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
    /// Number of ledger and explorer calls served.
    pub calls: AtomicUsize,
    /// Fail this many upcoming calls.
    pub failures: AtomicUsize,
    /// Refuse every broadcast.
    pub reject_sends: AtomicBool,
}

pub fn shard_block(seqno: u32) -> BlockId {
    BlockId {
        workchain: 0,
        shard: WORKCHAIN_SHARD,
        seqno,
        root_hash: format!("root-{}", seqno),
        file_hash: format!("file-{}", seqno),
    }
}

impl FakeChain {
    pub fn new(head: u32) -> Arc<Self> {
        let chain = Self::default();
        chain.state.lock().unwrap().head = head;
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u32) {
        self.state.lock().unwrap().head = head;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// List `block` under masterchain block `mc_seqno`.
    pub fn add_shard_block(&self, mc_seqno: u32, block: BlockId, prev_blocks: Vec<BlockId>) {
        let mut state = self.state.lock().unwrap();
        state.shards.entry(mc_seqno).or_default().push(block.clone());
        let header = BlockHeader {
            id: block.clone(),
            end_lt: block.seqno as u64 * 1000,
            prev_blocks,
        };
        state.headers.insert(block, header);
    }

    /// Make `block` resolvable by id without listing it under any
    /// masterchain block.
    pub fn add_unlisted_block(&self, block: BlockId) {
        let header = BlockHeader {
            id: block.clone(),
            end_lt: block.seqno as u64 * 1000,
            prev_blocks: Vec::new(),
        };
        self.state.lock().unwrap().headers.insert(block, header);
    }

    /// Put an incoming transfer of `amount` to `to` into `block`.
    pub fn add_deposit(&self, block: &BlockId, to: &Address, hash: &str, amount: Coins) {
        let mut state = self.state.lock().unwrap();
        let lt = block.seqno as u64 * 1000 + 1;
        state
            .block_txs
            .entry(block.clone())
            .or_default()
            .push(BlockTransaction {
                account: to.address.clone(),
                hash: hash.to_string(),
                lt,
            });
        state.txs.insert(
            (to.address.clone(), hash.to_string()),
            TransactionDetails {
                hash: hash.to_string(),
                lt,
                fee: Coins::ZERO,
                in_msg: Some(Message {
                    source: "EQsender".to_string(),
                    destination: to.user_friendly_address.clone(),
                    value: amount,
                }),
                out_msgs: Vec::new(),
            },
        );
        let balance = state.balances.entry(to.address.clone()).or_default();
        *balance = balance.checked_add(amount).unwrap();
    }

    pub fn set_balance(&self, account: &str, amount: Coins) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(account.to_string(), amount);
    }

    pub fn set_seqno(&self, account: &str, seqno: u32) {
        self.state
            .lock()
            .unwrap()
            .seqnos
            .insert(account.to_string(), seqno);
    }

    /// Make the explorer resolve `msg_hash`.
    pub fn index(&self, msg_hash: &str, tx_hash: &str, fee: Coins) {
        self.state.lock().unwrap().indexed.insert(
            msg_hash.to_string(),
            ExplorerTransaction {
                hash: tx_hash.to_string(),
                fee,
            },
        );
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    fn enter(&self, method: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::rpc(method, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerApi for FakeChain {
    async fn masterchain_head(&self) -> Result<u32> {
        self.enter("getMasterchainInfo")?;
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_header(&self, id: &BlockId) -> Result<BlockHeader> {
        self.enter("getBlockHeader")?;
        let state = self.state.lock().unwrap();
        Ok(state.headers.get(id).cloned().unwrap_or_else(|| BlockHeader {
            id: id.clone(),
            end_lt: id.seqno as u64 * 1000,
            prev_blocks: Vec::new(),
        }))
    }

    async fn shards(&self, mc_seqno: u32) -> Result<Vec<BlockId>> {
        self.enter("shards")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .shards
            .get(&mc_seqno)
            .cloned()
            .unwrap_or_default())
    }

    async fn block_transactions(&self, id: &BlockId) -> Result<Vec<BlockTransaction>> {
        self.enter("getBlockTransactions")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .block_txs
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transaction(
        &self,
        account: &str,
        hash: &str,
        _lt: u64,
    ) -> Result<Option<TransactionDetails>> {
        self.enter("getTransactions")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .txs
            .get(&(account.to_string(), hash.to_string()))
            .cloned())
    }

    async fn balance(&self, account: &str) -> Result<Coins> {
        self.enter("getAddressBalance")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(account)
            .copied()
            .unwrap_or_default())
    }

    async fn seqno(&self, account: &str) -> Result<u32> {
        self.enter("runGetMethod")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .seqnos
            .get(account)
            .copied()
            .unwrap_or_default())
    }

    /// Decodes the wallet message, checks its signature once the wallet key
    /// is known, and applies the transfer to the sender.
    async fn send_message(&self, message: &SignedMessage) -> Result<String> {
        self.enter("sendBocReturnHash")?;
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(Error::rpc("sendBocReturnHash", "status 500 cannot apply message"));
        }
        let transfer = WalletV3Codec::new()?.decode_transfer(message)?;
        let from = transfer.wallet.to_raw();

        let mut state = self.state.lock().unwrap();
        if let Some(key) = transfer.public_key {
            state.keys.insert(from.clone(), key);
        }
        if let Some(key) = state.keys.get(&from) {
            if !transfer.verify(key) {
                return Err(Error::rpc("sendBocReturnHash", "bad signature"));
            }
        }

        let msg_hash = format!("msg-{}", state.sent.len() + 1);
        let balance = state.balances.get(&from).copied().unwrap_or_default();
        let remaining = if transfer.mode.contains(SendMode::CARRY_ALL_BALANCE) {
            Coins::ZERO
        } else {
            balance.saturating_sub(transfer.amount)
        };
        state.balances.insert(from.clone(), remaining);
        *state.seqnos.entry(from.clone()).or_default() += 1;
        state.sent.push(SentMessage {
            from,
            to: transfer.destination.to_raw(),
            amount: transfer.amount,
            seqno: transfer.seqno,
            mode: transfer.mode,
            deploys: transfer.public_key.is_some(),
            msg_hash: msg_hash.clone(),
        });
        Ok(msg_hash)
    }
}

#[async_trait]
impl ExplorerApi for FakeChain {
    async fn transaction_by_message_hash(
        &self,
        msg_hash: &str,
    ) -> Result<Option<ExplorerTransaction>> {
        self.enter("getTransactionByInMessageHash")?;
        Ok(self.state.lock().unwrap().indexed.get(msg_hash).cloned())
    }
}

/// Screening backend answering from a per-hash table, `ok` by default.
#[derive(Default)]
pub struct FakeKyt {
    reports: Mutex<HashMap<String, KytReport>>,
    pub checks: AtomicUsize,
    pub failing: AtomicBool,
}

impl FakeKyt {
    pub fn set(&self, hash: &str, report: KytReport) {
        self.reports
            .lock()
            .unwrap()
            .insert(hash.to_string(), report);
    }
}

#[async_trait]
impl KytBackend for FakeKyt {
    async fn check(&self, _to: &str, hash: &str) -> Result<KytReport> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::rpc("kyt", "status 502 Bad Gateway"));
        }
        Ok(self
            .reports
            .lock()
            .unwrap()
            .get(hash)
            .copied()
            .unwrap_or(KytReport::Ok))
    }
}

/// Notification backend recording what it receives.
#[derive(Default)]
pub struct FakeNotifier {
    pub failing: AtomicBool,
    pub kyt_enabled: AtomicBool,
    /// Time each delivery takes, in milliseconds.
    pub delay_ms: AtomicU64,
    pub received: Mutex<Vec<DepositNotification>>,
    pub completed: AtomicUsize,
}

#[async_trait]
impl NotifyBackend for FakeNotifier {
    async fn notify(&self, notification: &DepositNotification) -> Result<NotifyAck> {
        self.received.lock().unwrap().push(notification.clone());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::rpc("notify", "status 503 Service Unavailable"));
        }
        Ok(NotifyAck {
            kyt_enabled: self.kyt_enabled.load(Ordering::SeqCst),
        })
    }
}

/// A deposit row received by `address`.
pub fn deposit(
    address: &Address,
    hash: &str,
    amount: Coins,
    status: DepositStatus,
    kyt: Option<KytStatus>,
) -> Deposit {
    let now = Utc::now();
    Deposit {
        hash: hash.to_string(),
        from_address: address.address.clone(),
        lt: 1,
        status,
        retries: 0,
        next_retry: None,
        from_user_friendly: "EQsender".to_string(),
        to_user_friendly: address.user_friendly_address.clone(),
        amount,
        wc_block_number: 1,
        shard: WORKCHAIN_SHARD,
        workchain: 0,
        kyt_status: kyt,
        created_at: now,
        last_updated_at: now,
    }
}

/// Configuration with fast retries and no withdrawal settling delay.
pub fn test_config() -> CustodyConfig {
    let mut config = CustodyConfig::default();
    config.gateway.retry_delay_ms = 1;
    config.gateway.explorer_requests_per_sec = 1000;
    config.wallet.withdrawal_settle_secs = 0;
    config.wallet.withdrawal_lookup_attempts = 2;
    config.wallet.withdrawal_lookup_interval_secs = 0;
    config
}

pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub kyt: Arc<FakeKyt>,
    pub notifier: Arc<FakeNotifier>,
    pub custody: Custody,
}

impl Harness {
    pub fn new(config: &CustodyConfig, chain: Arc<FakeChain>) -> Self {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Self::with_db(config, chain, db)
    }

    pub fn with_db(config: &CustodyConfig, chain: Arc<FakeChain>, db: Database) -> Self {
        let kyt = Arc::new(FakeKyt::default());
        let notifier = Arc::new(FakeNotifier::default());
        let backends = Backends {
            ledger: chain.clone(),
            explorer: chain.clone(),
            kyt: kyt.clone(),
            notify: notifier.clone(),
            codec: Arc::new(WalletV3Codec::new().unwrap()),
        };
        let custody = Custody::assemble(config, db, backends).unwrap();
        Self {
            chain,
            kyt,
            notifier,
            custody,
        }
    }

    pub fn db(&self) -> &Database {
        &self.custody.db
    }

    pub async fn new_address(&self) -> Address {
        self.custody.wallet.allocator().allocate().await.unwrap()
    }
}
