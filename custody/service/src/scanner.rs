// Copyright (c) 2024 The Botho Foundation

//! Chain scanner.
//!
//! Walks the masterchain from a persisted cursor, gathers every workchain
//! shard block the new range covers and records incoming transfers to known
//! deposit addresses.
//!
//! Shard chains advance independently of the masterchain, so a shard block
//! can be committed without being the one listed by `shards(seqno)`. Such
//! blocks are recovered through the `prev_blocks` links of the listed ones.

use chrono::Utc;
use custody_core::{
    config::ScannerConfig, BlockHeader, BlockId, BlockTransaction, Deposit, DepositStatus,
    JobState, ParamName, ScanPhase,
};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use crate::{db::Database, error::Result, rpc::RpcGateway};

/// Masterchain range processed by one cycle, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub from: u32,
    pub to: u32,
}

/// Work out the next range to scan, or `None` if the gap is too small.
pub fn plan_batch(chain_head: u32, cursor: u32, config: &ScannerConfig) -> Option<ScanRange> {
    let head = chain_head.saturating_sub(config.last_block_delay);
    let gap = head.saturating_sub(cursor);
    if gap <= config.min_batch {
        return None;
    }
    Some(ScanRange {
        from: cursor + 1,
        to: cursor + 1 + gap.min(config.max_batch),
    })
}

/// Shard blocks referenced as predecessors by `headers` but absent from
/// `batch`.
///
/// Only headers ending at or after `start_lt` are followed, which bounds the
/// lookback to what this scanner run could have missed.
pub fn missed_blocks(
    headers: &[BlockHeader],
    batch: &HashSet<BlockId>,
    start_lt: u64,
    workchain: i32,
) -> Vec<BlockId> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .filter(|h| h.end_lt >= start_lt)
        .flat_map(|h| h.prev_blocks.iter())
        .filter(|id| id.workchain == workchain && !batch.contains(*id))
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

/// What one scanner tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A previous cycle was still running.
    Busy,
    /// Not enough new blocks yet.
    UpToDate,
    Scanned {
        range: ScanRange,
        blocks: usize,
        deposits: usize,
    },
}

pub struct ChainScanner {
    db: Database,
    gateway: Arc<RpcGateway>,
    config: ScannerConfig,
    currency: String,
    cursor: AtomicU32,
    start_lt: u64,
    state: JobState<ScanPhase>,
}

impl ChainScanner {
    /// Load the cursor, rewinding it to re-process a short recent window.
    ///
    /// On first start the cursor is seeded behind the chain head and
    /// persisted; afterwards the rewind only applies in memory.
    pub async fn init(
        db: Database,
        gateway: Arc<RpcGateway>,
        config: ScannerConfig,
        currency: String,
    ) -> Result<Self> {
        let cursor = match db.get_u32_param(ParamName::LastMcBlockNumber)? {
            Some(stored) => stored.saturating_sub(config.rewind_blocks),
            None => {
                let head = gateway.chain_head().await?;
                let seeded = head.saturating_sub(config.rewind_blocks);
                db.set_param(ParamName::LastMcBlockNumber, &seeded.to_string())?;
                seeded
            }
        };
        let start_lt = gateway.masterchain_header(cursor).await?.end_lt;
        info!("Scanner starting after masterchain block {} (lt {})", cursor, start_lt);

        Ok(Self {
            db,
            gateway,
            config,
            currency,
            cursor: AtomicU32::new(cursor),
            start_lt,
            state: JobState::new(),
        })
    }

    pub fn cursor(&self) -> u32 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn start_lt(&self) -> u64 {
        self.start_lt
    }

    pub fn state(&self) -> ScanPhase {
        self.state.current()
    }

    /// Run one cycle unless one is already in flight.
    ///
    /// Any failure leaves the cursor where it was, so the same range is
    /// retried next time.
    pub async fn tick(&self) -> Result<ScanOutcome> {
        let Some(_guard) = self.state.try_begin(ScanPhase::Syncing) else {
            debug!("Scanner busy, skipping cycle");
            return Ok(ScanOutcome::Busy);
        };

        self.scan().await
    }

    async fn scan(&self) -> Result<ScanOutcome> {
        let cursor = self.cursor();
        let chain_head = self.gateway.chain_head().await?;
        let Some(range) = plan_batch(chain_head, cursor, &self.config) else {
            debug!("Scanner up to date (head {}, cursor {})", chain_head, cursor);
            return Ok(ScanOutcome::UpToDate);
        };
        debug!("Scanning masterchain {}..={}", range.from, range.to);

        let blocks = self.collect_blocks(range).await?;
        let block_txs = self.gateway.blocks_transactions(&blocks).await?;

        let mut deposits = 0;
        for (block, txs) in &block_txs {
            for tx in txs {
                if self.process_transaction(block, tx).await? {
                    deposits += 1;
                }
            }
        }

        self.db
            .set_param(ParamName::LastMcBlockNumber, &range.to.to_string())?;
        self.cursor.store(range.to, Ordering::Release);

        if deposits > 0 {
            info!(
                "Scanned masterchain {}..={} ({} shard blocks): {} new deposits",
                range.from,
                range.to,
                blocks.len(),
                deposits
            );
        }
        Ok(ScanOutcome::Scanned {
            range,
            blocks: blocks.len(),
            deposits,
        })
    }

    /// Every shard block of the range, including missed predecessors, each
    /// exactly once.
    async fn collect_blocks(&self, range: ScanRange) -> Result<Vec<BlockId>> {
        let direct = self
            .gateway
            .shards_in_range(range.from, range.to, self.config.workchain)
            .await?;
        let headers = self.gateway.block_headers(&direct).await?;

        let batch: HashSet<BlockId> = direct.iter().cloned().collect();
        let missed = missed_blocks(&headers, &batch, self.start_lt, self.config.workchain);
        if !missed.is_empty() {
            debug!("Recovered {} missed shard blocks", missed.len());
        }

        let mut seen = HashSet::new();
        Ok(direct
            .into_iter()
            .chain(missed)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    /// Record `tx` if it is a new plain transfer into a deposit address.
    ///
    /// Returns `true` when a deposit row was inserted. Detail lookups that
    /// fail are logged and skipped.
    async fn process_transaction(&self, block: &BlockId, tx: &BlockTransaction) -> Result<bool> {
        if !self.db.is_known_address(&tx.account)? {
            return Ok(false);
        }
        if self.db.deposit_exists(&tx.hash)? {
            debug!("Deposit {} already recorded", tx.hash);
            return Ok(false);
        }

        let details = match self.gateway.transaction(&tx.account, &tx.hash, tx.lt).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                warn!("Transaction {} of {} not found, skipping", tx.hash, tx.account);
                return Ok(false);
            }
            Err(e) => {
                warn!("Failed to fetch transaction {}: {}", tx.hash, e);
                return Ok(false);
            }
        };

        if !details.out_msgs.is_empty() {
            debug!("Transaction {} has outbound messages, not a deposit", tx.hash);
            return Ok(false);
        }
        let Some(in_msg) = details.in_msg else {
            debug!("Transaction {} has no inbound message, not a deposit", tx.hash);
            return Ok(false);
        };

        let now = Utc::now();
        let deposit = Deposit {
            hash: tx.hash.clone(),
            from_address: tx.account.clone(),
            lt: tx.lt,
            status: DepositStatus::Pending,
            retries: 0,
            next_retry: None,
            from_user_friendly: in_msg.source,
            to_user_friendly: in_msg.destination,
            amount: in_msg.value,
            wc_block_number: block.seqno,
            shard: block.shard,
            workchain: block.workchain,
            kyt_status: None,
            created_at: now,
            last_updated_at: now,
        };

        let inserted = self.db.record_deposit(&deposit, &self.currency)?;
        if inserted {
            info!(
                "Deposit {} of {} to {} in block {}",
                deposit.hash, deposit.amount, deposit.to_user_friendly, block
            );
        }
        Ok(inserted)
    }
}
