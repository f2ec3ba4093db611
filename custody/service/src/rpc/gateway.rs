// Copyright (c) 2024 The Botho Foundation

//! Retrying, concurrency-bounded front for the ledger and explorer.

use custody_core::{
    config::GatewayConfig, BlockHeader, BlockId, BlockTransaction, Coins, ExplorerTransaction,
    RateLimiter, RetryPolicy, SignedMessage, TransactionDetails, WorkerPool,
};
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

use super::{ExplorerApi, LedgerApi};
use crate::error::{Error, Result};

/// Every call is retried per the configured [`RetryPolicy`]. Bulk downloads
/// share one [`WorkerPool`]; explorer lookups additionally pass a strict
/// [`RateLimiter`].
pub struct RpcGateway {
    ledger: Arc<dyn LedgerApi>,
    explorer: Arc<dyn ExplorerApi>,
    retry: RetryPolicy,
    pool: WorkerPool,
    explorer_limiter: RateLimiter,
}

impl RpcGateway {
    pub fn new(
        ledger: Arc<dyn LedgerApi>,
        explorer: Arc<dyn ExplorerApi>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            ledger,
            explorer,
            retry: config.retry_policy(),
            pool: WorkerPool::new(config.block_concurrency),
            explorer_limiter: RateLimiter::per_second(config.explorer_requests_per_sec),
        }
    }

    pub async fn chain_head(&self) -> Result<u32> {
        self.retry
            .run("getMasterchainInfo", || self.ledger.masterchain_head())
            .await
    }

    pub async fn block_header(&self, id: &BlockId) -> Result<BlockHeader> {
        self.retry
            .run("getBlockHeader", || self.ledger.block_header(id))
            .await
    }

    pub async fn masterchain_header(&self, seqno: u32) -> Result<BlockHeader> {
        self.block_header(&BlockId::masterchain(seqno)).await
    }

    /// Shard blocks of `workchain` referenced by masterchain blocks
    /// `from..=to`, deduplicated, in masterchain order.
    pub async fn shards_in_range(&self, from: u32, to: u32, workchain: i32) -> Result<Vec<BlockId>> {
        if to < from {
            return Ok(Vec::new());
        }
        let per_block = self
            .pool
            .try_map(from..=to, |seqno| async move {
                self.retry
                    .run("shards", || self.ledger.shards(seqno))
                    .await
            })
            .await?;

        let mut seen = HashSet::new();
        let shards: Vec<BlockId> = per_block
            .into_iter()
            .flatten()
            .filter(|id| id.workchain == workchain)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        debug!("{} shard blocks in masterchain {}..={}", shards.len(), from, to);
        Ok(shards)
    }

    pub async fn block_headers(&self, ids: &[BlockId]) -> Result<Vec<BlockHeader>> {
        self.pool
            .try_map(ids, |id| self.block_header(id))
            .await
    }

    pub async fn block_transactions(&self, id: &BlockId) -> Result<Vec<BlockTransaction>> {
        self.retry
            .run("getBlockTransactions", || self.ledger.block_transactions(id))
            .await
    }

    /// Transactions of every block, paired with their block.
    pub async fn blocks_transactions<'a>(
        &self,
        ids: &'a [BlockId],
    ) -> Result<Vec<(&'a BlockId, Vec<BlockTransaction>)>> {
        self.pool
            .try_map(ids, |id| async move {
                let txs = self.block_transactions(id).await?;
                Ok::<_, Error>((id, txs))
            })
            .await
    }

    pub async fn transaction(
        &self,
        account: &str,
        hash: &str,
        lt: u64,
    ) -> Result<Option<TransactionDetails>> {
        self.retry
            .run("getTransactions", || self.ledger.transaction(account, hash, lt))
            .await
    }

    pub async fn balance(&self, account: &str) -> Result<Coins> {
        self.retry
            .run("getAddressBalance", || self.ledger.balance(account))
            .await
    }

    pub async fn seqno(&self, account: &str) -> Result<u32> {
        self.retry
            .run("runGetMethod", || self.ledger.seqno(account))
            .await
    }

    /// Broadcast a signed message, returning its message hash.
    pub async fn broadcast(&self, message: &SignedMessage) -> Result<String> {
        self.retry
            .run("sendBocReturnHash", || self.ledger.send_message(message))
            .await
    }

    /// Look up the transaction triggered by an inbound message. Each attempt
    /// waits for its own explorer slot.
    pub async fn lookup_by_message_hash(
        &self,
        msg_hash: &str,
    ) -> Result<Option<ExplorerTransaction>> {
        self.retry
            .run("getTransactionByInMessageHash", || {
                self.explorer_limiter
                    .run(self.explorer.transaction_by_message_hash(msg_hash))
            })
            .await
    }
}
