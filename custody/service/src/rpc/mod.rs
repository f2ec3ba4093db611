// Copyright (c) 2024 The Botho Foundation

//! Ledger node and explorer access.
//!
//! [`LedgerApi`] and [`ExplorerApi`] are the raw backends. Everything else in
//! the service goes through [`RpcGateway`], which adds retries, bounded
//! fan-out and explorer rate limiting on top of them.

use async_trait::async_trait;
use custody_core::{
    BlockHeader, BlockId, BlockTransaction, Coins, ExplorerTransaction, SignedMessage,
    TransactionDetails,
};

use crate::error::Result;

pub mod explorer;
pub mod gateway;
pub mod jsonrpc;
pub mod ledger;

pub use explorer::HttpExplorer;
pub use gateway::RpcGateway;
pub use jsonrpc::JsonRpcClient;
pub use ledger::HttpLedger;

/// Ledger node operations.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Seqno of the latest masterchain block.
    async fn masterchain_head(&self) -> Result<u32>;

    async fn block_header(&self, id: &BlockId) -> Result<BlockHeader>;

    /// Shard blocks referenced by masterchain block `mc_seqno`.
    async fn shards(&self, mc_seqno: u32) -> Result<Vec<BlockId>>;

    async fn block_transactions(&self, id: &BlockId) -> Result<Vec<BlockTransaction>>;

    /// The transaction of `account` identified by `(hash, lt)`, if the node
    /// knows it.
    async fn transaction(
        &self,
        account: &str,
        hash: &str,
        lt: u64,
    ) -> Result<Option<TransactionDetails>>;

    async fn balance(&self, account: &str) -> Result<Coins>;

    /// Current wallet sequence number; 0 for an undeployed wallet.
    async fn seqno(&self, account: &str) -> Result<u32>;

    /// Broadcast an external message, returning its message hash.
    async fn send_message(&self, message: &SignedMessage) -> Result<String>;
}

/// Block explorer operations.
#[async_trait]
pub trait ExplorerApi: Send + Sync {
    async fn transaction_by_message_hash(
        &self,
        msg_hash: &str,
    ) -> Result<Option<ExplorerTransaction>>;
}
