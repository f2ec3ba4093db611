// Copyright (c) 2024 The Botho Foundation

//! Ledger node client over the HTTP JSON-RPC API.
//!
//! The API returns 64-bit values as strings and wraps identifiers in nested
//! objects. The `Raw*` types mirror that shape and are converted into the
//! core records before leaving this module.

use async_trait::async_trait;
use custody_core::{
    chain::num, BlockHeader, BlockId, BlockTransaction, Coins, Message, SignedMessage,
    TransactionDetails,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{JsonRpcClient, LedgerApi};
use crate::error::{Error, Result};

/// Transactions requested per `getBlockTransactions` page.
const BLOCK_TX_PAGE: u32 = 256;

#[derive(Debug, Deserialize)]
struct RawMasterchainInfo {
    last: BlockId,
}

#[derive(Debug, Deserialize)]
struct RawShards {
    shards: Vec<BlockId>,
}

#[derive(Debug, Deserialize)]
struct RawBlockTransactions {
    #[serde(default)]
    incomplete: bool,
    transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransactionId {
    #[serde(deserialize_with = "num::deserialize")]
    lt: u64,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    transaction_id: RawTransactionId,
    #[serde(default)]
    fee: String,
    in_msg: Option<RawMessage>,
    #[serde(default)]
    out_msgs: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawGetMethod {
    #[serde(default)]
    stack: Vec<(String, Value)>,
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct RawSendResult {
    hash: String,
}

fn coins(method: &str, raw: &str) -> Result<Coins> {
    if raw.is_empty() {
        return Ok(Coins::ZERO);
    }
    Coins::from_nanos_str(raw).map_err(|e| Error::rpc(method, e))
}

impl RawMessage {
    fn into_message(self, method: &str) -> Result<Message> {
        Ok(Message {
            value: coins(method, &self.value)?,
            source: self.source,
            destination: self.destination,
        })
    }
}

impl RawTransaction {
    fn into_details(self, method: &str) -> Result<TransactionDetails> {
        Ok(TransactionDetails {
            hash: self.transaction_id.hash,
            lt: self.transaction_id.lt,
            fee: coins(method, &self.fee)?,
            in_msg: self.in_msg.map(|m| m.into_message(method)).transpose()?,
            out_msgs: self
                .out_msgs
                .into_iter()
                .map(|m| m.into_message(method))
                .collect::<Result<_>>()?,
        })
    }
}

/// Parse the first stack entry of a get-method result as an integer.
fn stack_number(method: &str, stack: &[(String, Value)]) -> Result<u32> {
    let (kind, value) = stack
        .first()
        .ok_or_else(|| Error::rpc(method, "empty stack"))?;
    let text = value
        .as_str()
        .ok_or_else(|| Error::rpc(method, format!("unexpected {} entry", kind)))?;
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| Error::rpc(method, e))
}

/// Ledger node reached through its JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    rpc: JsonRpcClient,
}

impl HttpLedger {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc_url, timeout)?,
        })
    }
}

fn block_params(id: &BlockId) -> Value {
    let mut params = json!({
        "workchain": id.workchain,
        "shard": id.shard.to_string(),
        "seqno": id.seqno,
    });
    if !id.root_hash.is_empty() {
        params["root_hash"] = json!(id.root_hash);
    }
    if !id.file_hash.is_empty() {
        params["file_hash"] = json!(id.file_hash);
    }
    params
}

#[async_trait]
impl LedgerApi for HttpLedger {
    async fn masterchain_head(&self) -> Result<u32> {
        let info: RawMasterchainInfo = self.rpc.call("getMasterchainInfo", json!({})).await?;
        Ok(info.last.seqno)
    }

    async fn block_header(&self, id: &BlockId) -> Result<BlockHeader> {
        self.rpc.call("getBlockHeader", block_params(id)).await
    }

    async fn shards(&self, mc_seqno: u32) -> Result<Vec<BlockId>> {
        let shards: RawShards = self.rpc.call("shards", json!({ "seqno": mc_seqno })).await?;
        Ok(shards.shards)
    }

    async fn block_transactions(&self, id: &BlockId) -> Result<Vec<BlockTransaction>> {
        let mut all = Vec::new();
        let mut after: Option<(u64, String)> = None;
        loop {
            let mut params = block_params(id);
            params["count"] = json!(BLOCK_TX_PAGE);
            if let Some((lt, hash)) = &after {
                params["after_lt"] = json!(lt.to_string());
                params["after_hash"] = json!(hash);
            }

            let page: RawBlockTransactions =
                self.rpc.call("getBlockTransactions", params).await?;
            after = page.transactions.last().map(|t| (t.lt, t.hash.clone()));
            let done = !page.incomplete || page.transactions.is_empty();
            all.extend(page.transactions);
            if done {
                return Ok(all);
            }
        }
    }

    async fn transaction(
        &self,
        account: &str,
        hash: &str,
        lt: u64,
    ) -> Result<Option<TransactionDetails>> {
        const METHOD: &str = "getTransactions";
        let txs: Vec<RawTransaction> = self
            .rpc
            .call(
                METHOD,
                json!({
                    "address": account,
                    "limit": 1,
                    "lt": lt.to_string(),
                    "hash": hash,
                }),
            )
            .await?;

        txs.into_iter()
            .find(|tx| tx.transaction_id.hash == hash && tx.transaction_id.lt == lt)
            .map(|tx| tx.into_details(METHOD))
            .transpose()
    }

    async fn balance(&self, account: &str) -> Result<Coins> {
        const METHOD: &str = "getAddressBalance";
        let raw: Value = self.rpc.call(METHOD, json!({ "address": account })).await?;
        match raw {
            Value::String(s) => coins(METHOD, &s),
            Value::Number(n) => n
                .as_u64()
                .map(Coins::from_nanos)
                .ok_or_else(|| Error::rpc(METHOD, format!("bad balance {}", n))),
            other => Err(Error::rpc(METHOD, format!("bad balance {}", other))),
        }
    }

    async fn seqno(&self, account: &str) -> Result<u32> {
        const METHOD: &str = "runGetMethod";
        let result: RawGetMethod = self
            .rpc
            .call(
                METHOD,
                json!({ "address": account, "method": "seqno", "stack": [] }),
            )
            .await?;
        // Undeployed wallets fail the get-method.
        if result.exit_code != 0 {
            return Ok(0);
        }
        stack_number(METHOD, &result.stack)
    }

    async fn send_message(&self, message: &SignedMessage) -> Result<String> {
        let sent: RawSendResult = self
            .rpc
            .call("sendBocReturnHash", json!({ "boc": message.boc }))
            .await?;
        Ok(sent.hash)
    }
}
