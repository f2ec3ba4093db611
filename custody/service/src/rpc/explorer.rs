// Copyright (c) 2024 The Botho Foundation

//! Block explorer index client.

use async_trait::async_trait;
use custody_core::{Coins, ExplorerTransaction};
use serde::Deserialize;
use std::time::Duration;

use super::ExplorerApi;
use crate::error::{Error, Result};

const LOOKUP_PATH: &str = "/api/index/getTransactionByInMessageHash";

#[derive(Debug, Deserialize)]
struct RawExplorerTransaction {
    hash: String,
    #[serde(default)]
    fee: Option<serde_json::Value>,
}

impl RawExplorerTransaction {
    fn into_transaction(self) -> Result<ExplorerTransaction> {
        let fee = match self.fee {
            None | Some(serde_json::Value::Null) => Coins::ZERO,
            Some(serde_json::Value::String(s)) => {
                Coins::from_nanos_str(&s).map_err(|e| Error::rpc("explorer", e))?
            }
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .map(Coins::from_nanos)
                .ok_or_else(|| Error::rpc("explorer", format!("bad fee {}", n)))?,
            Some(other) => return Err(Error::rpc("explorer", format!("bad fee {}", other))),
        };
        Ok(ExplorerTransaction {
            hash: self.hash,
            fee,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpExplorer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExplorer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExplorerApi for HttpExplorer {
    async fn transaction_by_message_hash(
        &self,
        msg_hash: &str,
    ) -> Result<Option<ExplorerTransaction>> {
        let url = format!("{}{}", self.base_url, LOOKUP_PATH);
        let found: Vec<RawExplorerTransaction> = self
            .client
            .get(&url)
            .query(&[("msg_hash", msg_hash), ("include_msg_body", "true")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        found
            .into_iter()
            .next()
            .map(RawExplorerTransaction::into_transaction)
            .transpose()
    }
}
