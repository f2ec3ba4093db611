// Copyright (c) 2024 The Botho Foundation

//! Minimal JSON-RPC 2.0 client over HTTP.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::trace;

use crate::error::{Error, Result};

/// JSON-RPC request ID counter
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// The ledger API answers in JSON-RPC shape with an extra `ok` flag; errors
/// come back either as a JSON-RPC error object or as a plain string.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[serde(default)]
    ok: Option<bool>,
    result: Option<T>,
    error: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        trace!("rpc {} #{}", method, id);

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::rpc(method, format!("HTTP {}: {}", status, e)))?;

        if let Some(error) = body.error {
            let message = match error {
                Value::String(s) => s,
                Value::Object(ref o) => o
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
                other => other.to_string(),
            };
            return Err(Error::rpc(method, message));
        }
        if body.ok == Some(false) || !status.is_success() {
            return Err(Error::rpc(method, format!("HTTP {}", status)));
        }

        body.result
            .ok_or_else(|| Error::rpc(method, "missing result in response"))
    }
}
