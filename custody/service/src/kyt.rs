// Copyright (c) 2024 The Botho Foundation

//! KYT compliance gate.
//!
//! Funds may only leave a screened deposit address once every deposit it
//! received has been cleared. Deposits with alerts are moved to the
//! quarantine wallet first.

use async_trait::async_trait;
use custody_core::{config::KytConfig, Address, Coins, KytStatus, WalletVersion};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

use crate::{
    db::Database,
    error::{Error, Result},
    wallet::WalletService,
};

/// Screening result for one deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KytReport {
    Ok,
    Pending,
    Alerts,
}

/// Compliance screening backend.
#[async_trait]
pub trait KytBackend: Send + Sync {
    /// Screen the transfer `hash` received by `to`.
    async fn check(&self, to: &str, hash: &str) -> Result<KytReport>;
}

#[derive(Debug, Serialize)]
struct KytRequest<'a> {
    to: &'a str,
    hash: &'a str,
    currency: &'a str,
    network: &'a str,
}

#[derive(Debug, Deserialize)]
struct KytResponse {
    status: KytReport,
}

/// Backend that POSTs screening requests as JSON.
pub struct HttpKytBackend {
    client: Client,
    url: String,
    currency: String,
    network: String,
}

impl HttpKytBackend {
    pub fn new(config: &KytConfig, currency: &str, network: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            currency: currency.to_lowercase(),
            network: network.to_string(),
        })
    }
}

#[async_trait]
impl KytBackend for HttpKytBackend {
    async fn check(&self, to: &str, hash: &str) -> Result<KytReport> {
        let response = self
            .client
            .post(&self.url)
            .json(&KytRequest {
                to,
                hash,
                currency: &self.currency,
                network: &self.network,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::rpc(
                "kyt",
                format!(
                    "status {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        let body: KytResponse = response.json().await?;
        Ok(body.status)
    }
}

/// Result of evaluating one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KytVerdict {
    /// No deposit of the address is pending screening or holding alerts.
    pub can_sweep: bool,
    /// Quarantine transfer issued during this evaluation.
    pub quarantine_hash: Option<String>,
}

impl KytVerdict {
    fn clear() -> Self {
        Self {
            can_sweep: true,
            quarantine_hash: None,
        }
    }

    fn blocked() -> Self {
        Self {
            can_sweep: false,
            quarantine_hash: None,
        }
    }
}

pub struct KytGate {
    db: Database,
    backend: Arc<dyn KytBackend>,
    wallet: Arc<WalletService>,
    min_version: WalletVersion,
}

impl KytGate {
    pub fn new(
        db: Database,
        backend: Arc<dyn KytBackend>,
        wallet: Arc<WalletService>,
        min_version: WalletVersion,
    ) -> Self {
        Self {
            db,
            backend,
            wallet,
            min_version,
        }
    }

    /// Whether screening applies to `address` at all.
    pub fn screens(&self, address: &Address) -> bool {
        address.version >= self.min_version
    }

    /// Screen pending deposits of `address` and quarantine alerted funds.
    ///
    /// A deposit still pending screening, or a backend failure, blocks the
    /// address without touching anything further.
    pub async fn evaluate(&self, address: &Address) -> Result<KytVerdict> {
        if !self.screens(address) {
            return Ok(KytVerdict::clear());
        }

        for deposit in self.db.deposits_with_kyt(&address.address, KytStatus::Pending)? {
            match self
                .backend
                .check(&deposit.to_user_friendly, &deposit.hash)
                .await
            {
                Ok(KytReport::Pending) => {
                    debug!("Deposit {} still under screening", deposit.hash);
                    return Ok(KytVerdict::blocked());
                }
                Ok(KytReport::Ok) => {
                    self.db
                        .set_kyt_status(&deposit.hash, &deposit.from_address, KytStatus::Ok)?;
                }
                Ok(KytReport::Alerts) => {
                    warn!("Deposit {} to {} has KYT alerts", deposit.hash, deposit.to_user_friendly);
                    self.db.set_kyt_status(
                        &deposit.hash,
                        &deposit.from_address,
                        KytStatus::HasAlert,
                    )?;
                }
                Err(e) => {
                    warn!("KYT check of {} failed: {}", deposit.hash, e);
                    return Ok(KytVerdict::blocked());
                }
            }
        }

        let alerted = self
            .db
            .deposits_with_kyt(&address.address, KytStatus::HasAlert)?;
        if alerted.is_empty() {
            return Ok(KytVerdict::clear());
        }

        let total: Coins = alerted.iter().map(|d| d.amount).sum();
        match self.wallet.move_to_quarantine(address, total).await {
            Ok(hash) => {
                for deposit in &alerted {
                    if let Err(e) = self.db.set_kyt_status(
                        &deposit.hash,
                        &deposit.from_address,
                        KytStatus::TransferredToQuarantine,
                    ) {
                        error!(
                            "Deposit {} was quarantined by {} but not marked: {}",
                            deposit.hash, hash, e
                        );
                        return Err(e);
                    }
                }
                Ok(KytVerdict {
                    can_sweep: true,
                    quarantine_hash: Some(hash),
                })
            }
            Err(e) => {
                error!(
                    "Quarantine of {} from {} failed: {}",
                    total, address.user_friendly_address, e
                );
                Ok(KytVerdict::blocked())
            }
        }
    }
}
