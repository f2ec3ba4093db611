// Copyright (c) 2024 The Botho Foundation

//! Deposit notification dispatcher.
//!
//! Confirmed deposits are posted to the backend. Failures are retried with
//! exponential backoff until the retry budget runs out, after which the
//! deposit is parked as `notif-failed` for good.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custody_core::{
    amount, config::NotifyConfig, Backoff, Coins, Deposit, JobState, KytStatus, RetryDecision,
    RunPhase,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    db::Database,
    error::{Error, Result},
};

/// Payload posted for each deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositNotification {
    pub hash: String,
    #[serde(with = "amount::number")]
    pub amount: Coins,
    pub from: String,
    pub to: String,
    pub network: String,
    pub currency: String,
}

/// Backend acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyAck {
    /// The backend wants this deposit screened before it is swept.
    #[serde(default)]
    pub kyt_enabled: bool,
}

#[async_trait]
pub trait NotifyBackend: Send + Sync {
    async fn notify(&self, notification: &DepositNotification) -> Result<NotifyAck>;
}

/// Backend that POSTs notifications as JSON.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl NotifyBackend for WebhookNotifier {
    async fn notify(&self, notification: &DepositNotification) -> Result<NotifyAck> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::rpc(
                "notify",
                format!(
                    "status {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        // Any 2xx is an acknowledgement; the body is optional.
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifyReport {
    pub delivered: usize,
    pub retrying: usize,
    pub failed: usize,
    pub purged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Busy,
    Done(NotifyReport),
}

pub struct NotificationDispatcher {
    db: Database,
    backend: Arc<dyn NotifyBackend>,
    backoff: Backoff,
    retention: chrono::Duration,
    network: String,
    currency: String,
    state: JobState<RunPhase>,
}

impl NotificationDispatcher {
    pub fn new(
        db: Database,
        backend: Arc<dyn NotifyBackend>,
        config: &NotifyConfig,
        network: &str,
        currency: &str,
    ) -> Self {
        Self {
            db,
            backend,
            backoff: config.backoff(),
            retention: config.retention(),
            network: network.to_string(),
            currency: currency.to_lowercase(),
            state: JobState::new(),
        }
    }

    pub async fn tick(&self) -> Result<NotifyOutcome> {
        self.tick_at(Utc::now()).await
    }

    /// Run one dispatch pass as of `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<NotifyOutcome> {
        let Some(_guard) = self.state.try_begin(RunPhase::Running) else {
            debug!("Notification dispatcher busy, skipping cycle");
            return Ok(NotifyOutcome::Busy);
        };

        let mut report = NotifyReport::default();
        for deposit in self.db.deposits_due_for_notification(now)? {
            self.dispatch(&deposit, now, &mut report).await?;
        }

        report.purged = self.db.purge_notified_deposits(now - self.retention)?;

        if report != NotifyReport::default() {
            info!(
                "Notifications: {} delivered, {} retrying, {} failed, {} purged",
                report.delivered, report.retrying, report.failed, report.purged
            );
        }
        Ok(NotifyOutcome::Done(report))
    }

    pub fn notification(&self, deposit: &Deposit) -> DepositNotification {
        DepositNotification {
            hash: deposit.hash.clone(),
            amount: deposit.amount,
            from: deposit.from_user_friendly.clone(),
            to: deposit.to_user_friendly.clone(),
            network: self.network.clone(),
            currency: self.currency.clone(),
        }
    }

    async fn dispatch(
        &self,
        deposit: &Deposit,
        now: DateTime<Utc>,
        report: &mut NotifyReport,
    ) -> Result<()> {
        match self.backend.notify(&self.notification(deposit)).await {
            Ok(ack) => {
                let kyt = ack.kyt_enabled.then_some(KytStatus::Pending);
                self.db
                    .mark_notified(&deposit.hash, &deposit.from_address, kyt)?;
                debug!("Notified deposit {}", deposit.hash);
                report.delivered += 1;
            }
            Err(e) => match self.backoff.next(deposit.retries) {
                RetryDecision::RetryAfter(delay) => {
                    let next_retry = now
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::days(365));
                    warn!(
                        "Notification of {} failed (retry {} in {:.1}s): {}",
                        deposit.hash,
                        deposit.retries + 1,
                        delay.as_secs_f64(),
                        e
                    );
                    self.db.mark_notify_failure(
                        &deposit.hash,
                        &deposit.from_address,
                        deposit.retries + 1,
                        Some(next_retry),
                    )?;
                    report.retrying += 1;
                }
                RetryDecision::GiveUp => {
                    error!(
                        "Notification of {} failed after {} retries, giving up: {}",
                        deposit.hash, deposit.retries, e
                    );
                    self.db.mark_notify_failure(
                        &deposit.hash,
                        &deposit.from_address,
                        deposit.retries,
                        None,
                    )?;
                    report.failed += 1;
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let notification = DepositNotification {
            hash: "h".to_string(),
            amount: Coins::from_nanos(1_500_000_000),
            from: "EQfrom".to_string(),
            to: "EQto".to_string(),
            network: "ton".to_string(),
            currency: "ton".to_string(),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "hash": "h",
                "amount": 1.5,
                "from": "EQfrom",
                "to": "EQto",
                "network": "ton",
                "currency": "ton",
            })
        );
    }

    #[test]
    fn test_ack_parsing() {
        let ack: NotifyAck = serde_json::from_str(r#"{"kytEnabled":true}"#).unwrap();
        assert!(ack.kyt_enabled);
        let ack: NotifyAck = serde_json::from_str("{}").unwrap();
        assert!(!ack.kyt_enabled);
        let ack: NotifyAck = serde_json::from_str("not json").unwrap_or_default();
        assert!(!ack.kyt_enabled);
    }
}
