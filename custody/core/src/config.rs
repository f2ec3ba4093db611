// Copyright (c) 2024 The Botho Foundation

//! Service configuration.

use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;

use crate::{
    amount::{self, Coins},
    backoff::Backoff,
    derivation::DerivationPath,
    model::WalletVersion,
    retry::RetryPolicy,
};

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Main service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustodyConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub kyt: KytConfig,

    #[serde(default)]
    pub confirm: ConfirmConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Ledger node and explorer endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// JSON-RPC endpoint of the ledger HTTP API
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Base URL of the block explorer index API
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Produce testnet-flavoured user-friendly addresses
    #[serde(default)]
    pub testnet: bool,
}

fn default_rpc_url() -> String {
    "http://localhost:8081/jsonRPC".to_string()
}

fn default_explorer_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            explorer_url: default_explorer_url(),
            request_timeout_secs: default_request_timeout(),
            testnet: false,
        }
    }
}

/// Fan-out and resilience of the RPC gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Concurrent block/header downloads
    #[serde(default = "default_block_concurrency")]
    pub block_concurrency: usize,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Explorer quota enforced by the explorer backend
    #[serde(default = "default_explorer_rps")]
    pub explorer_requests_per_sec: u32,
}

fn default_block_concurrency() -> usize {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_explorer_rps() -> u32 {
    1
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            block_concurrency: default_block_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            explorer_requests_per_sec: default_explorer_rps(),
        }
    }
}

impl GatewayConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// Chain scanner cadence and batch bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scan_interval")]
    pub poll_interval_secs: u64,

    /// Blocks kept between the chain head and the scan target
    #[serde(default = "default_last_block_delay")]
    pub last_block_delay: u32,

    /// Gaps of this size or less are left for the next cycle
    #[serde(default = "default_min_batch")]
    pub min_batch: u32,

    /// Upper bound on masterchain blocks per cycle
    #[serde(default = "default_max_batch")]
    pub max_batch: u32,

    /// Blocks re-processed on startup
    #[serde(default = "default_rewind_blocks")]
    pub rewind_blocks: u32,

    /// Workchain holding the deposit addresses
    #[serde(default)]
    pub workchain: i32,
}

fn default_scan_interval() -> u64 {
    5
}

fn default_last_block_delay() -> u32 {
    20
}

fn default_min_batch() -> u32 {
    5
}

fn default_max_batch() -> u32 {
    100
}

fn default_rewind_blocks() -> u32 {
    10
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_scan_interval(),
            last_block_delay: default_last_block_delay(),
            min_batch: default_min_batch(),
            max_batch: default_max_batch(),
            rewind_blocks: default_rewind_blocks(),
            workchain: 0,
        }
    }
}

/// Key derivation and fund-movement rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_base_path")]
    pub base_derivation_path: String,

    /// Contract generation used for newly allocated addresses
    #[serde(default = "default_address_version")]
    pub address_version: u8,

    /// Addresses from this version on are screened before sweeping
    #[serde(default = "default_address_version")]
    pub compliance_min_version: u8,

    /// Balances at or below this are never swept
    #[serde(default = "default_sweep_threshold", with = "amount::human")]
    pub sweep_threshold: Coins,

    #[serde(default = "default_min_withdrawal", with = "amount::human")]
    pub min_withdrawal: Coins,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_network")]
    pub network: String,

    /// Wait after broadcasting a withdrawal before looking it up
    #[serde(default = "default_settle_secs")]
    pub withdrawal_settle_secs: u64,

    #[serde(default = "default_lookup_attempts")]
    pub withdrawal_lookup_attempts: u32,

    #[serde(default = "default_lookup_interval")]
    pub withdrawal_lookup_interval_secs: u64,
}

fn default_base_path() -> String {
    "m/44'/607'/0'".to_string()
}

fn default_address_version() -> u8 {
    2
}

fn default_sweep_threshold() -> Coins {
    Coins::from_nanos(10_000_000) // 0.01
}

fn default_min_withdrawal() -> Coins {
    Coins::from_nanos(100_000_000) // 0.1
}

fn default_currency() -> String {
    "TON".to_string()
}

fn default_network() -> String {
    "ton".to_string()
}

fn default_settle_secs() -> u64 {
    10
}

fn default_lookup_attempts() -> u32 {
    10
}

fn default_lookup_interval() -> u64 {
    2
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            base_derivation_path: default_base_path(),
            address_version: default_address_version(),
            compliance_min_version: default_address_version(),
            sweep_threshold: default_sweep_threshold(),
            min_withdrawal: default_min_withdrawal(),
            currency: default_currency(),
            network: default_network(),
            withdrawal_settle_secs: default_settle_secs(),
            withdrawal_lookup_attempts: default_lookup_attempts(),
            withdrawal_lookup_interval_secs: default_lookup_interval(),
        }
    }
}

impl WalletConfig {
    pub fn derivation_path(&self) -> Result<DerivationPath, ConfigError> {
        self.base_derivation_path
            .parse()
            .map_err(|e: crate::derivation::DerivationPathError| invalid(e.to_string()))
    }

    pub fn address_version(&self) -> WalletVersion {
        WalletVersion(self.address_version)
    }

    pub fn compliance_min_version(&self) -> WalletVersion {
        WalletVersion(self.compliance_min_version)
    }
}

/// Balance refresh and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_refresh_interval")]
    pub balance_refresh_interval_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_transfer_retention")]
    pub transfer_retention_days: u32,
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    240
}

fn default_transfer_retention() -> u32 {
    100
}

/// Upper bound for the retention windows, in days.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

fn retention(days: u32) -> chrono::Duration {
    chrono::Duration::days(i64::from(days.min(MAX_RETENTION_DAYS)))
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            balance_refresh_interval_secs: default_refresh_interval(),
            sweep_interval_secs: default_sweep_interval(),
            transfer_retention_days: default_transfer_retention(),
        }
    }
}

/// Deposit notification webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_notify_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_notify_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Acknowledged deposits are kept this long
    #[serde(default = "default_deposit_retention")]
    pub retention_days: u32,
}

fn default_backend_timeout() -> u64 {
    5
}

fn default_notify_interval() -> u64 {
    5
}

fn default_notify_retries() -> u32 {
    10
}

fn default_base_delay() -> f64 {
    5.0
}

fn default_backoff_factor() -> f64 {
    1.7
}

fn default_deposit_retention() -> u32 {
    10
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_backend_timeout(),
            poll_interval_secs: default_notify_interval(),
            max_retries: default_notify_retries(),
            base_delay_secs: default_base_delay(),
            backoff_factor: default_backoff_factor(),
            retention_days: default_deposit_retention(),
        }
    }
}

impl SweepConfig {
    /// How long transfers are kept.
    pub fn transfer_retention(&self) -> chrono::Duration {
        retention(self.transfer_retention_days)
    }
}

impl NotifyConfig {
    /// How long acknowledged deposits are kept.
    pub fn retention(&self) -> chrono::Duration {
        retention(self.retention_days)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs_f64(self.base_delay_secs),
            self.backoff_factor,
            self.max_retries,
        )
    }
}

/// Compliance screening backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KytConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for KytConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmConfig {
    #[serde(default = "default_confirm_interval")]
    pub poll_interval_secs: u64,
}

fn default_confirm_interval() -> u64 {
    10
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_confirm_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "custody.sqlite".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn check_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.is_empty() {
        return Err(invalid(format!("{} must be set", field)));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(invalid(format!("{} must be an http(s) URL, got {}", field, url)));
    }
    Ok(())
}

impl CustodyConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CustodyConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("node.rpc_url", &self.node.rpc_url)?;
        check_url("node.explorer_url", &self.node.explorer_url)?;
        check_url("notify.url", &self.notify.url)?;
        check_url("kyt.url", &self.kyt.url)?;

        if self.gateway.block_concurrency == 0 {
            return Err(invalid("gateway.block_concurrency must be > 0"));
        }
        if self.gateway.retry_attempts == 0 {
            return Err(invalid("gateway.retry_attempts must be > 0"));
        }
        if self.gateway.explorer_requests_per_sec == 0 {
            return Err(invalid("gateway.explorer_requests_per_sec must be > 0"));
        }

        if self.scanner.max_batch == 0 || self.scanner.max_batch < self.scanner.min_batch {
            return Err(invalid("scanner.max_batch must be >= scanner.min_batch and > 0"));
        }

        self.wallet.derivation_path()?;
        if self.wallet.address_version == 0 {
            return Err(invalid("wallet.address_version must be >= 1"));
        }
        if self.wallet.min_withdrawal.is_zero() {
            tracing::warn!("wallet.min_withdrawal is zero; any amount can be withdrawn");
        }

        if !(self.notify.base_delay_secs.is_finite() && self.notify.base_delay_secs > 0.0) {
            return Err(invalid("notify.base_delay_secs must be positive"));
        }
        if !(self.notify.backoff_factor.is_finite() && self.notify.backoff_factor >= 1.0) {
            return Err(invalid("notify.backoff_factor must be >= 1"));
        }

        for (field, secs) in [
            ("scanner.poll_interval_secs", self.scanner.poll_interval_secs),
            ("confirm.poll_interval_secs", self.confirm.poll_interval_secs),
            ("notify.poll_interval_secs", self.notify.poll_interval_secs),
            (
                "sweep.balance_refresh_interval_secs",
                self.sweep.balance_refresh_interval_secs,
            ),
            ("sweep.sweep_interval_secs", self.sweep.sweep_interval_secs),
        ] {
            if secs == 0 {
                return Err(invalid(format!("{} must be > 0", field)));
            }
        }

        for (field, days) in [
            ("sweep.transfer_retention_days", self.sweep.transfer_retention_days),
            ("notify.retention_days", self.notify.retention_days),
        ] {
            if days == 0 || days > MAX_RETENTION_DAYS {
                return Err(invalid(format!(
                    "{} must be between 1 and {}, got {}",
                    field, MAX_RETENTION_DAYS, days
                )));
            }
        }

        Ok(())
    }
}
