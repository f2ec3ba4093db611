// Copyright (c) 2024 The Botho Foundation

//! Persisted rows and their state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::amount::Coins;

/// Names of the entries in the generic parameter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamName {
    /// Mnemonic of the master (hot) wallet.
    HotMnemonic,
    /// Mnemonic of the quarantine wallet.
    QuarantineMnemonic,
    /// Mnemonic seeding deposit address derivation.
    DepositSeed,
    /// Last derivation index handed out.
    LastIndex,
    /// Last fully processed masterchain seqno.
    LastMcBlockNumber,
}

impl ParamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamName::HotMnemonic => "hotMnemonic",
            ParamName::QuarantineMnemonic => "quarantineMnemonic",
            ParamName::DepositSeed => "depositSeed",
            ParamName::LastIndex => "lastIndex",
            ParamName::LastMcBlockNumber => "lastMcBlockNumber",
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet contract generation of a deposit address.
///
/// The version decides the sweep message shape and whether compliance
/// screening applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WalletVersion(pub u8);

impl WalletVersion {
    /// Legacy contract: swept with "carry all balance, destroy if empty".
    pub const LEGACY: WalletVersion = WalletVersion(1);
    /// Current contract: swept with a zero-value "carry all balance" transfer.
    pub const CURRENT: WalletVersion = WalletVersion(2);

    pub fn is_legacy(self) -> bool {
        self < Self::CURRENT
    }
}

impl fmt::Display for WalletVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A deposit address handed out by the allocator. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub user_friendly_address: String,
    pub derivation_path: String,
    pub version: WalletVersion,
    pub created_at: DateTime<Utc>,
}

/// Cached on-chain balance of a deposit address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub address: String,
    pub currency: String,
    pub amount: Coins,
    /// Dirty flag: the amount is possibly stale and must be re-read.
    pub need_update: bool,
    pub last_updated_at: DateTime<Utc>,
}

/// Notification state of a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepositStatus {
    /// Seen in a block, not yet observed from the receiving side.
    Pending,
    /// Observable at the destination; ready to notify.
    Confirmed,
    /// Last notification attempt failed; retry scheduled.
    NotifErr,
    /// Backend acknowledged the deposit.
    NotifOk,
    /// Retry budget exhausted.
    NotifFailed,
}

impl DepositStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DepositStatus::NotifOk | DepositStatus::NotifFailed)
    }

    /// Whether the notification dispatcher should pick this deposit up.
    pub fn awaits_notification(self) -> bool {
        matches!(self, DepositStatus::Confirmed | DepositStatus::NotifErr)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::NotifErr => "notif-err",
            DepositStatus::NotifOk => "notif-ok",
            DepositStatus::NotifFailed => "notif-failed",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DepositStatus::Pending),
            "confirmed" => Ok(DepositStatus::Confirmed),
            "notif-err" => Ok(DepositStatus::NotifErr),
            "notif-ok" => Ok(DepositStatus::NotifOk),
            "notif-failed" => Ok(DepositStatus::NotifFailed),
            _ => Err(format!("Unknown deposit status: {}", s)),
        }
    }
}

/// Compliance screening state of a deposit. `None` on the row means
/// screening does not apply (yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KytStatus {
    Pending,
    Ok,
    HasAlert,
    TransferredToQuarantine,
}

impl KytStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KytStatus::Pending => "pending",
            KytStatus::Ok => "ok",
            KytStatus::HasAlert => "has-alert",
            KytStatus::TransferredToQuarantine => "quarantine",
        }
    }
}

impl fmt::Display for KytStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KytStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(KytStatus::Pending),
            "ok" => Ok(KytStatus::Ok),
            "has-alert" => Ok(KytStatus::HasAlert),
            "quarantine" => Ok(KytStatus::TransferredToQuarantine),
            _ => Err(format!("Unknown KYT status: {}", s)),
        }
    }
}

/// An incoming transfer to one of our deposit addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub hash: String,
    /// Raw form of the account that recorded the transaction.
    pub from_address: String,
    pub lt: u64,
    pub status: DepositStatus,
    pub retries: u32,
    pub next_retry: Option<DateTime<Utc>>,
    /// Sender, user-friendly form.
    pub from_user_friendly: String,
    /// Receiving deposit address, user-friendly form.
    pub to_user_friendly: String,
    pub amount: Coins,
    pub wc_block_number: u32,
    pub shard: i64,
    pub workchain: i32,
    pub kyt_status: Option<KytStatus>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Direction of an outbound movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    /// Between our own wallets (sweep, quarantine).
    Internal,
    /// To a third party (withdrawal).
    External,
}

impl TransferType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferType::Internal => "internal",
            TransferType::External => "external",
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(TransferType::Internal),
            "external" => Ok(TransferType::External),
            _ => Err(format!("Unknown transfer type: {}", s)),
        }
    }
}

/// An outbound movement of funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub hash: String,
    pub from_address: String,
    pub from_user_friendly: String,
    pub to_user_friendly: String,
    pub transfer_type: TransferType,
    pub currency: String,
    /// `None` when the transfer carries the whole remaining balance.
    pub amount: Option<Coins>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            DepositStatus::Pending,
            DepositStatus::Confirmed,
            DepositStatus::NotifErr,
            DepositStatus::NotifOk,
            DepositStatus::NotifFailed,
        ] {
            assert_eq!(status.as_str().parse::<DepositStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<DepositStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(DepositStatus::NotifOk.is_terminal());
        assert!(DepositStatus::NotifFailed.is_terminal());
        assert!(!DepositStatus::NotifErr.is_terminal());
        assert!(!DepositStatus::Pending.awaits_notification());
        assert!(DepositStatus::Confirmed.awaits_notification());
        assert!(DepositStatus::NotifErr.awaits_notification());
    }

    #[test]
    fn test_kyt_names_fit_column() {
        for kyt in [
            KytStatus::Pending,
            KytStatus::Ok,
            KytStatus::HasAlert,
            KytStatus::TransferredToQuarantine,
        ] {
            assert!(kyt.as_str().len() <= 10);
            assert_eq!(kyt.as_str().parse::<KytStatus>().unwrap(), kyt);
        }
    }

    #[test]
    fn test_wallet_version() {
        assert!(WalletVersion::LEGACY.is_legacy());
        assert!(!WalletVersion::CURRENT.is_legacy());
        assert_eq!(WalletVersion::CURRENT.to_string(), "v2");
    }
}
