// Copyright (c) 2024 The Botho Foundation

//! Custodial hot-wallet service.
//!
//! Hands out deposit addresses, watches the chain for incoming transfers,
//! notifies the backend about them, screens them for compliance and sweeps
//! the funds into the master wallet. Withdrawals leave from the master
//! wallet.
//!
//! ## Components
//!
//! - [`rpc::RpcGateway`]: retrying, bounded access to the ledger node and
//!   explorer
//! - [`allocator::AddressAllocator`]: sequential deposit address derivation
//! - [`codec::WalletV3Codec`]: wallet addresses and signed transfer messages
//! - [`scanner::ChainScanner`]: masterchain-driven deposit detection
//! - [`confirm::ConfirmationTracker`]: pending to confirmed
//! - [`notify::NotificationDispatcher`]: webhook delivery with backoff
//! - [`kyt::KytGate`]: compliance screening and quarantine
//! - [`sweep::SweepOrchestrator`]: balance refresh and sweeping
//! - [`engine::CustodyEngine`]: periodic scheduling and shutdown

pub mod allocator;
pub mod cell;
pub mod codec;
pub mod confirm;
pub mod db;
pub mod engine;
pub mod error;
pub mod keys;
pub mod kyt;
pub mod notify;
pub mod rpc;
pub mod scanner;
pub mod sweep;
pub mod wallet;

pub use db::Database;
pub use engine::{Backends, Custody, CustodyEngine};
pub use error::{Error, Result};
pub use wallet::{WalletService, WithdrawalReceipt};
