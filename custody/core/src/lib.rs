// Copyright (c) 2024 The Botho Foundation

//! Core types and shared utilities for the custodial hot-wallet service.
//!
//! This crate has no I/O of its own. It provides:
//!
//! - Native coin amounts and address encodings
//! - Typed ledger records returned by the RPC gateway
//! - Persisted rows and their status state machines
//! - Configuration structures
//! - Retry, worker pool, rate limiting and single-flight job utilities

pub mod address;
pub mod amount;
pub mod backoff;
pub mod chain;
pub mod config;
pub mod derivation;
pub mod job;
pub mod model;
pub mod pool;
pub mod rate_limit;
pub mod retry;

pub use address::{is_valid_address, AccountAddress, AddressError, WalletAddress};
pub use amount::{AmountError, Coins};
pub use backoff::{Backoff, RetryDecision};
pub use chain::{
    BlockHeader, BlockId, BlockTransaction, ExplorerTransaction, Message, SignedMessage,
    TransactionDetails,
};
pub use config::{ConfigError, CustodyConfig};
pub use derivation::{DerivationPath, DerivationPathError};
pub use job::{JobGuard, JobPhase, JobState, RunPhase, ScanPhase, SweepPhase};
pub use model::{
    Address, Balance, Deposit, DepositStatus, KytStatus, ParamName, Transfer, TransferType,
    WalletVersion,
};
pub use pool::WorkerPool;
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
