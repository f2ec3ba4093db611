// Copyright (c) 2024 The Botho Foundation

//! Service error type.

use custody_core::{AddressError, AmountError, Coins, ConfigError, DerivationPathError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error(transparent)]
    DerivationPath(#[from] DerivationPathError),

    #[error("rpc {method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("invalid destination address: {0}")]
    InvalidDestination(String),

    #[error("amount {amount} is below the minimum of {minimum}")]
    AmountBelowMinimum { amount: Coins, minimum: Coins },

    #[error("key error: {0}")]
    Key(String),

    #[error("cell error: {0}")]
    Cell(String),

    #[error("corrupt {column} value {value:?}: {reason}")]
    Corrupt {
        column: &'static str,
        value: String,
        reason: String,
    },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn rpc(method: impl Into<String>, message: impl ToString) -> Self {
        Error::Rpc {
            method: method.into(),
            message: message.to_string(),
        }
    }

    /// Whether the caller supplied a request that can never succeed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidDestination(_) | Error::AmountBelowMinimum { .. } | Error::Amount(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
