// Copyright (c) 2024 The Botho Foundation

//! Typed ledger records exchanged with the RPC gateway.
//!
//! The ledger HTTP API returns loosely-typed JSON where 64-bit integers are
//! frequently encoded as strings. These records pin the shape down at the
//! gateway boundary so nothing past it handles raw JSON.

use serde::{Deserialize, Serialize};

use crate::amount::Coins;

/// Workchain id of the masterchain.
pub const MASTERCHAIN: i32 = -1;

/// Shard id covering the whole masterchain.
pub const MASTERCHAIN_SHARD: i64 = i64::MIN;

/// Deserialize integers encoded either as JSON numbers or decimal strings.
pub mod num {
    use serde::{de, Deserialize, Deserializer};
    use std::{fmt::Display, str::FromStr};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString<T> {
        Num(T),
        Str(String),
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
    {
        match NumOrString::<T>::deserialize(deserializer)? {
            NumOrString::Num(n) => Ok(n),
            NumOrString::Str(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }
}

/// Full coordinates of a block.
///
/// `seqno` alone is not unique across shard splits and merges, so the whole
/// tuple is the identity used to deduplicate blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub workchain: i32,
    #[serde(deserialize_with = "num::deserialize")]
    pub shard: i64,
    pub seqno: u32,
    #[serde(default)]
    pub root_hash: String,
    #[serde(default)]
    pub file_hash: String,
}

impl BlockId {
    pub fn masterchain(seqno: u32) -> Self {
        Self {
            workchain: MASTERCHAIN,
            shard: MASTERCHAIN_SHARD,
            seqno,
            root_hash: String::new(),
            file_hash: String::new(),
        }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{:x},{})", self.workchain, self.shard, self.seqno)
    }
}

/// The header fields the scanner needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub id: BlockId,
    #[serde(deserialize_with = "num::deserialize")]
    pub end_lt: u64,
    #[serde(default)]
    pub prev_blocks: Vec<BlockId>,
}

/// A short transaction reference as listed in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTransaction {
    pub account: String,
    pub hash: String,
    #[serde(deserialize_with = "num::deserialize")]
    pub lt: u64,
}

/// An internal message carried by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    pub value: Coins,
}

/// Full transaction detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub hash: String,
    pub lt: u64,
    pub fee: Coins,
    pub in_msg: Option<Message>,
    #[serde(default)]
    pub out_msgs: Vec<Message>,
}

/// Transaction as returned by the explorer's message-hash lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerTransaction {
    pub hash: String,
    pub fee: Coins,
}

/// A signed external message ready for broadcast (base64 bag of cells).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub boc: String,
}
