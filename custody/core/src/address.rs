// Copyright (c) 2024 The Botho Foundation

//! Account address encodings.
//!
//! An account is identified by a workchain id and a 32-byte account id. It has
//! two textual forms:
//!
//! - raw: `<workchain>:<64 hex chars>`
//! - user-friendly: 36 bytes (`tag | workchain | account id | crc16`) encoded
//!   as base64 (url-safe or standard alphabet).

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;

const USER_FRIENDLY_LEN: usize = 36;

/// Errors produced while decoding an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid raw address: {0}")]
    Raw(String),

    #[error("invalid base64 address: {0}")]
    Encoding(String),

    #[error("address must decode to {USER_FRIENDLY_LEN} bytes, got {0}")]
    Length(usize),

    #[error("unknown address tag 0x{0:02x}")]
    Tag(u8),

    #[error("address checksum mismatch")]
    Checksum,
}

/// A decoded account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress {
    pub workchain: i8,
    pub account_id: [u8; 32],
}

impl AccountAddress {
    pub fn new(workchain: i8, account_id: [u8; 32]) -> Self {
        Self {
            workchain,
            account_id,
        }
    }

    /// Raw form, `0:abcd…`.
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.account_id))
    }

    /// User-friendly form, url-safe base64.
    pub fn to_user_friendly(&self, bounceable: bool, testnet: bool) -> String {
        let mut tag = if bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if testnet {
            tag |= TAG_TESTNET;
        }

        let mut bytes = [0u8; USER_FRIENDLY_LEN];
        bytes[0] = tag;
        bytes[1] = self.workchain as u8;
        bytes[2..34].copy_from_slice(&self.account_id);
        let crc = CRC16.checksum(&bytes[..34]);
        bytes[34..].copy_from_slice(&crc.to_be_bytes());

        URL_SAFE.encode(bytes)
    }

    fn parse_raw(s: &str) -> Result<Self, AddressError> {
        let (wc, id) = s
            .split_once(':')
            .ok_or_else(|| AddressError::Raw(s.to_string()))?;
        let workchain: i8 = wc.parse().map_err(|_| AddressError::Raw(s.to_string()))?;
        if id.len() != 64 {
            return Err(AddressError::Raw(s.to_string()));
        }
        let mut account_id = [0u8; 32];
        hex::decode_to_slice(id, &mut account_id).map_err(|_| AddressError::Raw(s.to_string()))?;
        Ok(Self::new(workchain, account_id))
    }

    fn parse_user_friendly(s: &str) -> Result<Self, AddressError> {
        let bytes = URL_SAFE
            .decode(s)
            .or_else(|_| STANDARD.decode(s))
            .map_err(|e| AddressError::Encoding(e.to_string()))?;
        if bytes.len() != USER_FRIENDLY_LEN {
            return Err(AddressError::Length(bytes.len()));
        }

        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(AddressError::Tag(bytes[0]));
        }
        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if CRC16.checksum(&bytes[..34]) != expected {
            return Err(AddressError::Checksum);
        }

        let mut account_id = [0u8; 32];
        account_id.copy_from_slice(&bytes[2..34]);
        Ok(Self::new(bytes[1] as i8, account_id))
    }
}

impl FromStr for AccountAddress {
    type Err = AddressError;

    /// Accepts either the raw or the user-friendly form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            Self::parse_raw(s)
        } else {
            Self::parse_user_friendly(s)
        }
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

/// Check an address string without keeping the decoded value.
pub fn is_valid_address(s: &str) -> bool {
    s.parse::<AccountAddress>().is_ok()
}

/// Both textual forms of a wallet address, as stored and displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddress {
    /// Raw form; the key used by the ledger API and the store.
    pub raw: String,

    /// User-friendly form handed out to users.
    pub user_friendly: String,
}

impl WalletAddress {
    pub fn from_account(account: &AccountAddress, testnet: bool) -> Self {
        Self {
            raw: account.to_raw(),
            user_friendly: account.to_user_friendly(true, testnet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AccountAddress {
        AccountAddress::new(0, [0xab; 32])
    }

    #[test]
    fn test_raw_form() {
        let raw = sample().to_raw();
        assert!(raw.starts_with("0:abab"));
        assert_eq!(raw.parse::<AccountAddress>().unwrap(), sample());
    }

    #[test]
    fn test_user_friendly_form() {
        let uf = sample().to_user_friendly(true, false);
        assert_eq!(uf.len(), 48);
        assert_eq!(uf.parse::<AccountAddress>().unwrap(), sample());

        let masterchain = AccountAddress::new(-1, [7; 32]);
        let uf = masterchain.to_user_friendly(false, true);
        assert_eq!(uf.parse::<AccountAddress>().unwrap(), masterchain);
    }

    #[test]
    fn test_checksum_detected() {
        let uf = sample().to_user_friendly(true, false);
        let mut chars: Vec<char> = uf.chars().collect();
        chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert!(!is_valid_address(&tampered));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("0:zz"));
        assert!(!is_valid_address("abc:1234"));
        assert!(!is_valid_address("not-an-address"));
    }
}
